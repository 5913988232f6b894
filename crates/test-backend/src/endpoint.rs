use std::fmt::{self, Display, Formatter};

/// The remote operations a backend exposes, used to address call counters,
/// delays and injected failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// `POST /login`
    Login,
    /// `POST /verify-otp`
    VerifyOtp,
    /// `GET /get_all_users_conversations`
    ListConversations,
    /// `GET /get_all_conversation_messages/{id}`
    ConversationMessages,
    /// `DELETE /delete_conversation/{id}`
    DeleteConversation,
    /// `POST /ai/logged_in_user`
    SendPrompt,
    /// `POST /guest/ai`
    SendGuestPrompt,
}

impl Endpoint {
    /// Every endpoint, in declaration order.
    pub const ALL: [Endpoint; 7] = [
        Endpoint::Login,
        Endpoint::VerifyOtp,
        Endpoint::ListConversations,
        Endpoint::ConversationMessages,
        Endpoint::DeleteConversation,
        Endpoint::SendPrompt,
        Endpoint::SendGuestPrompt,
    ];
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let path = match self {
            Endpoint::Login => "/login",
            Endpoint::VerifyOtp => "/verify-otp",
            Endpoint::ListConversations => "/get_all_users_conversations",
            Endpoint::ConversationMessages => {
                "/get_all_conversation_messages/{id}"
            }
            Endpoint::DeleteConversation => "/delete_conversation/{id}",
            Endpoint::SendPrompt => "/ai/logged_in_user",
            Endpoint::SendGuestPrompt => "/guest/ai",
        };
        f.write_str(path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_paths_are_distinct() {
        let paths: HashSet<_> =
            Endpoint::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(paths.len(), Endpoint::ALL.len());
    }
}
