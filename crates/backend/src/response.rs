use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A server-assigned conversation identifier.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates an identifier from its string form.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Returns the string form of the identifier.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The record of the signed-in user.
///
/// The service decides which fields a user has; the known ones are typed
/// and everything else is kept as-is so that it survives persistence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Display name of the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Email of the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Any other fields the service sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The credential bundle issued on login.
///
/// Fields other than the token are kept as-is, like [`User::extra`].
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthBundle {
    /// The bearer token, which has no client-known expiry.
    pub access_token: String,
    /// Any other fields the service sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthBundle {
    /// Creates a bundle holding only a bearer token.
    #[inline]
    pub fn new<S: Into<String>>(access_token: S) -> Self {
        Self {
            access_token: access_token.into(),
            extra: Map::new(),
        }
    }
}

impl Debug for AuthBundle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Extra fields may hold secrets as well.
        f.debug_struct("AuthBundle")
            .field("access_token", &"<deducted>")
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The authenticated user plus its bearer credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// The user record.
    pub user: User,
    /// The credential bundle.
    pub auth: AuthBundle,
}

/// An intermediate login state requiring a one-time code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OtpChallenge {
    /// The email the code was sent to.
    pub email: String,
}

/// The outcome of a password login.
#[derive(Clone, Debug, PartialEq)]
pub enum LoginOutcome {
    /// The login completed and an identity was issued.
    Authenticated(Identity),
    /// The server requires a one-time code before issuing an identity.
    OtpRequired(OtpChallenge),
}

/// A conversation as listed by the server, without its messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationSummary {
    /// The conversation identifier.
    pub id: ConversationId,
    /// The display name, if the server has assigned one.
    pub name: Option<String>,
    /// The category tag, if any.
    pub kind: Option<String>,
}

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The AI assistant.
    Assistant,
}

impl Role {
    /// Maps a server role string. Anything other than `"user"` is treated
    /// as the assistant.
    #[inline]
    pub fn from_server(role: &str) -> Self {
        if role == "user" {
            Role::User
        } else {
            Role::Assistant
        }
    }

    /// Returns the wire name of the role.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A stored message of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRecord {
    /// The server-side identifier of the message.
    pub id: Option<String>,
    /// Who produced the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

/// The AI answer to a prompt of a signed-in user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PromptReply {
    /// The answer text, if the service produced one.
    pub response: Option<String>,
    /// A revised conversation name.
    pub conversation_name: Option<String>,
    /// A revised conversation category.
    pub conversation_type: Option<String>,
}

/// The AI answer to a guest prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GuestReply {
    /// The answer text, if the service produced one.
    pub response: Option<String>,
}
