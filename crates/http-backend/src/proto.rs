use serde::{Deserialize, Serialize};
use serde_json::Value;
use sophia_backend::{
    AuthBundle, ConversationId, ConversationSummary, GuestReply, HistoryTurn,
    Identity, LoginOutcome, MessageRecord, OtpChallenge, PromptReply, Role,
    User,
};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_VERIFY_OTP: &str = "verify_otp";

// ------------------------------
// Types received from the server
// ------------------------------

/// Identifiers are strings in the database but some endpoints serialize
/// them as numbers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    #[inline]
    pub fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub status: String,
    pub email: Option<String>,
    pub user: Option<User>,
    pub auth: Option<AuthBundle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct WireConversation {
    pub conversation_id: WireId,
    pub conversation_name: Option<String>,
    pub conversation_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct WireMessage {
    pub id: Option<WireId>,
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ListResponse<T> {
    pub status: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct AdditionalContext {
    pub conversation_name: Option<String>,
    pub conversation_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AiResponse {
    pub response: Option<Value>,
    pub additional_context: Option<AdditionalContext>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LoginBody<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OtpBody<'a> {
    pub email: &'a str,
    pub otp: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct WireTurn<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GuestBody<'a> {
    pub prompt: &'a str,
    pub history: Vec<WireTurn<'a>>,
}

// -----------
// Conversions
// -----------

/// Reasons an otherwise successful response cannot be converted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvertError {
    /// The `status` field reports a failure.
    Status(String),
    /// A field required by the `status` is missing.
    Missing(&'static str),
}

#[inline]
pub fn history(turns: &[HistoryTurn]) -> Vec<WireTurn<'_>> {
    turns
        .iter()
        .map(|turn| WireTurn {
            role: turn.role.as_str(),
            content: &turn.content,
        })
        .collect()
}

pub fn login_outcome(resp: AuthResponse) -> Result<LoginOutcome, ConvertError> {
    if resp.status == STATUS_VERIFY_OTP {
        let email = resp.email.ok_or(ConvertError::Missing("email"))?;
        return Ok(LoginOutcome::OtpRequired(OtpChallenge { email }));
    }
    identity(resp).map(LoginOutcome::Authenticated)
}

pub fn identity(resp: AuthResponse) -> Result<Identity, ConvertError> {
    if resp.status != STATUS_SUCCESS {
        return Err(ConvertError::Status(resp.status));
    }
    Ok(Identity {
        user: resp.user.ok_or(ConvertError::Missing("user"))?,
        auth: resp.auth.ok_or(ConvertError::Missing("auth"))?,
    })
}

pub fn conversations(
    resp: ListResponse<WireConversation>,
) -> Result<Vec<ConversationSummary>, ConvertError> {
    if resp.status != STATUS_SUCCESS {
        return Err(ConvertError::Status(resp.status));
    }
    Ok(resp
        .data
        .into_iter()
        .map(|c| ConversationSummary {
            id: ConversationId::new(c.conversation_id.into_string()),
            name: c.conversation_name.filter(|s| !s.is_empty()),
            kind: c.conversation_type.filter(|s| !s.is_empty()),
        })
        .collect())
}

pub fn messages(
    resp: ListResponse<WireMessage>,
) -> Result<Vec<MessageRecord>, ConvertError> {
    if resp.status != STATUS_SUCCESS {
        return Err(ConvertError::Status(resp.status));
    }
    Ok(resp
        .data
        .into_iter()
        .map(|m| MessageRecord {
            id: m.id.map(WireId::into_string),
            role: Role::from_server(&m.role),
            content: m.content,
        })
        .collect())
}

pub fn prompt_reply(resp: AiResponse) -> PromptReply {
    let context = resp.additional_context.unwrap_or_default();
    PromptReply {
        response: resp.response.and_then(response_text),
        conversation_name: context.conversation_name.filter(|s| !s.is_empty()),
        conversation_type: context.conversation_type.filter(|s| !s.is_empty()),
    }
}

pub fn guest_reply(resp: AiResponse) -> GuestReply {
    GuestReply {
        response: resp.response.and_then(response_text),
    }
}

/// The service mostly answers with a string, but structured answers are
/// rendered as their JSON text rather than dropped.
fn response_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_login_outcomes() {
        let otp: AuthResponse = serde_json::from_value(json!({
            "status": "verify_otp",
            "email": "a@example.com"
        }))
        .unwrap();
        assert_eq!(
            login_outcome(otp).unwrap(),
            LoginOutcome::OtpRequired(OtpChallenge {
                email: "a@example.com".to_owned()
            })
        );

        let success: AuthResponse = serde_json::from_value(json!({
            "status": "success",
            "user": { "username": "a", "user_id": "u-1" },
            "auth": { "access_token": "t0k3n" }
        }))
        .unwrap();
        let LoginOutcome::Authenticated(identity) =
            login_outcome(success).unwrap()
        else {
            panic!("expected an identity");
        };
        assert_eq!(identity.auth.access_token, "t0k3n");
        assert_eq!(identity.user.extra.get("user_id"), Some(&json!("u-1")));

        let incomplete: AuthResponse =
            serde_json::from_value(json!({ "status": "success" })).unwrap();
        assert_eq!(
            login_outcome(incomplete).unwrap_err(),
            ConvertError::Missing("user")
        );
    }

    #[test]
    fn test_conversations_and_messages() {
        let list: ListResponse<WireConversation> =
            serde_json::from_value(json!({
                "status": "success",
                "data": [
                    { "conversation_id": "A", "conversation_name": "Foo",
                      "conversation_type": "chat" },
                    { "conversation_id": 7, "conversation_name": null }
                ]
            }))
            .unwrap();
        let list = conversations(list).unwrap();
        assert_eq!(list[0].name.as_deref(), Some("Foo"));
        assert_eq!(list[1].id.as_str(), "7");
        assert_eq!(list[1].kind, None);

        let msgs: ListResponse<WireMessage> = serde_json::from_value(json!({
            "status": "success",
            "data": [
                { "id": 1, "role": "user", "content": "hi" },
                { "id": 2, "role": "bot", "content": "hello" }
            ]
        }))
        .unwrap();
        let msgs = messages(msgs).unwrap();
        assert_eq!(msgs[0].id.as_deref(), Some("1"));
        assert_eq!(msgs[1].role, Role::Assistant);

        let failed: ListResponse<WireMessage> =
            serde_json::from_value(json!({ "status": "error" })).unwrap();
        assert_eq!(
            messages(failed).unwrap_err(),
            ConvertError::Status("error".to_owned())
        );
    }

    #[test]
    fn test_prompt_reply() {
        let resp: AiResponse = serde_json::from_value(json!({
            "response": "Sure.",
            "additional_context": { "conversation_name": "Trip plans" }
        }))
        .unwrap();
        let reply = prompt_reply(resp);
        assert_eq!(reply.response.as_deref(), Some("Sure."));
        assert_eq!(reply.conversation_name.as_deref(), Some("Trip plans"));
        assert_eq!(reply.conversation_type, None);

        let resp: AiResponse =
            serde_json::from_value(json!({ "response": { "k": 1 } })).unwrap();
        assert_eq!(guest_reply(resp).response.as_deref(), Some("{\"k\":1}"));
    }

    #[test]
    fn test_guest_body() {
        let turns = vec![HistoryTurn {
            role: Role::User,
            content: "hello".to_owned(),
        }];
        let body = GuestBody {
            prompt: "hello",
            history: history(&turns),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "prompt": "hello",
                "history": [{ "role": "user", "content": "hello" }]
            })
        );
    }
}
