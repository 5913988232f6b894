use std::fmt::{self, Debug, Formatter};

use bytes::Bytes;
use mime::Mime;

use crate::response::{ConversationId, Role};

/// Credentials for a password login.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LoginRequest {
    /// The account email.
    pub email: String,
    /// The account password.
    pub password: String,
}

impl Debug for LoginRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<deducted>")
            .finish()
    }
}

/// A one-time code answering an OTP challenge.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OtpRequest {
    /// The email the challenge was issued for.
    pub email: String,
    /// The code the user received.
    pub otp: String,
}

/// A file uploaded along with a prompt.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Attachment {
    /// The file name reported to the server.
    pub file_name: String,
    /// The content type of the file.
    pub mime: Mime,
    /// The file content.
    pub data: Bytes,
}

impl Attachment {
    /// Creates an attachment typed as `application/octet-stream`.
    #[inline]
    pub fn new<S: Into<String>, B: Into<Bytes>>(file_name: S, data: B) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime::APPLICATION_OCTET_STREAM,
            data: data.into(),
        }
    }

    /// Sets the content type.
    #[inline]
    pub fn with_mime(mut self, mime: Mime) -> Self {
        self.mime = mime;
        self
    }
}

impl Debug for Attachment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A prompt sent within an existing conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PromptRequest {
    /// The conversation the prompt belongs to.
    pub conversation_id: ConversationId,
    /// The prompt text.
    pub prompt: String,
    /// Files uploaded with the prompt.
    pub attachments: Vec<Attachment>,
}

/// One turn of the history sent with a guest prompt.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryTurn {
    /// Who produced the turn.
    pub role: Role,
    /// Plain-text content of the turn.
    pub content: String,
}

/// A prompt sent by an anonymous user.
///
/// Guests have no server-side conversation, so the whole history
/// (including the turn being sent) travels with every prompt.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GuestPromptRequest {
    /// The prompt text.
    pub prompt: String,
    /// The conversation so far.
    pub history: Vec<HistoryTurn>,
    /// Files uploaded with the prompt.
    pub attachments: Vec<Attachment>,
}
