use std::error::Error;

use serde_json::Value;

use crate::error::ErrorKind;
use crate::request::{
    GuestPromptRequest, LoginRequest, OtpRequest, PromptRequest,
};
use crate::response::{
    ConversationId, ConversationSummary, GuestReply, Identity, LoginOutcome,
    MessageRecord, PromptReply,
};

/// The error type for a backend.
pub trait BackendError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns the structured payload the server sent along with the
    /// failure, if any.
    fn payload(&self) -> Option<&Value> {
        None
    }
}

/// A type that represents the remote service: authentication, the
/// conversation store and the AI endpoints.
///
/// Once the backend is created, it should behave like a stateless object,
/// except for the bearer credential which callers install and remove
/// through [`Backend::set_credential`]. Every returned future must be
/// independent of `self`, so that callers can drive it on another task.
pub trait Backend: Send + Sync {
    /// The error type that may be returned by the backend.
    type Error: BackendError;

    /// Installs or removes the bearer credential attached to subsequent
    /// requests.
    fn set_credential(&self, token: Option<&str>);

    /// Starts a login with email and password.
    fn login(
        &self,
        req: &LoginRequest,
    ) -> impl Future<Output = Result<LoginOutcome, Self::Error>> + Send + 'static;

    /// Completes a pending OTP challenge.
    fn verify_otp(
        &self,
        req: &OtpRequest,
    ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + 'static;

    /// Fetches every conversation of the current user, without messages.
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, Self::Error>>
    + Send
    + 'static;

    /// Fetches the full message history of a conversation, in server
    /// order.
    fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, Self::Error>>
    + Send
    + 'static;

    /// Deletes a conversation on the server.
    fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static;

    /// Sends a prompt within an existing conversation of the current user.
    fn send_prompt(
        &self,
        req: &PromptRequest,
    ) -> impl Future<Output = Result<PromptReply, Self::Error>> + Send + 'static;

    /// Sends a prompt on behalf of an anonymous user.
    fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> impl Future<Output = Result<GuestReply, Self::Error>> + Send + 'static;
}
