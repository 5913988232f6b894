use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;

use sophia_backend::{
    Backend, BackendError, ConversationId, ConversationSummary,
    GuestPromptRequest, GuestReply, Identity, LoginOutcome, LoginRequest,
    MessageRecord, OtpRequest, PromptReply, PromptRequest,
};
use tracing::Instrument;

use crate::Error;

type BoxedFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;

/// A wrapper around a backend that provides a type-erased interface for
/// the stores.
///
/// Every call returns a future that is independent of the gateway, so it
/// can be moved into a spawned task. Clones share the same backend.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn BackendObject>,
}

impl Gateway {
    /// Creates a gateway over the given backend.
    #[inline]
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        // We have to erase the type `B`, since the stores don't have a
        // generic parameter and we don't want them to.
        Self {
            backend: Arc::new(AnyBackend(backend)),
        }
    }

    /// Installs or removes the bearer credential.
    #[inline]
    pub fn set_credential(&self, token: Option<&str>) {
        let action = if token.is_some() { "set" } else { "cleared" };
        trace!("credential {action}");
        self.backend.set_credential(token);
    }

    #[inline]
    pub(crate) fn login(
        &self,
        req: &LoginRequest,
    ) -> BoxedFuture<LoginOutcome> {
        self.backend.login(req)
    }

    #[inline]
    pub(crate) fn verify_otp(&self, req: &OtpRequest) -> BoxedFuture<Identity> {
        self.backend.verify_otp(req)
    }

    #[inline]
    pub(crate) fn list_conversations(
        &self,
    ) -> BoxedFuture<Vec<ConversationSummary>> {
        self.backend.list_conversations()
    }

    #[inline]
    pub(crate) fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> BoxedFuture<Vec<MessageRecord>> {
        self.backend.conversation_messages(id)
    }

    #[inline]
    pub(crate) fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> BoxedFuture<()> {
        self.backend.delete_conversation(id)
    }

    #[inline]
    pub(crate) fn send_prompt(
        &self,
        req: &PromptRequest,
    ) -> BoxedFuture<PromptReply> {
        self.backend.send_prompt(req)
    }

    #[inline]
    pub(crate) fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> BoxedFuture<GuestReply> {
        self.backend.send_guest_prompt(req)
    }
}

impl Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

trait BackendObject: Send + Sync + 'static {
    fn set_credential(&self, token: Option<&str>);

    fn login(&self, req: &LoginRequest) -> BoxedFuture<LoginOutcome>;

    fn verify_otp(&self, req: &OtpRequest) -> BoxedFuture<Identity>;

    fn list_conversations(&self) -> BoxedFuture<Vec<ConversationSummary>>;

    fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> BoxedFuture<Vec<MessageRecord>>;

    fn delete_conversation(&self, id: &ConversationId) -> BoxedFuture<()>;

    fn send_prompt(&self, req: &PromptRequest) -> BoxedFuture<PromptReply>;

    fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> BoxedFuture<GuestReply>;
}

struct AnyBackend<B: Backend>(B);

impl<B: Backend + 'static> BackendObject for AnyBackend<B> {
    #[inline]
    fn set_credential(&self, token: Option<&str>) {
        self.0.set_credential(token);
    }

    #[inline]
    fn login(&self, req: &LoginRequest) -> BoxedFuture<LoginOutcome> {
        erase("login", self.0.login(req))
    }

    #[inline]
    fn verify_otp(&self, req: &OtpRequest) -> BoxedFuture<Identity> {
        erase("verify otp", self.0.verify_otp(req))
    }

    #[inline]
    fn list_conversations(&self) -> BoxedFuture<Vec<ConversationSummary>> {
        erase("list conversations", self.0.list_conversations())
    }

    #[inline]
    fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> BoxedFuture<Vec<MessageRecord>> {
        erase("conversation messages", self.0.conversation_messages(id))
    }

    #[inline]
    fn delete_conversation(&self, id: &ConversationId) -> BoxedFuture<()> {
        erase("delete conversation", self.0.delete_conversation(id))
    }

    #[inline]
    fn send_prompt(&self, req: &PromptRequest) -> BoxedFuture<PromptReply> {
        erase("send prompt", self.0.send_prompt(req))
    }

    #[inline]
    fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> BoxedFuture<GuestReply> {
        erase("send guest prompt", self.0.send_guest_prompt(req))
    }
}

fn erase<T, E, F>(op: &'static str, fut: F) -> BoxedFuture<T>
where
    T: 'static,
    E: BackendError,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    Box::pin(
        async move {
            trace!("started");
            match fut.await {
                Ok(value) => {
                    trace!("finished");
                    Ok(value)
                }
                Err(err) => {
                    error!("got an error: {err:?}");
                    Err(Error::from_backend(&err))
                }
            }
        }
        .instrument(trace_span!("gateway req", op)),
    )
}

#[cfg(test)]
mod tests {
    use sophia_backend::LoginOutcome;
    use sophia_test_backend::{Endpoint, Error as TestError, TestBackend};

    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_erased_calls() {
        let backend = TestBackend::default();
        backend.add_account("a@example.com", "pw", None);
        let gateway = Gateway::new(backend.clone());

        let outcome = gateway
            .login(&LoginRequest {
                email: "a@example.com".to_owned(),
                password: "pw".to_owned(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));

        gateway.set_credential(Some("token"));
        assert_eq!(backend.credential().as_deref(), Some("token"));
        assert!(gateway.list_conversations().await.unwrap().is_empty());
        assert_eq!(backend.calls(Endpoint::ListConversations), 1);
    }

    #[tokio::test]
    async fn test_error_conversion() {
        let backend = TestBackend::default();
        backend.fail(
            Endpoint::DeleteConversation,
            TestError::new(sophia_backend::ErrorKind::Transport),
        );
        let gateway = Gateway::new(backend);
        let err = gateway
            .delete_conversation(&ConversationId::new("A"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.payload().is_none());
    }
}
