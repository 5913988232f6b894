use std::sync::Arc;

use sophia_backend::Backend;
use sophia_core::session::Storage;
use sophia_core::{
    ConversationStore, Error, Gateway, GuestChat, Identity, LoginOutcome,
    SessionStore, StoreSnapshot,
};

type ChangeCallback = Arc<dyn Fn(&StoreSnapshot) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// A client builder.
///
/// See [`Client`].
pub struct ClientBuilder {
    session: SessionStore,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
}

impl ClientBuilder {
    /// Creates a client builder with a backend and the storage that keeps
    /// the session across runs.
    pub fn new<B, S>(backend: B, storage: S) -> Self
    where
        B: Backend + 'static,
        S: Storage + 'static,
    {
        let session = SessionStore::new(Gateway::new(backend), storage);
        Self {
            session,
            on_change: None,
            on_error: None,
        }
    }

    /// Attaches a callback to be invoked when the conversation list
    /// changes.
    #[inline]
    pub fn on_change(
        mut self,
        on_change: impl Fn(&StoreSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Arc::new(on_change));
        self
    }

    /// Attaches a callback to be invoked for background failures of the
    /// conversation list.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Builds a new client. No identity is installed until
    /// [`Client::restore`] or a login.
    #[inline]
    pub fn build(self) -> Client {
        Client {
            session: self.session,
            store: None,
            on_change: self.on_change,
            on_error: self.on_error,
        }
    }
}

/// A SophiaAI client, like the app window that shows either the login form
/// or the conversations of the signed-in user.
///
/// While an identity is installed, the client holds a running
/// [`ConversationStore`]. Logging in starts a fresh one and logging out
/// shuts it down.
pub struct Client {
    session: SessionStore,
    store: Option<ConversationStore>,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
}

impl Client {
    /// Installs the identity persisted by an earlier run, if any. Returns
    /// whether the client is now signed in.
    ///
    /// # Panics
    ///
    /// Starting the conversation list spawns a task, so this panics when
    /// called outside a Tokio runtime.
    pub fn restore(&mut self) -> bool {
        if !self.session.restore() {
            return false;
        }
        self.start_store();
        true
    }

    /// Logs in with email and password. Must be awaited within a Tokio
    /// runtime, see [`Client::restore`].
    pub async fn login(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, Error> {
        let outcome = self.session.login(email, password).await?;
        if let LoginOutcome::Authenticated(_) = &outcome {
            self.start_store();
        }
        Ok(outcome)
    }

    /// Completes a login that asked for a one-time code. Must be awaited
    /// within a Tokio runtime, see [`Client::restore`].
    pub async fn verify_otp(
        &mut self,
        email: &str,
        otp: &str,
    ) -> Result<Identity, Error> {
        let identity = self.session.verify_otp(email, otp).await?;
        self.start_store();
        Ok(identity)
    }

    /// Signs out and stops the conversation list.
    pub fn logout(&mut self) {
        if let Some(store) = self.store.take() {
            store.shutdown();
        }
        self.session.logout();
    }

    /// Returns the session.
    #[inline]
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Returns the conversation list of the signed-in user.
    #[inline]
    pub fn conversations(&self) -> Option<&ConversationStore> {
        self.store.as_ref()
    }

    /// Starts a guest chat, which works without signing in.
    #[inline]
    pub fn guest(&self) -> GuestChat {
        GuestChat::new(self.session.gateway().clone())
    }

    fn start_store(&mut self) {
        if let Some(store) = self.store.take() {
            store.shutdown();
        }

        let gateway = self.session.gateway().clone();
        let mut builder = ConversationStore::builder(gateway);
        if let Some(on_change) = self.on_change.clone() {
            builder = builder.on_change(move |snapshot| on_change(snapshot));
        }
        if let Some(on_error) = self.on_error.clone() {
            builder = builder.on_error(move |err| on_error(err));
        }
        debug!("starting the conversation store");
        self.store = Some(builder.build());
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(store) = &self.store {
            store.shutdown();
        }
    }
}
