use super::{ConversationStore, StoreSnapshot};
use crate::{Error, Gateway};

/// [`ConversationStore`] builder.
pub struct ConversationStoreBuilder {
    pub(super) gateway: Gateway,
    pub(super) on_change: Option<Box<dyn Fn(&StoreSnapshot) + Send + Sync>>,
    pub(super) on_error: Option<Box<dyn Fn(&Error) + Send + Sync>>,
    pub(super) refresh_on_start: bool,
}

impl ConversationStoreBuilder {
    /// Creates a new builder with the specified gateway.
    #[inline]
    pub fn with_gateway(gateway: Gateway) -> Self {
        Self {
            gateway,
            on_change: None,
            on_error: None,
            refresh_on_start: true,
        }
    }

    /// Attaches a callback to be invoked after every state change.
    ///
    /// The callback runs on the store task, so it should return quickly.
    #[inline]
    pub fn on_change(
        mut self,
        on_change: impl Fn(&StoreSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Box::new(on_change));
        self
    }

    /// Attaches a callback to be invoked for failures that no caller is
    /// waiting for, such as the initial refresh or a background fetch.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Sets whether the conversation list is loaded as soon as the store
    /// starts. Defaults to `true`.
    #[inline]
    pub fn refresh_on_start(mut self, refresh: bool) -> Self {
        self.refresh_on_start = refresh;
        self
    }

    /// Builds and starts the store. Must be called within a Tokio runtime.
    #[inline]
    pub fn build(self) -> ConversationStore {
        ConversationStore::spawn_from_builder(self)
    }
}
