mod builder;
mod mailbox;
mod state;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;

use sophia_backend::{Attachment, ConversationId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::conversation::{Conversation, ConversationKind, Message};
use crate::{Error, Gateway};
pub use builder::ConversationStoreBuilder;
use mailbox::{Command, Handle};
use state::{
    Activate, CreateDraft, Delete, InFlightSend, PendingFetch, PendingSend,
    Refresh, SendMessage, Snapshot,
};

type Reply<T> = oneshot::Sender<T>;
type ChangeCallback = Box<dyn Fn(&StoreSnapshot) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&Error) + Send + Sync>;

/// The conversation list of the signed-in user.
///
/// The store runs as a single task which owns all state. Handles are cheap
/// to clone, and every operation is a command processed in the order it
/// was issued. Network calls run as separate tasks that report back to the
/// store, so the store keeps handling commands while requests are in
/// flight.
///
/// The store stops when [`ConversationStore::shutdown`] is called or the
/// last handle is dropped. Operations on a stopped store fail with
/// [`crate::ErrorKind::Closed`].
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Handle>,
}

impl ConversationStore {
    /// Returns a builder for a store that talks to `gateway`.
    #[inline]
    pub fn builder(gateway: Gateway) -> ConversationStoreBuilder {
        ConversationStoreBuilder::with_gateway(gateway)
    }

    /// Reloads the conversation list from the server.
    ///
    /// Every conversation becomes an unloaded shell, the draft is dropped
    /// and in-flight message fetches are cancelled. An active pointer whose
    /// conversation vanished is cleared. If several refreshes overlap, a
    /// result older than the last applied one is ignored.
    pub async fn list_conversations(&self) -> Result<(), Error> {
        self.call(|reply| Refresh { reply: Some(reply) }).await?
    }

    /// Replaces the draft with a fresh one at the front of the list and
    /// makes it active.
    pub fn create_draft(&self, kind: ConversationKind) -> Result<(), Error> {
        self.post(CreateDraft(kind))
    }

    /// Moves the active pointer, `None` selecting the draft.
    ///
    /// Activating an unloaded conversation starts fetching its messages in
    /// the background. Failures are reported to the error callback.
    pub fn set_active(&self, id: Option<ConversationId>) -> Result<(), Error> {
        self.post(Activate { id, waiter: None })
    }

    /// Like [`ConversationStore::set_active`], but resolves once the
    /// messages of the conversation are available.
    pub async fn activate(
        &self,
        id: Option<ConversationId>,
    ) -> Result<(), Error> {
        self.call(|reply| Activate {
            id,
            waiter: Some(reply),
        })
        .await?
    }

    /// Deletes a conversation, `None` deleting the draft.
    ///
    /// The draft is removed locally. Other conversations are deleted on the
    /// server first, and the local state is untouched if that fails.
    pub async fn delete_conversation(
        &self,
        id: Option<ConversationId>,
    ) -> Result<(), Error> {
        self.call(|reply| Delete { id, reply }).await?
    }

    /// Sends a message to the active conversation and returns the reply.
    ///
    /// Blank text without files does nothing and returns `Ok(None)`. Sends
    /// issued while another one is in flight are queued. Each one targets
    /// the conversation that was active when it was issued.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<Message>, Error> {
        let text = text.to_owned();
        self.call(|reply| SendMessage {
            text,
            attachments,
            reply,
        })
        .await?
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> Result<StoreSnapshot, Error> {
        self.call(Snapshot).await
    }

    /// Stops the store and aborts its network tasks. Pending operations
    /// fail with [`crate::ErrorKind::Closed`].
    #[inline]
    pub fn shutdown(&self) {
        self.inner.kill();
    }

    #[inline]
    fn post<C: Command>(&self, cmd: C) -> Result<(), Error> {
        if self.inner.send(cmd) {
            Ok(())
        } else {
            Err(Error::closed())
        }
    }

    async fn call<T, C, F>(&self, f: F) -> Result<T, Error>
    where
        C: Command,
        F: FnOnce(Reply<T>) -> C,
    {
        let (tx, rx) = oneshot::channel();
        self.post(f(tx))?;
        rx.await.map_err(|_| Error::closed())
    }

    fn spawn_from_builder(builder: ConversationStoreBuilder) -> Self {
        let ConversationStoreBuilder {
            gateway,
            on_change,
            on_error,
            refresh_on_start,
        } = builder;

        let state = StoreState {
            gateway,
            conversations: vec![],
            active: None,
            processing: false,
            in_flight: None,
            pending_sends: Default::default(),
            fetches: Default::default(),
            list_generation: 0,
            applied_generation: 0,
            running_tasks: Default::default(),
            next_task_id: 1,
            on_change,
            on_error,
        };
        let store = Self {
            inner: Arc::new(mailbox::spawn(state)),
        };
        if refresh_on_start {
            store.post(Refresh { reply: None }).ok();
        }
        store
    }
}

impl Debug for ConversationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStore").finish_non_exhaustive()
    }
}

struct StoreState {
    gateway: Gateway,
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    processing: bool,
    in_flight: Option<InFlightSend>,
    pending_sends: VecDeque<PendingSend>,
    fetches: HashMap<ConversationId, PendingFetch>,
    list_generation: u64,
    applied_generation: u64,
    running_tasks: HashMap<u64, JoinHandle<()>>,
    next_task_id: u64,

    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
}

/// An owned copy of the store state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreSnapshot {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    processing: bool,
}

impl StoreSnapshot {
    /// Returns the conversations in display order.
    #[inline]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Returns the active pointer. `None` selects the draft.
    #[inline]
    pub fn active_id(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Returns the conversation the pointer resolves to.
    pub fn active_conversation(&self) -> Option<&Conversation> {
        match &self.active {
            Some(id) => self.get(id),
            None => self.draft(),
        }
    }

    /// Returns the draft, if any.
    #[inline]
    pub fn draft(&self) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.is_draft())
    }

    /// Returns the conversation with the given identifier.
    #[inline]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id() == Some(id))
    }

    /// Returns whether a message is being sent.
    #[inline]
    pub fn is_processing(&self) -> bool {
        self.processing
    }
}
