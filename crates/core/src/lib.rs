//! Client-side state for the SophiaAI assistant: the signed-in session, the
//! conversation list with lazily loaded messages, and the guest chat.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod conversation;
mod error;
mod gateway;
mod guest;
pub mod session;
mod store;

pub use error::{Error, ErrorKind};
pub use gateway::Gateway;
pub use guest::{GuestChat, strip_markup};
pub use session::SessionStore;
pub use store::{ConversationStore, ConversationStoreBuilder, StoreSnapshot};

pub use sophia_backend::{
    Attachment, ConversationId, Identity, LoginOutcome, OtpChallenge, Role,
    User,
};
