//! An abstraction layer over the SophiaAI service.
//!
//! This crate establishes an unified protocol for the client to talk to
//! the remote service, so that the stores in the core crate can run
//! against the real HTTP API or a scripted fake without modification.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.
//!
//! Users of this crate may add some extra functionalities or wrappers,
//! depending on their own use cases. Those extra code should be placed
//! in their own crate.

#![deny(missing_docs)]

mod backend;
mod error;
mod request;
mod response;

pub use backend::*;
pub use error::*;
pub use request::*;
pub use response::*;
