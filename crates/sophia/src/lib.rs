//! An out-of-the-box client for the SophiaAI assistant service.
//!
//! The crate includes a CLI tool for chatting in the terminal. And you can
//! also use it as a library, the [`Client`] ties the session, the
//! conversation list and the HTTP backend together.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod client;

pub use client::{Client, ClientBuilder};

/// Re-exports of [`sophia_core`] crate.
pub mod core {
    pub use sophia_core::*;
}

/// Re-exports of [`sophia_http_backend`] crate.
pub mod http {
    pub use sophia_http_backend::*;
}
