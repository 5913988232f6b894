use std::borrow::Cow;
use std::fmt::{self, Display};

use serde_json::Value;
use sophia_backend::{BackendError, ErrorKind as BackendErrorKind};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received from the server.
    Transport,
    /// The server reported a failure.
    Server,
    /// The server answered with something the client cannot understand.
    InvalidResponse,
    /// A message was sent while no conversation is active.
    NoActiveConversation,
    /// The operation was superseded before it completed.
    Cancelled,
    /// The store has been shut down.
    Closed,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "Transport failure"),
            ErrorKind::Server => write!(f, "Server failure"),
            ErrorKind::InvalidResponse => write!(f, "Invalid response"),
            ErrorKind::NoActiveConversation => {
                write!(f, "No active conversation")
            }
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Closed => write!(f, "Store closed"),
        }
    }
}

impl From<BackendErrorKind> for ErrorKind {
    #[inline]
    fn from(kind: BackendErrorKind) -> Self {
        match kind {
            BackendErrorKind::Transport => ErrorKind::Transport,
            BackendErrorKind::Server => ErrorKind::Server,
            BackendErrorKind::InvalidResponse => ErrorKind::InvalidResponse,
        }
    }
}

/// Describes a failed client operation.
///
/// Errors raised by the backend keep the structured payload the server
/// sent, so the caller can show the server's own explanation.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
    payload: Option<Value>,
    fallback: Option<Cow<'static, str>>,
}

impl Error {
    #[inline]
    fn with_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            reason: None,
            payload: None,
            fallback: None,
        }
    }

    /// Creates a new error with the `NoActiveConversation` kind.
    #[inline]
    pub fn no_active_conversation() -> Self {
        Self::with_kind(ErrorKind::NoActiveConversation)
    }

    /// Creates a new error with the `Cancelled` kind.
    #[inline]
    pub fn cancelled() -> Self {
        Self::with_kind(ErrorKind::Cancelled)
    }

    /// Creates a new error with the `Closed` kind.
    #[inline]
    pub fn closed() -> Self {
        Self::with_kind(ErrorKind::Closed)
    }

    /// Converts a backend error, keeping its message and payload.
    pub fn from_backend<E: BackendError>(err: &E) -> Self {
        Self {
            kind: err.kind().into(),
            reason: Some(err.to_string()),
            payload: err.payload().cloned(),
            fallback: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    /// Sets the message shown to users when the server sent no payload.
    #[inline]
    pub fn with_fallback<S: Into<Cow<'static, str>>>(
        self,
        fallback: S,
    ) -> Self {
        Self {
            fallback: Some(fallback.into()),
            ..self
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the payload the server sent with the failure, if any.
    #[inline]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }

    /// Returns the message to show to users.
    ///
    /// Prefers the `error` or `message` field of the server payload, then
    /// the fallback, then the reason.
    pub fn display_message(&self) -> Cow<'_, str> {
        let from_payload = self.payload.as_ref().and_then(|payload| {
            ["error", "message"]
                .iter()
                .find_map(|field| payload.get(field)?.as_str())
        });
        if let Some(message) = from_payload {
            return Cow::Borrowed(message);
        }
        match &self.fallback {
            Some(fallback) => Cow::Borrowed(fallback.as_ref()),
            None => self.reason(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}
