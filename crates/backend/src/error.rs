use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received from the server.
    Transport,
    /// The server answered with a failure, either a non-2xx status or a
    /// body whose `status` field is not `"success"`.
    Server,
    /// The server answered successfully but the body could not be
    /// understood.
    InvalidResponse,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "Transport failure"),
            ErrorKind::Server => write!(f, "Server failure"),
            ErrorKind::InvalidResponse => write!(f, "Invalid response"),
        }
    }
}
