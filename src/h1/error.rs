use core::fmt;

use std::io;

use super::proto::error::ProtoError;

/// Per connection error. Most variants terminate the connection; protocol
/// errors are first turned into a canned error response.
#[derive(Debug)]
pub enum Error {
    /// a socket read or write did not complete within the configured timeout.
    Timeout,
    /// the peer closed or reset the connection mid exchange.
    Closed,
    /// socket or runtime failure.
    Io(io::Error),
    /// the response body stream failed mid transfer.
    Body(io::Error),
    /// request head failed to parse or validate.
    Proto(ProtoError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Timeout => f.write_str("socket operation timed out"),
            Self::Closed => f.write_str("connection closed by peer"),
            Self::Io(ref e) => fmt::Display::fmt(e, f),
            Self::Body(ref e) => write!(f, "response body failed: {e}"),
            Self::Proto(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}
