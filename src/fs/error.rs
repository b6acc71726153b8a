use core::fmt;

use std::io;

use http::Response;
use tracing::debug;

use crate::{body::ResponseBody, page};

/// High level failure while serving a filesystem request. Every variant maps
/// onto exactly one canned status page.
#[derive(Debug)]
pub enum ServeError {
    /// target does not exist.
    NotFound,
    /// target escapes the root, is a directory where a file is required, or
    /// the filesystem denied access.
    Forbidden,
    /// method is not served for this target.
    MethodNotAllowed,
    /// any other filesystem failure.
    Io(io::Error),
}

impl ServeError {
    pub fn into_response(self) -> Response<ResponseBody> {
        match self {
            Self::NotFound => page::not_found(),
            Self::Forbidden => page::forbidden(),
            Self::MethodNotAllowed => page::method_not_allowed(),
            Self::Io(e) => {
                debug!(target: "static_files", "filesystem failure: {e}");
                page::internal_server_error()
            }
        }
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NotFound => f.write_str("file not found"),
            Self::Forbidden => f.write_str("access denied"),
            Self::MethodNotAllowed => f.write_str("method not allowed"),
            Self::Io(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl From<io::Error> for ServeError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::Forbidden,
            _ => Self::Io(e),
        }
    }
}
