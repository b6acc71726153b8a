//! http/1 connection handling.

pub mod proto;

mod body;
mod dispatcher;
mod error;

pub use self::body::RequestBody;
pub use self::dispatcher::DispatchConfig;
pub use self::error::Error;

pub(crate) use self::dispatcher::run;
