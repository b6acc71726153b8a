//! ksah is a small asynchronous http/1.1 origin server for embedded and
//! microservice use.
//!
//! The engine accepts connections, incrementally parses request heads out of
//! pooled network buffers, streams request bodies to a single pluggable
//! [HttpService] handler and writes responses back with keep-alive reuse. A
//! filesystem handler ([StaticFiles]) is included as the reference handler:
//! file serving, directory listings and optional PUT/DELETE.
//!
//! ```no_run
//! use ksah::{Server, ServerConfig, StaticFiles};
//!
//! fn main() -> std::io::Result<()> {
//!     let mut config = ServerConfig::default();
//!     config.port = Some(8080);
//!
//!     let files = StaticFiles::new(&config);
//!     Server::bind(config)?.run(files)
//! }
//! ```

pub mod body;
pub mod config;
pub mod date;
pub mod fs;
pub mod h1;
pub mod page;
pub mod pool;
pub mod server;
pub mod service;

pub use self::body::ResponseBody;
pub use self::config::ServerConfig;
pub use self::fs::StaticFiles;
pub use self::h1::RequestBody;
pub use self::server::{Server, ServerHandle};
pub use self::service::HttpService;
