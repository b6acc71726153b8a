//! server configuration and the `<name> <value>` option surface.

use core::fmt;

use std::{path::PathBuf, time::Duration};

use tracing::warn;

use crate::pool::round_to_pow2;

/// Complete configuration snapshot a server is built from.
///
/// Options apply through [ServerConfig::apply] by their external name;
/// unknown names are ignored and unparsable values keep the default, so a
/// partially broken option list still yields a serving configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// bind interface.
    pub address: String,
    /// bind port. the only option without a default.
    pub port: Option<u16>,
    /// listen backlog.
    pub backlog: u32,
    /// SO_KEEPALIVE on accepted sockets.
    pub keepalive: bool,
    /// TCP_NODELAY on accepted sockets.
    pub nodelay: bool,
    /// SO_REUSEADDR on the listening socket.
    pub reuseaddress: bool,
    /// receive buffer size. doubles as the maximum request head size.
    pub rcvbuf: usize,
    /// send buffer size. doubles as the response write watermark.
    pub sndbuf: usize,
    /// total bytes of the request side buffer pool, kept at a power of two.
    pub buffercache: usize,
    /// socket read/write timeout.
    pub timeout: Duration,
    /// concurrent connection cap.
    pub max_connections: usize,
    /// keep-alive budget per connection. zero disables keep-alive.
    pub max_connection_time: Duration,
    /// document root of the static file handler.
    pub root: PathBuf,
    /// file read buffer size.
    pub buffer_size: usize,
    /// total bytes of the file side buffer pool.
    pub static_buffer_cache: usize,
    /// charset appended to text, json and xhtml content types.
    pub charset: String,
    /// directory listings enabled.
    pub list: bool,
    /// PUT/DELETE enabled.
    pub write: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0"),
            port: None,
            backlog: 1024,
            keepalive: true,
            nodelay: true,
            reuseaddress: true,
            rcvbuf: 65536,
            sndbuf: 65536,
            buffercache: 16 * 1024 * 1024,
            timeout: Duration::from_secs(2),
            max_connections: 1024,
            max_connection_time: Duration::from_millis(10_000),
            root: PathBuf::from("./www"),
            buffer_size: 65536,
            static_buffer_cache: 16 * 1024 * 1024,
            charset: String::from("UTF-8"),
            list: true,
            write: false,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from alternating `<name> <value>` arguments.
    pub fn from_pairs<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        if args.len() % 2 != 0 {
            return Err(ConfigError::OddArgumentCount);
        }

        let mut config = Self::default();
        for pair in args.chunks(2) {
            config.apply(pair[0].as_ref(), pair[1].as_ref());
        }
        Ok(config)
    }

    /// Apply a single named option. Unknown names are ignored.
    pub fn apply(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("port") {
            set_parsed(name, value, &mut self.port, |port: u16| Some(Some(port)));
        } else if name.eq_ignore_ascii_case("address") {
            self.address = value.to_string();
        } else if name.eq_ignore_ascii_case("backlog") {
            // non-positive values are ignored.
            set_parsed(name, value, &mut self.backlog, |v: i64| {
                (v > 0).then_some(v as u32)
            });
        } else if name.eq_ignore_ascii_case("keepalive") {
            set_bool(name, value, &mut self.keepalive);
        } else if name.eq_ignore_ascii_case("nodelay") {
            set_bool(name, value, &mut self.nodelay);
        } else if name.eq_ignore_ascii_case("reuseaddress") {
            set_bool(name, value, &mut self.reuseaddress);
        } else if name.eq_ignore_ascii_case("rcvbuf") {
            set_parsed(name, value, &mut self.rcvbuf, positive);
        } else if name.eq_ignore_ascii_case("sndbuf") {
            set_parsed(name, value, &mut self.sndbuf, positive);
        } else if name.eq_ignore_ascii_case("buffercache") {
            set_parsed(name, value, &mut self.buffercache, |v: usize| {
                Some(round_to_pow2(v))
            });
        } else if name.eq_ignore_ascii_case("timeout") {
            match parse_timeout(value) {
                Some(timeout) => self.timeout = timeout,
                None => warn!(target: "config", "ignoring malformed timeout value {value:?}"),
            }
        } else if name.eq_ignore_ascii_case("maxconnnections") {
            set_parsed(name, value, &mut self.max_connections, positive);
        } else if name.eq_ignore_ascii_case("maxconnectiontime") {
            set_parsed(name, value, &mut self.max_connection_time, |millis: u64| {
                Some(Duration::from_millis(millis))
            });
        } else if name.eq_ignore_ascii_case("root") {
            let root = PathBuf::from(value);
            if root.is_dir() {
                self.root = root;
            } else {
                warn!(target: "config", "ignoring root {value:?}: not a directory");
            }
        } else if name.eq_ignore_ascii_case("bufferSize") {
            // sizes below 1024 are ignored.
            set_parsed(name, value, &mut self.buffer_size, |v: usize| {
                (v >= 1024).then_some(v)
            });
        } else if name.eq_ignore_ascii_case("staticbuffercache") {
            set_parsed(name, value, &mut self.static_buffer_cache, Some);
        } else if name.eq_ignore_ascii_case("charset") {
            match normalize_charset(value) {
                Some(charset) => self.charset = charset.to_string(),
                None => warn!(target: "config", "ignoring unknown charset {value:?}"),
            }
        } else if name.eq_ignore_ascii_case("list") {
            set_bool(name, value, &mut self.list);
        } else if name.eq_ignore_ascii_case("write") {
            set_bool(name, value, &mut self.write);
        }
    }
}

/// Launcher level configuration failure.
#[derive(Debug)]
pub enum ConfigError {
    /// options come in `<name> <value>` pairs.
    OddArgumentCount,
    /// the launcher requires a port.
    MissingPort,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OddArgumentCount => f.write_str("options must come in <name> <value> pairs"),
            Self::MissingPort => f.write_str("the port option is mandatory"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn positive(v: i64) -> Option<usize> {
    (v > 0).then_some(v as usize)
}

fn set_parsed<T, V, F>(name: &str, value: &str, slot: &mut T, accept: F)
where
    V: std::str::FromStr,
    F: FnOnce(V) -> Option<T>,
{
    match value.parse::<V>().ok().and_then(accept) {
        Some(v) => *slot = v,
        None => warn!(target: "config", "ignoring invalid value {value:?} for option {name}"),
    }
}

fn set_bool(name: &str, value: &str, slot: &mut bool) {
    if value.eq_ignore_ascii_case("true") {
        *slot = true;
    } else if value.eq_ignore_ascii_case("false") {
        *slot = false;
    } else {
        warn!(target: "config", "ignoring invalid value {value:?} for option {name}");
    }
}

/// Parse a timeout of the form `<integer> ":" <TIME_UNIT>`.
fn parse_timeout(value: &str) -> Option<Duration> {
    let (amount, unit) = value.split_once(':')?;
    let amount = amount.trim().parse::<u64>().ok()?;

    let duration = match unit.trim().to_ascii_uppercase().as_str() {
        "NANOSECONDS" => Duration::from_nanos(amount),
        "MICROSECONDS" => Duration::from_micros(amount),
        "MILLISECONDS" => Duration::from_millis(amount),
        "SECONDS" => Duration::from_secs(amount),
        "MINUTES" => Duration::from_secs(amount.checked_mul(60)?),
        "HOURS" => Duration::from_secs(amount.checked_mul(3600)?),
        "DAYS" => Duration::from_secs(amount.checked_mul(86400)?),
        _ => return None,
    };

    Some(duration)
}

/// Normalize a charset name against the known registry, rejecting unknown
/// names.
fn normalize_charset(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_ascii_lowercase();
    let normalized = match lower.as_str() {
        "utf-8" | "utf8" => "UTF-8",
        "us-ascii" | "ascii" => "US-ASCII",
        "iso-8859-1" | "latin1" | "latin-1" => "ISO-8859-1",
        "utf-16" => "UTF-16",
        "utf-16le" => "UTF-16LE",
        "utf-16be" => "UTF-16BE",
        "windows-1252" | "cp1252" => "windows-1252",
        _ => return None,
    };
    Some(normalized)
}
