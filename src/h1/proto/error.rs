use core::fmt;

/// Failure while parsing a request head or assembling a response head.
#[derive(Debug)]
pub enum ProtoError {
    /// request head does not fit the receive buffer.
    HeadTooLarge,
    /// request line carries no method token.
    Method,
    /// request line carries no target.
    Target,
    /// version is not HTTP/1.0 or HTTP/1.1.
    Version,
    /// header line is not `name ":" value` or the name is not a token.
    HeaderName,
    HeaderValue,
    /// `Content-Length` is not a single non-negative integer.
    ContentLength,
    /// HTTP/1.1 request without a `Host` header.
    HostRequired,
    /// `Expect` with anything but `100-continue`.
    Expect,
    /// normalized target does not form a valid uri.
    Uri(http::uri::InvalidUri),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HeadTooLarge => f.write_str("request head exceeds receive buffer"),
            Self::Method => f.write_str("invalid request method"),
            Self::Target => f.write_str("invalid request target"),
            Self::Version => f.write_str("unsupported http version"),
            Self::HeaderName => f.write_str("invalid header name"),
            Self::HeaderValue => f.write_str("invalid header value"),
            Self::ContentLength => f.write_str("invalid content-length header"),
            Self::HostRequired => f.write_str("host header required for http/1.1"),
            Self::Expect => f.write_str("unsupported expect header"),
            Self::Uri(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl From<http::uri::InvalidUri> for ProtoError {
    fn from(e: http::uri::InvalidUri) -> Self {
        Self::Uri(e)
    }
}
