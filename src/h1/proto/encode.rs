use bytes::BytesMut;
use http::{
    header::{CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, DATE, EXPIRES, HeaderName, PRAGMA},
    response::Parts,
};
use tracing::debug;

use crate::{body::BodySize, date::DateTime, page::Reason};

use super::{codec::TransferCoding, context::Context};

/// Interim response flushed before the first body read of a request that
/// asked for `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\nContent-Length: 0\r\n\r\n";

const SERVER_HEADER: &[u8] = concat!("\r\nServer: ksah/", env!("CARGO_PKG_VERSION")).as_bytes();

impl<D> Context<'_, D>
where
    D: DateTime,
{
    /// Commit a response: assemble the status line and header block into the
    /// write buffer and return the body encoder. After this call only body
    /// bytes may be produced for the current exchange.
    pub fn encode_head(&mut self, parts: Parts, size: BodySize, buf: &mut BytesMut) -> TransferCoding {
        let Parts {
            status,
            mut headers,
            extensions,
            ..
        } = parts;

        // connection decision happens at commit time. error statuses and an
        // exhausted keep-alive budget override the client's preference.
        match status.as_u16() {
            400 | 413 | 503 => self.set_close(),
            _ => {
                let budget = self.keep_alive_budget();
                if budget.is_zero() || self.date().now().duration_since(self.started()) > budget {
                    self.set_close();
                }
            }
        }

        // responses are always emitted as http/1.1.
        let reason = extensions
            .get::<Reason>()
            .map(|r| r.0)
            .or_else(|| status.canonical_reason())
            .unwrap_or("Unknown");

        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(status.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(reason.as_bytes());

        buf.extend_from_slice(SERVER_HEADER);

        if self.is_connection_closed() {
            buf.extend_from_slice(b"\r\nConnection: close");
        } else {
            buf.extend_from_slice(b"\r\nConnection: keep-alive");
        }

        if !headers.contains_key(DATE) {
            buf.reserve(D::DATE_VALUE_LENGTH + 8);
            buf.extend_from_slice(b"\r\nDate: ");
            self.date().with_date(|date| buf.extend_from_slice(date));
        }

        // no-cache defaults, unless the handler overrode them.
        if !headers.contains_key(CACHE_CONTROL) {
            buf.extend_from_slice(b"\r\nCache-Control: no-cache, no-store, must-revalidate");
        }
        if !headers.contains_key(PRAGMA) {
            buf.extend_from_slice(b"\r\nPragma: no-cache");
        }
        if !headers.contains_key(EXPIRES) {
            buf.extend_from_slice(b"\r\nExpires: 0");
        }

        let mut encoding = TransferCoding::eof();
        let mut length_set = false;

        let mut name = HeaderName::from_static("server");
        for (next_name, value) in headers.drain() {
            let is_multi_value = next_name
                .map(|next_name| {
                    name = next_name;
                    false
                })
                .unwrap_or(true);

            if name == CONNECTION {
                // the connection value is owned by the engine.
                debug!(target: "h1_encode", "handler supplied connection header is ignored");
                continue;
            }

            if name == CONTENT_LENGTH {
                match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
                    Some(len) => {
                        encoding = TransferCoding::length(len);
                        length_set = true;
                    }
                    None => {
                        debug!(target: "h1_encode", "handler supplied malformed content-length is ignored");
                        continue;
                    }
                }
            }

            let value = value.as_bytes();
            if is_multi_value {
                buf.reserve(value.len() + 2);
                buf.extend_from_slice(b", ");
                buf.extend_from_slice(value);
            } else {
                let name = name.as_str().as_bytes();
                buf.reserve(name.len() + value.len() + 4);
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(name);
                buf.extend_from_slice(b": ");
                buf.extend_from_slice(value);
            }
        }

        // derive the length header from the body when the handler set none.
        if !length_set {
            if let BodySize::Sized(size) = size {
                write_length_header(buf, size);
                encoding = TransferCoding::length(size as u64);
            }
        }

        // a HEAD response carries the headers of the matching GET but no body.
        if self.is_head_method() {
            encoding = TransferCoding::eof();
        }

        buf.extend_from_slice(b"\r\n\r\n");

        // hand the emptied map back for reuse by the next request.
        self.replace_headers(headers);

        encoding
    }
}

fn write_length_header(buf: &mut BytesMut, size: usize) {
    let mut buffer = itoa::Buffer::new();
    let size = buffer.format(size).as_bytes();

    buf.reserve(size.len() + 18);
    buf.extend_from_slice(b"\r\nContent-Length: ");
    buf.extend_from_slice(size);
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use http::{Response, StatusCode, header::HeaderValue};

    use crate::{body::ResponseBody, date::SystemTimeDate, page};

    use super::*;

    fn ctx() -> Context<'static, SystemTimeDate> {
        Context::new(&SystemTimeDate, 65536, Duration::from_secs(10))
    }

    fn parse(buf: &BytesMut) -> Vec<(String, String)> {
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut res = httparse::Response::new(&mut headers);
        let httparse::Status::Complete(_) = res.parse(buf.as_ref()).unwrap() else {
            panic!("incomplete response head")
        };
        headers
            .iter()
            .take_while(|h| !h.name.is_empty())
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8(h.value.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> &'a str {
        &headers.iter().find(|(n, _)| n == name).unwrap().1
    }

    #[test]
    fn prelude_defaults() {
        let mut ctx = ctx();
        let mut buf = BytesMut::new();

        let res = Response::new(ResponseBody::bytes("hello"));
        let (parts, body) = res.into_parts();
        let size = BodySize::from_stream(&body);

        let encoding = ctx.encode_head(parts, size, &mut buf);
        assert_eq!(encoding, TransferCoding::length(5));

        assert!(buf.starts_with(b"HTTP/1.1 200 OK\r\n"));

        let headers = parse(&buf);
        assert!(header(&headers, "server").starts_with("ksah/"));
        assert_eq!(header(&headers, "connection"), "keep-alive");
        assert_eq!(header(&headers, "content-length"), "5");
        assert_eq!(
            header(&headers, "cache-control"),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(header(&headers, "pragma"), "no-cache");
        assert_eq!(header(&headers, "expires"), "0");
        assert_eq!(header(&headers, "date").len(), crate::date::DATE_VALUE_LENGTH);
    }

    #[test]
    fn custom_reason_phrase() {
        let mut ctx = ctx();
        let mut buf = BytesMut::new();

        let (parts, body) = page::not_found().into_parts();
        let size = BodySize::from_stream(&body);
        ctx.encode_head(parts, size, &mut buf);

        assert!(buf.starts_with(b"HTTP/1.1 404 File Not Found\r\n"));
    }

    #[test]
    fn error_statuses_close() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::PAYLOAD_TOO_LARGE,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let mut ctx = ctx();
            let mut buf = BytesMut::new();

            let mut res = Response::new(ResponseBody::None);
            *res.status_mut() = status;
            let (parts, body) = res.into_parts();
            ctx.encode_head(parts, BodySize::from_stream(&body), &mut buf);

            let headers = parse(&buf);
            assert_eq!(header(&headers, "connection"), "close");
            assert!(ctx.is_connection_closed());
        }
    }

    #[test]
    fn zero_budget_disables_keep_alive() {
        let mut ctx = Context::new(&SystemTimeDate, 65536, Duration::ZERO);
        let mut buf = BytesMut::new();

        let (parts, body) = Response::new(ResponseBody::None).into_parts();
        ctx.encode_head(parts, BodySize::from_stream(&body), &mut buf);

        let headers = parse(&buf);
        assert_eq!(header(&headers, "connection"), "close");
    }

    #[test]
    fn handler_headers_override_defaults() {
        let mut ctx = ctx();
        let mut buf = BytesMut::new();

        let mut res = Response::new(ResponseBody::bytes("hi"));
        res.headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        res.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("2"));

        let (parts, body) = res.into_parts();
        let encoding = ctx.encode_head(parts, BodySize::from_stream(&body), &mut buf);
        assert_eq!(encoding, TransferCoding::length(2));

        let headers = parse(&buf);
        assert_eq!(header(&headers, "cache-control"), "max-age=60");
        assert_eq!(
            headers.iter().filter(|(n, _)| n == "cache-control").count(),
            1
        );
        assert_eq!(headers.iter().filter(|(n, _)| n == "content-length").count(), 1);
    }

    #[test]
    fn head_response_keeps_length_drops_body() {
        let mut ctx = ctx();
        ctx.set_head_method();

        let mut buf = BytesMut::new();
        let (parts, body) = Response::new(ResponseBody::bytes("hello")).into_parts();
        let encoding = ctx.encode_head(parts, BodySize::from_stream(&body), &mut buf);

        assert!(encoding.is_eof());
        assert_eq!(header(&parse(&buf), "content-length"), "5");
    }

    #[test]
    fn body_encoding_appends_after_head() {
        let mut ctx = ctx();
        let mut buf = BytesMut::new();

        let (parts, body) = Response::new(ResponseBody::bytes("hello")).into_parts();
        let mut encoder = ctx.encode_head(parts, BodySize::from_stream(&body), &mut buf);

        encoder.encode(Bytes::from("hello"), &mut buf);
        encoder.encode_eof();

        assert!(buf.ends_with(b"\r\n\r\nhello"));
    }
}
