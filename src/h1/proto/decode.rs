use bytes::BytesMut;
use http::{
    Method, Request, Uri, Version,
    header::{CONNECTION, CONTENT_LENGTH, EXPECT, HOST, HeaderName, HeaderValue},
};
use percent_encoding::{AsciiSet, CONTROLS, percent_encode};

use super::{codec::TransferCoding, context::Context, error::ProtoError};

type Decoded = (Request<()>, TransferCoding);

// ascii bytes a request target may carry in the clear but a uri may not.
// re-encoding them keeps the original bytes recoverable through a
// percent-decode on the handler side. '%' stays untouched so sequences the
// client already encoded survive the round trip.
const TARGET_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

impl<D> Context<'_, D> {
    /// Decode a request head from buffered input.
    ///
    /// `Ok(None)` means the head terminator has not arrived yet and the
    /// caller should read more. A complete head is split off the buffer and
    /// returned with the body decoder derived from its headers. Heads that
    /// cannot fit the receive buffer or fail validation surface as
    /// [ProtoError].
    pub fn decode_head(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtoError> {
        let Some(head_len) = find_head_end(buf) else {
            if buf.len() >= self.max_head_size() {
                return Err(ProtoError::HeadTooLarge);
            }
            return Ok(None);
        };

        if head_len > self.max_head_size() {
            return Err(ProtoError::HeadTooLarge);
        }

        self.reset();

        let head = buf.split_to(head_len);
        let lines = split_crlf(&head[..head_len - 4]);

        let Some(request_line_idx) = lines.iter().position(|l| !l.is_empty()) else {
            return Err(ProtoError::Method);
        };

        let (method, uri, version) = self.parse_request_line(lines[request_line_idx])?;

        let mut headers = self.take_headers();
        let mut decoder = TransferCoding::eof();
        let mut expect_requested = false;

        for line in &lines[request_line_idx + 1..] {
            if line.is_empty() {
                continue;
            }

            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(ProtoError::HeaderName)?;

            let name = trim_bytes(&line[..colon]);
            if name.is_empty() {
                return Err(ProtoError::HeaderName);
            }

            let name = HeaderName::from_bytes(name).map_err(|_| ProtoError::HeaderName)?;
            let value = HeaderValue::from_bytes(trim_bytes(&line[colon + 1..]))
                .map_err(|_| ProtoError::HeaderValue)?;

            if name == CONTENT_LENGTH {
                let len = parse_content_length(&value)?;
                decoder.try_set(TransferCoding::length(len))?;
            } else if name == CONNECTION {
                self.try_set_close_from_header(&value)?;
            } else if name == EXPECT {
                if !value.as_bytes().eq_ignore_ascii_case(b"100-continue") {
                    return Err(ProtoError::Expect);
                }
                expect_requested = true;
            }

            headers.append(name, value);
        }

        if version == Version::HTTP_11 && !headers.contains_key(HOST) {
            return Err(ProtoError::HostRequired);
        }

        // a zero length body is no body at all.
        if matches!(decoder, TransferCoding::Length(0)) {
            decoder = TransferCoding::eof();
        }

        // a pending 100 is only armed when the client still has the whole
        // body to send.
        if expect_requested
            && version == Version::HTTP_11
            && matches!(decoder, TransferCoding::Length(n) if n > 0)
            && buf.is_empty()
        {
            self.set_expect_header();
        }

        let mut req = Request::new(());
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.version_mut() = version;
        *req.headers_mut() = headers;

        Ok(Some((req, decoder)))
    }

    // `METHOD SP TARGET SP VERSION` where TARGET is everything between the
    // first and the last space, so unencoded spaces inside the target
    // survive.
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(Method, Uri, Version), ProtoError> {
        let line = std::str::from_utf8(line).map_err(|_| ProtoError::Target)?;

        let first = line.find(' ').ok_or(ProtoError::Version)?;
        let last = line.rfind(' ').unwrap();

        if first == 0 {
            return Err(ProtoError::Method);
        }

        let version = match &line[last + 1..] {
            "HTTP/1.1" => Version::HTTP_11,
            "HTTP/1.0" => {
                // HTTP/1.0 closes unless the client asks for keep-alive.
                self.set_close();
                Version::HTTP_10
            }
            _ => return Err(ProtoError::Version),
        };

        if last <= first {
            return Err(ProtoError::Target);
        }

        let target = line[first + 1..last].trim_matches(' ');
        if target.is_empty() {
            return Err(ProtoError::Target);
        }

        let method = Method::from_bytes(line[..first].to_ascii_uppercase().as_bytes())
            .map_err(|_| ProtoError::Method)?;

        if method == Method::HEAD {
            self.set_head_method();
        }

        Ok((method, normalize_target(target)?, version))
    }

    pub(super) fn try_set_close_from_header(&mut self, value: &HeaderValue) -> Result<(), ProtoError> {
        for val in value.to_str().map_err(|_| ProtoError::HeaderValue)?.split(',') {
            let val = val.trim();
            if val.eq_ignore_ascii_case("keep-alive") {
                self.remove_close()
            } else if val.eq_ignore_ascii_case("close") {
                self.set_close()
            }
        }
        Ok(())
    }
}

/// Position one past the CRLFCRLF head terminator, when present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn split_crlf(mut slice: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    while let Some(pos) = slice.windows(2).position(|w| w == b"\r\n") {
        lines.push(&slice[..pos]);
        slice = &slice[pos + 2..];
    }
    if !slice.is_empty() {
        lines.push(slice);
    }
    lines
}

fn trim_bytes(mut slice: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = slice {
        slice = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = slice {
        slice = rest;
    }
    slice
}

/// Reduce a request target to its path form: absolute-form targets are
/// stripped through the first `/` after the authority, origin-form targets
/// get a leading `/` ensured.
fn normalize_target(target: &str) -> Result<Uri, ProtoError> {
    let path = if let Some(pos) = target.find("://") {
        let after_authority = &target[pos + 3..];
        match after_authority.find('/') {
            Some(slash) => &after_authority[slash..],
            None => "/",
        }
    } else {
        target
    };

    let mut encoded = percent_encode(path.as_bytes(), TARGET_ENCODE).to_string();
    if !encoded.starts_with('/') {
        encoded.insert(0, '/');
    }

    Uri::try_from(encoded).map_err(ProtoError::from)
}

fn parse_content_length(value: &HeaderValue) -> Result<u64, ProtoError> {
    let value = value.to_str().map_err(|_| ProtoError::ContentLength)?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtoError::ContentLength);
    }
    value.parse().map_err(|_| ProtoError::ContentLength)
}
