//! end to end tests over real sockets: raw request bytes in, parsed
//! responses out.

use std::{
    io::{Read, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

use tempfile::TempDir;

use ksah::{Server, ServerConfig, ServerHandle, StaticFiles};

struct TestServer {
    addr: std::net::SocketAddr,
    handle: ServerHandle,
    root: TempDir,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = TempDir::new().unwrap();

        let mut config = ServerConfig::default();
        config.address = String::from("127.0.0.1");
        config.port = Some(0);
        config.root = root.path().to_path_buf();
        configure(&mut config);

        let files = StaticFiles::new(&config);
        let server = Server::bind(config).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();

        let thread = thread::spawn(move || {
            let _ = server.run(files);
        });

        Self {
            addr,
            handle,
            root,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Reply {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_head(stream: &mut TcpStream) -> (Reply, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut tmp).expect("read response head");
        assert!(n > 0, "connection closed before a complete response head");
        buf.extend_from_slice(&tmp[..n]);
    };

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);
    let parsed = res.parse(&buf[..head_end]).unwrap();
    assert!(parsed.is_complete());

    let reply = Reply {
        status: res.code.unwrap(),
        reason: res.reason.unwrap().to_string(),
        headers: headers
            .iter()
            .take_while(|h| !h.name.is_empty())
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8(h.value.to_vec()).unwrap(),
                )
            })
            .collect(),
        body: Vec::new(),
    };

    (reply, buf[head_end..].to_vec())
}

/// Read one response, consuming exactly `Content-Length` body bytes when the
/// header is present.
fn read_reply(stream: &mut TcpStream) -> Reply {
    let (mut reply, mut body) = read_head(stream);

    if let Some(len) = reply.header("content-length").map(|v| v.parse::<usize>().unwrap()) {
        let mut tmp = [0u8; 4096];
        while body.len() < len {
            let n = stream.read(&mut tmp).expect("read response body");
            assert!(n > 0, "connection closed mid response body");
            body.extend_from_slice(&tmp[..n]);
        }
        body.truncate(len);
    }

    reply.body = body;
    reply
}

fn get(server: &TestServer, target: &str) -> Reply {
    let mut stream = server.connect();
    stream
        .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .unwrap();
    read_reply(&mut stream)
}

// deterministic byte noise, no rng dependency needed.
fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545f491u64;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

#[test]
fn serves_directory_index() {
    let server = TestServer::start(|_| {});
    std::fs::create_dir(server.root.path().join("dir1")).unwrap();
    std::fs::write(
        server.root.path().join("dir1/index.html"),
        b"<html><body>Test Index</body></html>",
    )
    .unwrap();

    let reply = get(&server, "/dir1/");

    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-length"), Some("36"));
    assert_eq!(reply.body, b"<html><body>Test Index</body></html>");
    assert!(reply.header("content-type").unwrap().starts_with("text/html"));
}

#[test]
fn missing_file_reason_phrase() {
    let server = TestServer::start(|_| {});

    let reply = get(&server, "/foo/bar/baz.html");

    assert_eq!(reply.status, 404);
    assert_eq!(reply.reason, "File Not Found");
}

#[test]
fn put_get_delete_round_trip() {
    let server = TestServer::start(|config| config.write = true);
    let body = noise(43008);

    let mut stream = server.connect();
    stream
        .write_all(
            format!(
                "PUT /test.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        )
        .unwrap();
    stream.write_all(&body).unwrap();
    assert_eq!(read_reply(&mut stream).status, 201);
    drop(stream);

    let reply = get(&server, "/test.txt");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-length"), Some("43008"));
    assert_eq!(reply.body, body);

    let mut stream = server.connect();
    stream
        .write_all(b"DELETE /test.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream).status, 204);
    drop(stream);

    assert_eq!(get(&server, "/test.txt").status, 404);
}

#[test]
fn put_content_encoding_gate() {
    let server = TestServer::start(|config| config.write = true);

    // rejected before the body is read.
    let mut stream = server.connect();
    stream
        .write_all(
            b"PUT /test.txt HTTP/1.1\r\nHost: localhost\r\n\
              Content-Length: 4\r\nContent-Encoding: gzip\r\n\r\n",
        )
        .unwrap();
    assert_eq!(read_reply(&mut stream).status, 405);
    drop(stream);

    let mut stream = server.connect();
    stream
        .write_all(
            b"PUT /test.txt HTTP/1.1\r\nHost: localhost\r\n\
              Content-Length: 4\r\nContent-Encoding: identity\r\n\r\ntest",
        )
        .unwrap();
    assert_eq!(read_reply(&mut stream).status, 201);

    assert_eq!(get(&server, "/test.txt").body, b"test");
}

#[test]
fn options_on_existing_file() {
    let server = TestServer::start(|config| config.write = true);
    std::fs::write(server.root.path().join("file.txt"), b"x").unwrap();

    let mut stream = server.connect();
    stream
        .write_all(b"OPTIONS /file.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("allow"), Some("GET, HEAD, PUT, DELETE, OPTIONS"));
}

#[test]
fn listing_with_unencoded_spaces_in_target() {
    let server = TestServer::start(|_| {});
    let dir = server.root.path().join("foo/bar baz/blub");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("test.html"), b"x").unwrap();

    let mut stream = server.connect();
    stream
        .write_all(b"GET /foo/bar baz/blub/ HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 200);
    assert_eq!(
        String::from_utf8(reply.body).unwrap(),
        "<!DOCTYPE html>\n<html>\n<head><title>blub</title></head>\n<body>\n\
         <h1>blub</h1>\n<ul>\n\
         <li><a href=\"..\">..</a></li>\n\
         <li><a href=\"test.html\">test.html</a></li>\n\
         </ul>\n</body>\n</html>\n"
    );
}

#[test]
fn keep_alive_serves_multiple_requests() {
    let server = TestServer::start(|_| {});
    std::fs::write(server.root.path().join("a.txt"), b"first").unwrap();
    std::fs::write(server.root.path().join("b.txt"), b"second").unwrap();

    let mut stream = server.connect();

    stream
        .write_all(b"GET /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let reply = read_reply(&mut stream);
    assert_eq!(reply.header("connection"), Some("keep-alive"));
    assert_eq!(reply.body, b"first");

    stream
        .write_all(b"GET /b.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let reply = read_reply(&mut stream);
    assert_eq!(reply.body, b"second");
}

#[test]
fn http10_closes_by_default() {
    let server = TestServer::start(|_| {});
    std::fs::write(server.root.path().join("a.txt"), b"x").unwrap();

    let mut stream = server.connect();
    stream.write_all(b"GET /a.txt HTTP/1.0\r\n\r\n").unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("connection"), Some("close"));

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn missing_host_is_bad_request() {
    let server = TestServer::start(|_| {});

    let mut stream = server.connect();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("connection"), Some("close"));

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn oversized_head_is_entity_too_large() {
    let server = TestServer::start(|config| config.rcvbuf = 2048);

    let mut stream = server.connect();
    // sized so the head hits the bound exactly when the padding is consumed.
    let prefix: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Pad: ";
    stream.write_all(prefix).unwrap();
    stream.write_all(&vec![b'a'; 2048 - prefix.len()]).unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 413);
    assert_eq!(reply.reason, "Entity Too Large");
    assert_eq!(reply.header("connection"), Some("close"));
}

#[test]
fn expect_continue_flow() {
    let server = TestServer::start(|config| config.write = true);

    let mut stream = server.connect();
    stream
        .write_all(
            b"PUT /cont.txt HTTP/1.1\r\nHost: localhost\r\n\
              Content-Length: 5\r\nExpect: 100-continue\r\n\r\n",
        )
        .unwrap();

    let interim = read_reply(&mut stream);
    assert_eq!(interim.status, 100);
    assert_eq!(interim.header("content-length"), Some("0"));

    stream.write_all(b"hello").unwrap();
    assert_eq!(read_reply(&mut stream).status, 201);

    assert_eq!(get(&server, "/cont.txt").body, b"hello");
}

#[test]
fn head_sends_headers_only() {
    let server = TestServer::start(|_| {});
    std::fs::write(server.root.path().join("a.txt"), b"hello").unwrap();

    let mut stream = server.connect();
    stream
        .write_all(b"HEAD /a.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();

    let (reply, residual) = read_head(&mut stream);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-length"), Some("5"));
    assert!(residual.is_empty());

    // connection closes without any body bytes following the head.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn connection_cap_yields_503() {
    let server = TestServer::start(|config| {
        config.max_connections = 1;
        config.timeout = Duration::from_secs(10);
    });

    let held = server.connect();
    // give the acceptor a moment to register the held connection.
    thread::sleep(Duration::from_millis(100));

    let mut stream = server.connect();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 503);
    assert_eq!(reply.header("connection"), Some("close"));

    drop(held);
}

#[test]
fn non_ascii_file_names_round_trip() {
    let server = TestServer::start(|_| {});
    std::fs::write(server.root.path().join("grüße.txt"), b"servus").unwrap();

    // percent-encoded request target.
    let reply = get(&server, "/gr%C3%BC%C3%9Fe.txt");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"servus");

    // raw utf-8 bytes in the request line work as well.
    let mut stream = server.connect();
    stream
        .write_all("GET /grüße.txt HTTP/1.1\r\nHost: localhost\r\n\r\n".as_bytes())
        .unwrap();
    assert_eq!(read_reply(&mut stream).status, 200);
}
