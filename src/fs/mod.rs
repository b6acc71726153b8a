//! reference static file handler: GET/HEAD/OPTIONS and, when enabled,
//! PUT/DELETE plus directory listings, all confined to a document root.

mod chunk;
mod error;
mod list;

pub use self::chunk::ChunkReader;
pub use self::error::ServeError;

use std::{
    future::poll_fn,
    io,
    path::{Component, Path, PathBuf},
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use futures_core::stream::Stream;
use http::{
    Method, Request, Response, StatusCode,
    header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED, LOCATION, TRANSFER_ENCODING},
};
use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;

use crate::{
    body::ResponseBody, config::ServerConfig, h1::RequestBody, page, pool::BufferPool,
    service::HttpService,
};

// distinguishes concurrent uploads targeting the same file name.
static PUT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem backed request handler rooted at a document directory.
pub struct StaticFiles {
    root: PathBuf,
    list: bool,
    write: bool,
    charset: String,
    pool: Arc<BufferPool>,
}

impl StaticFiles {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root: config.root.clone(),
            list: config.list,
            write: config.write,
            charset: config.charset.clone(),
            pool: Arc::new(BufferPool::new(
                config.static_buffer_cache,
                config.buffer_size,
            )),
        }
    }
}

impl HttpService for StaticFiles {
    async fn call(&self, req: Request<RequestBody>) -> Response<ResponseBody> {
        let raw_path = req.uri().path().to_owned();
        let decoded = match percent_decode_str(&raw_path).decode_utf8() {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => return page::bad_request(),
        };

        let method = req.method().clone();

        let res = if method == Method::GET {
            self.serve(&raw_path, &decoded, false).await
        } else if method == Method::HEAD {
            self.serve(&raw_path, &decoded, true).await
        } else if method == Method::OPTIONS {
            self.options(&decoded).await
        } else if method == Method::PUT && self.write {
            self.put(req, &decoded).await
        } else if method == Method::DELETE && self.write {
            self.delete(&decoded).await
        } else {
            Err(ServeError::MethodNotAllowed)
        };

        res.unwrap_or_else(ServeError::into_response)
    }
}

impl StaticFiles {
    /// Join the decoded request path onto the root, resolving `.` and `..`
    /// and refusing anything that would step outside.
    fn resolve(&self, decoded: &str) -> Result<PathBuf, ServeError> {
        if decoded.contains('\0') {
            return Err(ServeError::Forbidden);
        }

        let mut kept = Vec::new();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(c) => kept.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    if kept.pop().is_none() {
                        return Err(ServeError::Forbidden);
                    }
                }
                Component::Prefix(_) | Component::RootDir => return Err(ServeError::Forbidden),
            }
        }

        let mut path = self.root.clone();
        for c in kept {
            path.push(c);
        }
        Ok(path)
    }

    async fn serve(
        &self,
        raw_path: &str,
        decoded: &str,
        head: bool,
    ) -> Result<Response<ResponseBody>, ServeError> {
        let path = self.resolve(decoded)?;
        let md = tokio::fs::metadata(&path).await?;

        // a trailing slash names a directory; a file by that name is no match.
        if decoded.ends_with('/') && !md.is_dir() {
            return Err(ServeError::NotFound);
        }

        if md.is_dir() {
            let index = path.join("index.html");
            if let Ok(imd) = tokio::fs::metadata(&index).await {
                if imd.is_file() {
                    return self.serve_file(&index, &imd, head).await;
                }
            }

            if !self.list {
                return Err(ServeError::Forbidden);
            }

            if !decoded.ends_with('/') {
                return Ok(redirect(raw_path));
            }

            return self.listing(&path, decoded, head).await;
        }

        self.serve_file(&path, &md, head).await
    }

    async fn serve_file(
        &self,
        path: &Path,
        md: &std::fs::Metadata,
        head: bool,
    ) -> Result<Response<ResponseBody>, ServeError> {
        let file = tokio::fs::File::open(path).await?;
        let len = md.len();

        let mut builder = Response::builder()
            .header(CONTENT_TYPE, self.content_type(path))
            .header(CONTENT_LENGTH, len);

        if let Ok(modified) = md.modified() {
            builder = builder.header(LAST_MODIFIED, httpdate::fmt_http_date(modified));
        }

        let body = if head {
            ResponseBody::None
        } else {
            ResponseBody::stream(ChunkReader::new(file, len, self.pool.checkout()))
        };

        Ok(builder.body(body).unwrap())
    }

    async fn listing(
        &self,
        path: &Path,
        decoded: &str,
        head: bool,
    ) -> Result<Response<ResponseBody>, ServeError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(list::Entry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let at_root = decoded == "/";
        let title = if at_root {
            "/"
        } else {
            decoded.trim_end_matches('/').rsplit('/').next().unwrap_or("/")
        };

        let html = list::render(title, at_root, &entries);

        let builder = Response::builder()
            .header(CONTENT_TYPE, format!("text/html; charset={}", self.charset))
            .header(CONTENT_LENGTH, html.len());

        let body = if head {
            ResponseBody::None
        } else {
            ResponseBody::from(html)
        };

        Ok(builder.body(body).unwrap())
    }

    async fn options(&self, decoded: &str) -> Result<Response<ResponseBody>, ServeError> {
        let path = self.resolve(decoded)?;

        let allow = match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_dir() => "GET, HEAD, OPTIONS",
            Ok(_) => "GET, HEAD, PUT, DELETE, OPTIONS",
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // an absent target below an existing directory can be created.
                let parent = path.parent().ok_or(ServeError::NotFound)?;
                match tokio::fs::metadata(parent).await {
                    Ok(pmd) if pmd.is_dir() => "PUT, OPTIONS",
                    _ => return Err(ServeError::NotFound),
                }
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Response::builder()
            .header(ALLOW, allow)
            .body(ResponseBody::bytes(Bytes::new()))
            .unwrap())
    }

    async fn put(
        &self,
        req: Request<RequestBody>,
        decoded: &str,
    ) -> Result<Response<ResponseBody>, ServeError> {
        // only identity framed bodies are accepted.
        for (name, value) in req.headers() {
            if let Some(rest) = name.as_str().strip_prefix("content-") {
                let acceptable = match rest {
                    "length" | "type" => true,
                    "encoding" => value.as_bytes().eq_ignore_ascii_case(b"identity"),
                    _ => false,
                };
                if !acceptable {
                    return Err(ServeError::MethodNotAllowed);
                }
            }
        }
        if let Some(te) = req.headers().get(TRANSFER_ENCODING) {
            if !te.as_bytes().eq_ignore_ascii_case(b"identity") {
                return Err(ServeError::MethodNotAllowed);
            }
        }

        let path = self.resolve(decoded)?;

        let existed = match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_dir() => return Err(ServeError::Forbidden),
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let parent = path.parent().ok_or(ServeError::Forbidden)?;
        match tokio::fs::metadata(parent).await {
            Ok(pmd) if pmd.is_dir() => {}
            _ => return Err(ServeError::Forbidden),
        }

        // write through a temp file next to the target and rename into place,
        // so a failed upload never corrupts an existing file.
        let file_name = path
            .file_name()
            .ok_or(ServeError::Forbidden)?
            .to_string_lossy()
            .into_owned();
        let tmp = parent.join(format!(
            ".{file_name}.{}.put",
            PUT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = self.receive_into(&tmp, req.into_body()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        if existed {
            Ok(Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(ResponseBody::None)
                .unwrap())
        } else {
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .body(ResponseBody::bytes(Bytes::new()))
                .unwrap())
        }
    }

    async fn receive_into(&self, tmp: &Path, mut body: RequestBody) -> Result<(), ServeError> {
        let mut file = tokio::fs::File::create(tmp).await?;
        // one file side buffer stages every write of this upload.
        let mut staging = self.pool.checkout();

        while let Some(res) = poll_fn(|cx| Pin::new(&mut body).poll_next(cx)).await {
            let bytes = res.map_err(ServeError::Io)?;
            for part in bytes.chunks(staging.len()) {
                staging[..part.len()].copy_from_slice(part);
                file.write_all(&staging[..part.len()]).await?;
            }
        }

        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, decoded: &str) -> Result<Response<ResponseBody>, ServeError> {
        let path = self.resolve(decoded)?;

        let md = tokio::fs::metadata(&path).await?;
        if md.is_dir() {
            return Err(ServeError::Forbidden);
        }

        tokio::fs::remove_file(&path).await?;

        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(ResponseBody::None)
            .unwrap())
    }

    fn content_type(&self, path: &Path) -> String {
        // .properties files are plain text but mime databases miss them.
        let essence = if path.extension().is_some_and(|ext| ext == "properties") {
            "text/plain"
        } else {
            mime_guess::from_path(path)
                .first_raw()
                .unwrap_or("application/octet-stream")
        };

        if essence.starts_with("text/")
            || essence == "application/json"
            || essence == "application/xhtml+xml"
        {
            format!("{essence}; charset={}", self.charset)
        } else {
            essence.to_string()
        }
    }
}

fn redirect(raw_path: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, format!("{raw_path}/"))
        .body(ResponseBody::bytes(Bytes::new()))
        .unwrap()
}
