use std::{
    future::poll_fn,
    io, mem,
    net::SocketAddr,
    pin::pin,
    rc::Rc,
    sync::Arc,
    task::Poll,
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use futures_core::stream::Stream;
use http::{Request, Response};
use tokio::{net::TcpStream, time::timeout};
use tracing::trace;

use crate::{
    body::{BodySize, ResponseBody},
    date::DateTime,
    page,
    pool::BufferPool,
    service::HttpService,
};

use super::{
    body::{BodyReader, Handback, RequestBody},
    error::Error,
    proto::{context::Context, error::ProtoError},
};

/// Per connection knobs snapshot taken from the server configuration.
#[derive(Clone, Copy)]
pub struct DispatchConfig {
    /// timeout applied to every socket read and write.
    pub timeout: Duration,
    /// request head bound, equal to the receive buffer size.
    pub max_head_size: usize,
    /// write buffer watermark above which buffered output is flushed.
    pub write_buf_limit: usize,
    /// keep-alive lifetime budget of a connection. zero disables keep-alive.
    pub keep_alive_budget: Duration,
}

/// Serve one connection until it closes.
///
/// Requests are decoded and answered strictly in sequence; at most one socket
/// read and one write are ever in flight, so per connection state needs no
/// synchronization.
pub(crate) async fn run<S, D>(
    io: TcpStream,
    addr: SocketAddr,
    config: DispatchConfig,
    pool: Arc<BufferPool>,
    service: &S,
    date: &D,
) -> Result<(), Error>
where
    S: HttpService,
    D: DateTime,
{
    let mut dispatcher = Dispatcher {
        io: Rc::new(io),
        ctx: Context::new(date, config.max_head_size, config.keep_alive_budget),
        service,
        pool,
        config,
        read_buf: BytesMut::new(),
        write_buf: BytesMut::new(),
        handback: Handback::new(),
    };

    loop {
        match dispatcher._run().await {
            Ok(()) => {}
            Err(Error::Proto(ProtoError::HeadTooLarge)) => {
                dispatcher.request_error(page::entity_too_large())
            }
            Err(Error::Proto(e)) => {
                trace!(target: "h1_dispatcher", "malformed request from {addr}: {e}");
                dispatcher.request_error(page::bad_request())
            }
            Err(Error::Timeout) => {
                trace!(target: "h1_dispatcher", "socket timed out: {addr}");
                dispatcher.ctx.set_close();
            }
            Err(Error::Closed) => {
                trace!(target: "h1_dispatcher", "connection reset by peer: {addr}");
                dispatcher.ctx.set_close();
            }
            Err(e) => return Err(e),
        }

        dispatcher.drain_write().await?;

        if dispatcher.ctx.is_connection_closed() {
            trace!(target: "h1_dispatcher", "connection closed: {addr}");
            if let Ok(mut io) = Rc::try_unwrap(dispatcher.io) {
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut io).await;
            }
            return Ok(());
        }
    }
}

struct Dispatcher<'a, S, D> {
    io: Rc<TcpStream>,
    ctx: Context<'a, D>,
    service: &'a S,
    pool: Arc<BufferPool>,
    config: DispatchConfig,
    read_buf: BytesMut,
    write_buf: BytesMut,
    handback: Handback,
}

enum Step {
    Chunk(Option<io::Result<Bytes>>),
    Flush,
}

impl<S, D> Dispatcher<'_, S, D>
where
    S: HttpService,
    D: DateTime,
{
    async fn _run(&mut self) -> Result<(), Error> {
        let n = timeout(
            self.config.timeout,
            read_pooled(&self.io, &self.pool, &mut self.read_buf),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        if n == 0 {
            self.ctx.set_close();
            return Ok(());
        }

        // serve pipelined requests back to back until input runs dry.
        while let Some((req, decoder)) = self.ctx.decode_head(&mut self.read_buf)? {
            let (body, handed_out) = if decoder.is_eof() {
                (RequestBody::default(), false)
            } else {
                let reader = BodyReader::new(
                    self.io.clone(),
                    self.pool.clone(),
                    self.ctx.is_expect_header(),
                    decoder,
                    mem::take(&mut self.read_buf),
                    self.handback.sender(),
                    self.config.max_head_size,
                );
                (RequestBody::reader(reader), true)
            };

            let (parts, _) = req.into_parts();
            let req = Request::from_parts(parts, body);

            let (parts, body) = self.service.call(req).await.into_parts();

            let size = BodySize::from_stream(&body);
            let mut encoder = self.ctx.encode_head(parts, size, &mut self.write_buf);

            // stream the response body, flushing at the write watermark or
            // whenever the body has nothing ready while output is buffered.
            {
                let mut body = pin!(body);

                loop {
                    let buf = &mut self.write_buf;

                    let step = poll_fn(|cx| match body.as_mut().poll_next(cx) {
                        Poll::Ready(res) => Poll::Ready(Step::Chunk(res)),
                        Poll::Pending if buf.is_empty() => Poll::Pending,
                        Poll::Pending => Poll::Ready(Step::Flush),
                    })
                    .await;

                    match step {
                        Step::Chunk(Some(Ok(bytes))) => {
                            encoder.encode(bytes, buf);
                            if buf.len() < self.config.write_buf_limit {
                                continue;
                            }
                        }
                        Step::Chunk(Some(Err(e))) => {
                            self.ctx.set_close();
                            return Err(Error::Body(e));
                        }
                        Step::Chunk(None) => {
                            encoder.encode_eof();
                            break;
                        }
                        Step::Flush => {}
                    }

                    self.drain_write().await?;
                }
            }

            if handed_out {
                match self.handback.recover().await {
                    Some(read_buf) => self.read_buf = read_buf,
                    None => {
                        // handler did not drain the body; request framing is
                        // lost beyond recovery.
                        self.ctx.set_close();
                        break;
                    }
                }
            }

            if self.ctx.is_connection_closed() {
                break;
            }
        }

        Ok(())
    }

    async fn drain_write(&mut self) -> Result<(), Error> {
        while !self.write_buf.is_empty() {
            timeout(self.config.timeout, self.io.writable())
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(Error::from)?;

            match self.io.try_write(&self.write_buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => self.write_buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Commit a canned error response and mark the connection for close.
    fn request_error(&mut self, res: Response<ResponseBody>) {
        self.ctx.set_close();

        let (parts, body) = res.into_parts();
        let size = BodySize::from_stream(&body);
        let mut encoder = self.ctx.encode_head(parts, size, &mut self.write_buf);

        if let ResponseBody::Bytes { bytes } = body {
            encoder.encode(bytes, &mut self.write_buf);
        }
        encoder.encode_eof();
    }
}

/// Read once into a buffer checked out from the pool, appending whatever
/// arrived to `dst`. The pool buffer is checked back in before returning.
async fn read_pooled(io: &TcpStream, pool: &BufferPool, dst: &mut BytesMut) -> io::Result<usize> {
    let mut chunk = pool.checkout();

    loop {
        io.readable().await?;

        match io.try_read(&mut chunk) {
            Ok(n) => {
                dst.extend_from_slice(&chunk[..n]);
                return Ok(n);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
}
