use std::{
    cell::RefCell,
    io, mem,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll, Waker, ready},
};

use bytes::{Bytes, BytesMut};
use futures_core::stream::Stream;
use tokio::net::TcpStream;

use crate::pool::BufferPool;

use super::proto::{
    CONTINUE,
    codec::{ChunkResult, TransferCoding},
};

/// Streaming request body handed to the handler.
///
/// Bodyless requests yield an immediate end of stream. Framed bodies pull
/// from the bytes buffered alongside the request head first and then read the
/// socket themselves, one checked out pool buffer per read.
pub struct RequestBody(Inner);

enum Inner {
    None,
    Reader(BodyReader),
}

impl Default for RequestBody {
    fn default() -> Self {
        Self(Inner::None)
    }
}

impl RequestBody {
    pub(super) fn reader(reader: BodyReader) -> Self {
        Self(Inner::Reader(reader))
    }
}

impl Stream for RequestBody {
    type Item = io::Result<Bytes>;

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().0 {
            Inner::None => Poll::Ready(None),
            Inner::Reader(ref mut reader) => Pin::new(reader).poll_next(cx),
        }
    }
}

pub(super) struct BodyReader {
    io: Rc<TcpStream>,
    pool: Arc<BufferPool>,
    // offset into the interim 100 response. starts at the full length when
    // no 100 is pending.
    continue_pos: usize,
    decoder: Decoder,
}

struct Decoder {
    coding: TransferCoding,
    // bound of the buffered body prefix, equal to the receive buffer size.
    limit: usize,
    read_buf: BytesMut,
    handback: HandbackSender,
}

impl Drop for Decoder {
    fn drop(&mut self) {
        // a fully drained body hands surplus bytes (pipelined requests) back
        // to the dispatcher. dropping the body early leaves the sender empty
        // which the dispatcher reads as: framing lost, close the connection.
        if self.coding.is_eof() {
            self.handback.send(mem::take(&mut self.read_buf));
        }
    }
}

impl BodyReader {
    pub(super) fn new(
        io: Rc<TcpStream>,
        pool: Arc<BufferPool>,
        send_continue: bool,
        coding: TransferCoding,
        read_buf: BytesMut,
        handback: HandbackSender,
        limit: usize,
    ) -> Self {
        Self {
            io,
            pool,
            continue_pos: if send_continue { 0 } else { CONTINUE.len() },
            decoder: Decoder {
                coding,
                limit,
                read_buf,
                handback,
            },
        }
    }
}

impl Stream for BodyReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // flush a pending `100 Continue` before the first socket read.
        while this.continue_pos < CONTINUE.len() {
            ready!(this.io.poll_write_ready(cx))?;
            match this.io.try_write(&CONTINUE[this.continue_pos..]) {
                Ok(0) => return Poll::Ready(Some(Err(io::ErrorKind::WriteZero.into()))),
                Ok(n) => this.continue_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }

        loop {
            match this.decoder.coding.decode(&mut this.decoder.read_buf) {
                ChunkResult::Ok(bytes) => return Poll::Ready(Some(Ok(bytes))),
                ChunkResult::InsufficientData => {
                    if this.decoder.read_buf.len() > this.decoder.limit {
                        return Poll::Ready(Some(Err(io::Error::other(
                            "request body buffer limit reached",
                        ))));
                    }
                }
                ChunkResult::Eof | ChunkResult::AlreadyEof => return Poll::Ready(None),
            }

            ready!(this.io.poll_read_ready(cx))?;

            let mut chunk = this.pool.checkout();
            match this.io.try_read(&mut chunk) {
                Ok(0) => return Poll::Ready(Some(Err(io::ErrorKind::UnexpectedEof.into()))),
                Ok(n) => this.decoder.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}

/// One shot intra task channel handing the read buffer from a drained body
/// back to its dispatcher.
pub(super) struct Handback(Rc<RefCell<HandbackInner>>);

struct HandbackInner {
    waker: Option<Waker>,
    val: Option<BytesMut>,
}

impl Handback {
    pub(super) fn new() -> Self {
        Self(Rc::new(RefCell::new(HandbackInner {
            waker: None,
            val: None,
        })))
    }

    pub(super) fn sender(&mut self) -> HandbackSender {
        HandbackSender(Rc::clone(&self.0))
    }

    /// Resolve with the handed back buffer, or `None` when the sender was
    /// dropped without delivering one.
    pub(super) async fn recover(&mut self) -> Option<BytesMut> {
        std::future::poll_fn(|cx| {
            let mut inner = self.0.borrow_mut();
            if let Some(val) = inner.val.take() {
                return Poll::Ready(Some(val));
            }
            if Rc::strong_count(&self.0) == 1 {
                return Poll::Ready(None);
            }
            inner.waker = Some(cx.waker().clone());
            Poll::Pending
        })
        .await
    }
}

pub(super) struct HandbackSender(Rc<RefCell<HandbackInner>>);

impl HandbackSender {
    fn send(&mut self, val: BytesMut) {
        self.0.borrow_mut().val = Some(val);
    }
}

impl Drop for HandbackSender {
    fn drop(&mut self) {
        if let Some(waker) = self.0.borrow_mut().waker.take() {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn handback_delivers_buffer() {
        let mut handback = Handback::new();
        let mut sender = handback.sender();

        sender.send(BytesMut::from(&b"left over"[..]));
        drop(sender);

        let buf = handback.recover().await.unwrap();
        assert_eq!(&buf[..], b"left over");
    }

    #[tokio::test]
    async fn handback_detects_dropped_sender() {
        let mut handback = Handback::new();
        let sender = handback.sender();
        drop(sender);

        assert!(handback.recover().await.is_none());
    }
}
