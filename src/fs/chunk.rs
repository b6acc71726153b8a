use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use futures_core::stream::Stream;
use tokio::io::{AsyncRead, ReadBuf};

use crate::pool::PooledBuf;

/// Chunked async file reader. Every read goes through one buffer checked out
/// from the file side pool for the lifetime of the stream.
pub struct ChunkReader {
    file: tokio::fs::File,
    remaining: u64,
    buf: PooledBuf,
}

impl ChunkReader {
    pub(super) fn new(file: tokio::fs::File, size: u64, buf: PooledBuf) -> Self {
        Self {
            file,
            remaining: size,
            buf,
        }
    }
}

impl Stream for ChunkReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.remaining == 0 {
            return Poll::Ready(None);
        }

        let max = (this.buf.len() as u64).min(this.remaining) as usize;
        let mut read_buf = ReadBuf::new(&mut this.buf[..max]);

        ready!(Pin::new(&mut this.file).poll_read(cx, &mut read_buf))?;

        let filled = read_buf.filled();
        if filled.is_empty() {
            // file shrank while being served. the promised length can no
            // longer be delivered.
            return Poll::Ready(Some(Err(io::ErrorKind::UnexpectedEof.into())));
        }

        this.remaining -= filled.len() as u64;
        Poll::Ready(Some(Ok(Bytes::copy_from_slice(filled))))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.remaining as usize;
        (size, Some(size))
    }
}
