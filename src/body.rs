//! HTTP body types.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::stream::{LocalBoxStream, Stream};

// a size hint marking a body that must not be polled at all. used to tell a
// bodyless response apart from an empty sized one.
pub(crate) const NONE_BODY_HINT: (usize, Option<usize>) = (usize::MAX, Some(0));

/// Response body handed back by a request handler.
///
/// `Bytes` carries a complete in-memory body, `Stream` an async producer such
/// as a chunked file read, and `None` the absence of a body (HEAD, 204).
pub enum ResponseBody {
    None,
    Bytes { bytes: Bytes },
    Stream { stream: LocalBoxStream<'static, io::Result<Bytes>> },
}

impl ResponseBody {
    /// Construct a body from an async stream of chunks.
    #[inline]
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + 'static,
    {
        Self::Stream {
            stream: Box::pin(stream),
        }
    }

    /// Construct a complete in-memory body.
    #[inline]
    pub fn bytes<B>(bytes: B) -> Self
    where
        Bytes: From<B>,
    {
        Self::Bytes {
            bytes: Bytes::from(bytes),
        }
    }
}

impl Stream for ResponseBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this {
            Self::None => Poll::Ready(None),
            Self::Bytes { .. } => match std::mem::replace(this, Self::None) {
                Self::Bytes { bytes } => Poll::Ready(Some(Ok(bytes))),
                _ => unreachable!(),
            },
            Self::Stream { stream } => stream.as_mut().poll_next(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::None => NONE_BODY_HINT,
            Self::Bytes { bytes } => (bytes.len(), Some(bytes.len())),
            Self::Stream { stream } => stream.size_hint(),
        }
    }
}

macro_rules! bytes_impl {
    ($ty: ty) => {
        impl From<$ty> for ResponseBody {
            fn from(item: $ty) -> Self {
                Self::bytes(item)
            }
        }
    };
}

bytes_impl!(Bytes);
bytes_impl!(&'static [u8]);
bytes_impl!(&'static str);
bytes_impl!(Vec<u8>);
bytes_impl!(String);

/// Body size as advertised by a body's stream hint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BodySize {
    /// Absence of body. No `Content-Length` header is derived.
    None,
    /// Known size body, deriving `Content-Length: N` when the handler set
    /// none itself.
    Sized(usize),
    /// Unknown size body. The handler is responsible for the length header.
    Stream,
}

impl BodySize {
    pub fn from_stream<S>(stream: &S) -> Self
    where
        S: Stream,
    {
        match stream.size_hint() {
            (usize::MAX, Some(0)) => Self::None,
            (_, Some(size)) => Self::Sized(size),
            (_, None) => Self::Stream,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::future::poll_fn;

    #[test]
    fn body_size_from_variants() {
        assert_eq!(BodySize::from_stream(&ResponseBody::None), BodySize::None);
        assert_eq!(
            BodySize::from_stream(&ResponseBody::bytes("hello")),
            BodySize::Sized(5)
        );
    }

    #[tokio::test]
    async fn bytes_polls_once() {
        let mut body = ResponseBody::bytes("hello");

        let chunk = poll_fn(|cx| Pin::new(&mut body).poll_next(cx)).await;
        assert_eq!(chunk.unwrap().unwrap(), Bytes::from("hello"));

        let chunk = poll_fn(|cx| Pin::new(&mut body).poll_next(cx)).await;
        assert!(chunk.is_none());
    }
}
