use core::mem;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::error::ProtoError;

/// Coder for the request/response body framing the engine understands:
/// no body at all, or exactly `Content-Length` bytes. Transfer encodings are
/// not part of the wire contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferCoding {
    /// Request/response does not have a body.
    Eof,
    /// A `Content-Length` framed body with the remaining byte count.
    Length(u64),
}

impl TransferCoding {
    #[inline]
    pub const fn eof() -> Self {
        Self::Eof
    }

    #[inline]
    pub const fn length(len: u64) -> Self {
        Self::Length(len)
    }

    /// True once the coder cannot produce any further body bytes.
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /// Upgrade `Eof` to a sized coder. Redeclaring an already sized coder is
    /// a protocol error (conflicting `Content-Length` headers).
    pub fn try_set(&mut self, other: Self) -> Result<(), ProtoError> {
        match *self {
            Self::Length(_) => Err(ProtoError::ContentLength),
            Self::Eof => {
                *self = other;
                Ok(())
            }
        }
    }

    /// Write a response body chunk, clamped to the declared length.
    pub fn encode(&mut self, mut bytes: Bytes, buf: &mut BytesMut) {
        if bytes.is_empty() {
            return;
        }

        match *self {
            Self::Length(ref mut rem) => {
                let len = bytes.len() as u64;
                if *rem >= len {
                    buf.extend_from_slice(&bytes);
                    *rem -= len;
                } else {
                    let rem = mem::replace(rem, 0);
                    buf.extend_from_slice(&bytes.split_to(rem as usize));
                }
            }
            Self::Eof => warn!(target: "h1_encode", "body bytes produced for a bodyless response"),
        }
    }

    /// Conclude a response body.
    pub fn encode_eof(&mut self) {
        match *self {
            Self::Eof | Self::Length(0) => {}
            Self::Length(n) => {
                warn!(target: "h1_encode", "response body ended {n} bytes short of its declared length")
            }
        }
    }

    /// Decode the next body chunk out of buffered input.
    pub fn decode(&mut self, src: &mut BytesMut) -> ChunkResult {
        match *self {
            Self::Length(0) => {
                *self = Self::Eof;
                ChunkResult::Eof
            }
            Self::Eof => ChunkResult::AlreadyEof,
            _ if src.is_empty() => ChunkResult::InsufficientData,
            Self::Length(ref mut rem) => ChunkResult::Ok(bounded_split(rem, src)),
        }
    }
}

/// Outcome of a single [TransferCoding::decode] call.
#[derive(Debug)]
pub enum ChunkResult {
    /// non empty chunk of body data.
    Ok(Bytes),
    /// more input bytes required.
    InsufficientData,
    /// coder reached its end. no more chunks can be produced.
    Eof,
    /// coder had already reached its end before this call.
    AlreadyEof,
}

fn bounded_split(rem: &mut u64, buf: &mut BytesMut) -> Bytes {
    let len = buf.len() as u64;
    if *rem >= len {
        *rem -= len;
        buf.split().freeze()
    } else {
        let rem = mem::replace(rem, 0);
        buf.split_to(rem as usize).freeze()
    }
}
