//! fixed capacity pool of equally sized I/O buffers.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crossbeam::queue::ArrayQueue;

/// Pool of pre-allocated I/O buffers shared by all connections of a server.
///
/// The pool holds at most `total_bytes / buf_size` buffers of `buf_size` bytes
/// each. [BufferPool::checkout] hands out a pooled buffer when one is idle and
/// falls back to a plain heap allocation otherwise. Buffers return to the pool
/// when dropped; overflow allocations are simply released.
pub struct BufferPool {
    shared: Arc<Shared>,
}

struct Shared {
    // absent when the pool capacity computes to zero. every checkout then
    // allocates and every checkin releases.
    queue: Option<ArrayQueue<Box<[u8]>>>,
    buf_size: usize,
}

impl BufferPool {
    /// Construct a pool of `total_bytes / buf_size` buffers. A total below
    /// 1024 bytes yields an empty pool.
    pub fn new(total_bytes: usize, buf_size: usize) -> Self {
        let capacity = if total_bytes < 1024 || buf_size == 0 {
            0
        } else {
            total_bytes / buf_size
        };

        let queue = (capacity > 0).then(|| {
            let queue = ArrayQueue::new(capacity);
            for _ in 0..capacity {
                let _ = queue.push(alloc(buf_size));
            }
            queue
        });

        Self {
            shared: Arc::new(Shared { queue, buf_size }),
        }
    }

    /// Remove one buffer from the pool, allocating a non-pooled one when the
    /// pool is exhausted. The buffer is checked back in on drop.
    pub fn checkout(&self) -> PooledBuf {
        if let Some(queue) = self.shared.queue.as_ref() {
            if let Some(data) = queue.pop() {
                return PooledBuf {
                    data: Some(data),
                    direct: true,
                    shared: self.shared.clone(),
                };
            }
        }

        PooledBuf {
            data: Some(alloc(self.shared.buf_size)),
            direct: false,
            shared: self.shared.clone(),
        }
    }

    /// Return a buffer to the pool. Equivalent to dropping it.
    #[inline]
    pub fn checkin(&self, buf: PooledBuf) {
        drop(buf);
    }

    /// Size in bytes of every buffer handed out by this pool.
    #[inline]
    pub fn buf_size(&self) -> usize {
        self.shared.buf_size
    }

    /// Number of pooled buffers currently idle.
    pub fn idle(&self) -> usize {
        self.shared.queue.as_ref().map(ArrayQueue::len).unwrap_or(0)
    }

    /// Number of pooled buffers this pool was built with.
    pub fn capacity(&self) -> usize {
        self.shared.queue.as_ref().map(ArrayQueue::capacity).unwrap_or(0)
    }
}

/// Round a pool byte total down to the nearest power of two. Totals below
/// 1024 collapse to zero, disabling pooling altogether.
pub fn round_to_pow2(total: usize) -> usize {
    if total < 1024 {
        0
    } else {
        1 << (usize::BITS - 1 - total.leading_zeros())
    }
}

fn alloc(size: usize) -> Box<[u8]> {
    vec![0; size].into_boxed_slice()
}

/// A checked out buffer. Pooled buffers rejoin their pool on drop while
/// overflow buffers are freed.
pub struct PooledBuf {
    data: Option<Box<[u8]>>,
    direct: bool,
    shared: Arc<Shared>,
}

impl PooledBuf {
    /// Whether this buffer came out of the pool rather than a fallback
    /// allocation.
    #[inline]
    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.data.as_deref().unwrap()
    }
}

impl DerefMut for PooledBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_deref_mut().unwrap()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if self.direct {
            if let (Some(queue), Some(data)) = (self.shared.queue.as_ref(), self.data.take()) {
                let _ = queue.push(data);
            }
        }
    }
}
