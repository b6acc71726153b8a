use std::time::Duration;

use http::header::HeaderMap;
use tokio::time::Instant;

use crate::date::DateTime;

/// Connection specific state threaded through head decoding and encoding.
pub struct Context<'a, D> {
    state: ContextState,
    // header map reused by the next request.
    header: Option<HeaderMap>,
    date: &'a D,
    // connection establishment time and the keep-alive budget measured from
    // it. a zero budget disables keep-alive altogether.
    started: Instant,
    keep_alive_budget: Duration,
    // upper bound of a request head, which doubles as the receive buffer size.
    max_head_size: usize,
}

// request scoped state bits that outlive the request's ownership move into
// the handler call.
struct ContextState(u8);

impl ContextState {
    // current request has a pending `Expect: 100-continue`.
    const EXPECT: u8 = 0b_0001;
    // current request is a HEAD request.
    const HEAD: u8 = 0b_0010;
    // connection is to be closed once the current response is sent.
    const CLOSE: u8 = 0b_0100;

    const fn new() -> Self {
        Self(0)
    }

    fn insert(&mut self, other: u8) {
        self.0 |= other;
    }

    fn remove(&mut self, other: u8) {
        self.0 &= !other;
    }

    const fn contains(&self, other: u8) -> bool {
        (self.0 & other) == other
    }
}

impl<'a, D> Context<'a, D>
where
    D: DateTime,
{
    pub fn new(date: &'a D, max_head_size: usize, keep_alive_budget: Duration) -> Self {
        Self {
            state: ContextState::new(),
            header: None,
            started: date.now(),
            date,
            keep_alive_budget,
            max_head_size,
        }
    }
}

impl<D> Context<'_, D> {
    #[inline]
    pub fn date(&self) -> &D {
        self.date
    }

    #[inline]
    pub(super) fn started(&self) -> Instant {
        self.started
    }

    #[inline]
    pub(super) fn keep_alive_budget(&self) -> Duration {
        self.keep_alive_budget
    }

    #[inline]
    pub(super) fn max_head_size(&self) -> usize {
        self.max_head_size
    }

    /// Take the cached HeaderMap, or a fresh one when none is cached.
    #[inline]
    pub fn take_headers(&mut self) -> HeaderMap {
        self.header.take().unwrap_or_default()
    }

    /// Hand an emptied HeaderMap back for reuse by the next request.
    #[inline]
    pub fn replace_headers(&mut self, headers: HeaderMap) {
        debug_assert!(headers.is_empty());
        self.header = Some(headers);
    }

    /// Reset request scoped state. Called at the start of every decoded head.
    #[inline]
    pub fn reset(&mut self) {
        self.state = ContextState::new();
    }

    #[inline]
    pub fn set_expect_header(&mut self) {
        self.state.insert(ContextState::EXPECT)
    }

    #[inline]
    pub fn set_head_method(&mut self) {
        self.state.insert(ContextState::HEAD)
    }

    #[inline]
    pub fn set_close(&mut self) {
        self.state.insert(ContextState::CLOSE)
    }

    #[inline]
    pub fn remove_close(&mut self) {
        self.state.remove(ContextState::CLOSE)
    }

    #[inline]
    pub const fn is_expect_header(&self) -> bool {
        self.state.contains(ContextState::EXPECT)
    }

    #[inline]
    pub const fn is_head_method(&self) -> bool {
        self.state.contains(ContextState::HEAD)
    }

    #[inline]
    pub const fn is_connection_closed(&self) -> bool {
        self.state.contains(ContextState::CLOSE)
    }
}
