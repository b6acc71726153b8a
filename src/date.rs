//! low resolution date time cache to keep http date formatting off the hot path.

use std::{
    cell::RefCell,
    fmt::{self, Write},
    rc::Rc,
    time::{Duration, SystemTime},
};

use httpdate::HttpDate;
use tokio::{
    task::JoinHandle,
    time::{Instant, interval},
};

/// Source of the current wall clock date and a monotonic now.
pub trait DateTime {
    /// The size of the slice handed to the closure of [DateTime::with_date].
    const DATE_VALUE_LENGTH: usize;

    /// Run a closure over the RFC 1123 byte representation of the current date.
    fn with_date<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&[u8]) -> O;

    fn now(&self) -> Instant;
}

/// The length of the byte representation of [HttpDate].
pub const DATE_VALUE_LENGTH: usize = 29;

/// Per worker date service refreshing its cached state every 500 milliseconds.
pub struct DateTimeService {
    state: Rc<RefCell<DateTimeState>>,
    handle: JoinHandle<()>,
}

impl Drop for DateTimeService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl Default for DateTimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl DateTimeService {
    /// Construct the service and spawn its refresh task. Must run inside a
    /// [tokio::task::LocalSet].
    pub fn new() -> Self {
        let state = Rc::new(RefCell::new(DateTimeState::new()));
        let state_clone = Rc::clone(&state);
        let handle = tokio::task::spawn_local(async move {
            let mut interval = interval(Duration::from_millis(500));
            loop {
                let _ = interval.tick().await;
                *state_clone.borrow_mut() = DateTimeState::new();
            }
        });

        Self { state, handle }
    }

    /// A cheap clonable handle connection tasks can own.
    #[inline]
    pub fn handle(&self) -> DateTimeHandle {
        DateTimeHandle(Rc::clone(&self.state))
    }
}

#[derive(Clone)]
pub struct DateTimeHandle(Rc<RefCell<DateTimeState>>);

impl DateTime for DateTimeHandle {
    const DATE_VALUE_LENGTH: usize = DATE_VALUE_LENGTH;

    #[inline]
    fn with_date<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&[u8]) -> O,
    {
        let state = self.0.borrow();
        f(&state.date[..])
    }

    #[inline]
    fn now(&self) -> Instant {
        self.0.borrow().now
    }
}

struct DateTimeState {
    date: [u8; DATE_VALUE_LENGTH],
    now: Instant,
}

impl DateTimeState {
    fn new() -> Self {
        let mut state = Self {
            date: [0; DATE_VALUE_LENGTH],
            now: Instant::now(),
        };
        let _ = write!(state, "{}", HttpDate::from(SystemTime::now()));
        state
    }
}

impl Write for DateTimeState {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.date[..].copy_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Date source backed by plain system time on every call. For tests.
pub struct SystemTimeDate;

impl DateTime for SystemTimeDate {
    const DATE_VALUE_LENGTH: usize = DATE_VALUE_LENGTH;

    fn with_date<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&[u8]) -> O,
    {
        let date = HttpDate::from(SystemTime::now()).to_string();
        f(date.as_bytes())
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
