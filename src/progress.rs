//! Cooperative progress checks for traversals over untrusted data.
//!
//! Block chains, directory chains and entry tables all come straight from
//! the container, so a damaged or hostile image can describe a loop or an
//! absurdly long structure.  Every such loop calls `Progress::tick()` once
//! per iteration, which bounds the loop, yields periodically, refreshes the
//! watchdog, and honors cancellation.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::trace;

use crate::config::Limits;
use crate::error::MediaError;

pub type Watchdog = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct Progress {
    limits: Limits,
    count: usize,
    bound: Option<usize>,
    cancel: Option<Arc<AtomicBool>>,
    watchdog: Option<Watchdog>,
}

impl Progress {
    pub fn new(limits: Limits) -> Progress {
        Progress {
            limits,
            count: 0,
            bound: None,
            cancel: None,
            watchdog: None,
        }
    }

    /// Abort traversals with `MediaError::Cancelled` once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Progress {
        self.cancel = Some(flag);
        self
    }

    /// Invoke `watchdog` every `Limits::watchdog_interval` iterations.
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Progress {
        self.watchdog = Some(watchdog);
        self
    }

    /// Return a fresh counter sharing this one's cancellation flag and
    /// watchdog, failing with `ChainTooLong` after `bound` iterations.
    pub fn bounded(&self, bound: usize) -> Progress {
        Progress {
            limits: self.limits,
            count: 0,
            bound: Some(bound),
            cancel: self.cancel.clone(),
            watchdog: self.watchdog.clone(),
        }
    }

    /// Return a fresh counter with no bound, sharing this one's
    /// cancellation flag and watchdog.
    pub fn unbounded(&self) -> Progress {
        Progress {
            bound: None,
            ..self.bounded(0)
        }
    }

    #[inline]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Account for one iteration.
    pub fn tick(&mut self) -> io::Result<()> {
        self.count += 1;
        if let Some(bound) = self.bound {
            if self.count > bound {
                return Err(MediaError::ChainTooLong.into());
            }
        }
        if let Some(ref cancel) = self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(MediaError::Cancelled.into());
            }
        }
        if self.limits.yield_interval > 0 && self.count % self.limits.yield_interval == 0 {
            thread::yield_now();
        }
        if self.limits.watchdog_interval > 0 && self.count % self.limits.watchdog_interval == 0 {
            trace!(iterations = self.count, "watchdog");
            if let Some(ref watchdog) = self.watchdog {
                watchdog();
            }
        }
        Ok(())
    }
}

impl Default for Progress {
    fn default() -> Progress {
        Progress::new(Limits::default())
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Progress")
            .field("count", &self.count)
            .field("bound", &self.bound)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
