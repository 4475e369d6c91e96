//! Steady-rate token buckets.
//!
//! A [`RateLimiter`] holds at most `capacity` permits and a background ticker
//! adds one every `window / capacity` (rounded up to the nanosecond), dropping
//! the tick when the bucket is full. The bucket starts with a single permit,
//! so the first caller never blocks. [`MultiLimiter`] chains several buckets;
//! a call is admitted once every member has admitted it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::core::{FetchContext, Interrupted};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("rate limiter stopped")]
    Closed,
    #[error("wait cancelled")]
    Cancelled,
    #[error("deadline exceeded while waiting for admission")]
    DeadlineExceeded,
    #[error("invalid quota: {capacity} per {window:?}")]
    InvalidQuota { capacity: u32, window: Duration },
    #[error("rate limiter requires a running tokio runtime")]
    NoRuntime,
}

impl From<Interrupted> for LimiterError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => LimiterError::Cancelled,
            Interrupted::DeadlineExceeded => LimiterError::DeadlineExceeded,
        }
    }
}

/// Single token bucket.
///
/// After [`RateLimiter::stop`], pending and future waits fail with
/// [`LimiterError::Closed`]. Dropping the limiter also stops its ticker.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    interval: Duration,
    permits: Arc<Semaphore>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Must be called inside a tokio runtime; the refill ticker is spawned
    /// on it.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, LimiterError> {
        let interval = refill_interval(capacity, window)?;
        let handle = Handle::try_current().map_err(|_| LimiterError::NoRuntime)?;

        let permits = Arc::new(Semaphore::new(1));
        let ticker = handle.spawn(refill(Arc::clone(&permits), capacity as usize, interval));

        log::debug!("rate limiter {capacity}/{window:?} (one permit every {interval:?})");
        Ok(Self {
            capacity,
            window,
            interval,
            permits,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// Block until a permit is available and consume it.
    pub async fn wait(&self, ctx: &FetchContext) -> Result<(), LimiterError> {
        match ctx.guard(self.permits.acquire()).await? {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(LimiterError::Closed),
        }
    }

    /// Consume a permit if one is available right now.
    pub fn try_acquire(&self) -> Result<bool, LimiterError> {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(true)
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(false),
            Err(tokio::sync::TryAcquireError::Closed) => Err(LimiterError::Closed),
        }
    }

    /// Terminate the ticker and close the bucket. Idempotent.
    pub fn stop(&self) {
        self.permits.close();
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            log::debug!("rate limiter {}/{:?} stopped", self.capacity, self.window);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock()
            && let Some(handle) = ticker.take()
        {
            handle.abort();
        }
    }
}

/// `window / capacity`, rounded up so `capacity` ticks never fit inside one
/// window.
fn refill_interval(capacity: u32, window: Duration) -> Result<Duration, LimiterError> {
    if capacity == 0 || window.is_zero() {
        return Err(LimiterError::InvalidQuota { capacity, window });
    }
    let nanos = window.as_nanos().div_ceil(u128::from(capacity));
    let nanos = u64::try_from(nanos).map_err(|_| LimiterError::InvalidQuota { capacity, window })?;
    Ok(Duration::from_nanos(nanos))
}

async fn refill(permits: Arc<Semaphore>, capacity: usize, interval: Duration) {
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if permits.is_closed() {
            break;
        }
        // Only this task adds permits, so the check cannot race past capacity.
        if permits.available_permits() < capacity {
            permits.add_permits(1);
        }
    }
}

/// Ordered composition of limiters.
///
/// Members are always acquired in declaration order. Callers sharing
/// limiters across several `MultiLimiter`s must declare them in the same
/// relative order. A wait interrupted part-way keeps the permits it already
/// took.
#[derive(Debug, Clone, Default)]
pub struct MultiLimiter {
    limiters: Vec<Arc<RateLimiter>>,
}

impl MultiLimiter {
    pub fn new(limiters: Vec<Arc<RateLimiter>>) -> Self {
        Self { limiters }
    }

    /// No limits at all; `wait` returns immediately.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// One limiter per `(capacity, window)` pair, in the given order.
    pub fn from_quotas(
        quotas: impl IntoIterator<Item = (u32, Duration)>,
    ) -> Result<Self, LimiterError> {
        let limiters = quotas
            .into_iter()
            .map(|(capacity, window)| RateLimiter::new(capacity, window).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { limiters })
    }

    pub fn push(&mut self, limiter: Arc<RateLimiter>) {
        self.limiters.push(limiter);
    }

    pub async fn wait(&self, ctx: &FetchContext) -> Result<(), LimiterError> {
        for limiter in &self.limiters {
            limiter.wait(ctx).await?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        for limiter in &self.limiters {
            limiter.stop();
        }
    }

    pub fn limiters(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
