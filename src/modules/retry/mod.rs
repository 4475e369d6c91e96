//! Retry orchestration for one logical fetch.
//!
//! Each attempt walks `WaitForAdmission -> Dispatch -> Classify`; the
//! classification decides between returning, failing fast, or sleeping and
//! trying again:
//!
//! | outcome                       | action                                          |
//! |-------------------------------|-------------------------------------------------|
//! | 2xx / 3xx                     | success                                         |
//! | 404                           | [`Fetched::NotFound`], no retry                 |
//! | 429                           | retry after `max(Retry-After, base * m^(n-1))`  |
//! | other 4xx                     | [`FetchError::FatalClient`], no retry           |
//! | 5xx                           | retry after `base * 2^(n-1)`                    |
//! | dial / handshake / io failure | retry after `base * 2^(n-1)`                    |
//!
//! The browser profile is fixed per executor, so every attempt of every call
//! presents the same identity.

mod retry_after;

pub use retry_after::{parse_retry_after, parse_retry_after_value};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::config::ConfigError;
use crate::core::{
    AttemptFailure, FetchContext, FetchError, FetchRequest, FetchResponse, FetchResult, Fetched,
    Interrupted,
};
use crate::fingerprint::BrowserProfile;
use crate::modules::cache::ResponseCache;
use crate::modules::events::{
    AttemptFailedEvent, CacheHitEvent, EventDispatcher, FetchEvent, GiveUpEvent,
    PostResponseEvent, PreRequestEvent, RetryEvent,
};
use crate::modules::rate_limit::{LimiterError, MultiLimiter};
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// How one attempt ended, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    RetryableNetwork,
    RateLimited { retry_after: Option<Duration> },
    NotFound,
    FatalClient,
    Server,
    /// Another try would fail the same way: a bad URL, a broken TLS setup or
    /// a body that arrived but cannot be decoded.
    Unrecoverable,
}

impl Classification {
    pub fn of(outcome: &Result<TransportResponse, TransportError>) -> Self {
        match outcome {
            Ok(response) => match Self::from_status(response.status) {
                Classification::RateLimited { .. } => Classification::RateLimited {
                    retry_after: parse_retry_after(&response.headers),
                },
                other => other,
            },
            Err(err) if err.is_retryable() => Classification::RetryableNetwork,
            Err(_) => Classification::Unrecoverable,
        }
    }

    /// Status-only view; `RateLimited` carries no `Retry-After` here.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Classification::NotFound,
            429 => Classification::RateLimited { retry_after: None },
            400..=499 => Classification::FatalClient,
            500..=599 => Classification::Server,
            100..=399 => Classification::Success,
            _ => Classification::Server,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Classification::RetryableNetwork
                | Classification::RateLimited { .. }
                | Classification::Server
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Growth factor for 429 backoff.
    pub backoff_multiplier: f64,
    /// Additive jitter as a fraction of the computed delay, in `[0, 1]`.
    pub jitter: f64,
    pub request_timeout: Duration,
    pub overall_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            request_timeout: Duration::from_secs(30),
            overall_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)` for network failures and 5xx.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    /// `max(retry_after, base * multiplier^(attempt-1))` for 429.
    pub fn rate_limited_backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let computed = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        retry_after.map_or(computed, |server| server.max(computed))
    }
}

/// Runs logical fetches against one upstream with a fixed browser profile.
pub struct RetryExecutor {
    policy: RetryPolicy,
    limiter: MultiLimiter,
    transport: Arc<dyn Transport>,
    profile: Arc<BrowserProfile>,
    cache: Option<Arc<ResponseCache<Fetched>>>,
    events: Arc<EventDispatcher>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("limiters", &self.limiter.len())
            .field("transport", &self.transport.name())
            .field("user_agent", &self.profile.user_agent())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        transport: Arc<dyn Transport>,
        profile: Arc<BrowserProfile>,
    ) -> Self {
        Self {
            policy,
            limiter: MultiLimiter::unlimited(),
            transport,
            profile,
            cache: None,
            events: Arc::new(EventDispatcher::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_limiter(mut self, limiter: MultiLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache<Fetched>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Random source for backoff jitter.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn profile(&self) -> &Arc<BrowserProfile> {
        &self.profile
    }

    pub fn limiter(&self) -> &MultiLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache<Fetched>>> {
        self.cache.as_ref()
    }

    /// Perform one logical fetch: cache, then up to `max_attempts` tries.
    pub async fn execute(&self, ctx: &FetchContext, request: FetchRequest) -> FetchResult<Fetched> {
        let ctx = match self.policy.overall_timeout {
            Some(timeout) => ctx.clone().timeout(timeout),
            None => ctx.clone(),
        };

        let cache_key = request.is_cacheable().then(|| request.cache_key());
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key)
            && let Some(hit) = cache.get(key)
        {
            self.events.dispatch(FetchEvent::CacheHit(CacheHitEvent {
                key: key.clone(),
                host: request.host().to_string(),
                timestamp: Utc::now(),
            }));
            return Ok(hit);
        }

        let mut attempts = 0;
        let result = self.run(&ctx, &request, &mut attempts).await;
        match &result {
            Ok(fetched) => {
                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.put(key, fetched.clone());
                }
            }
            Err(err) => {
                self.events.dispatch(FetchEvent::GiveUp(GiveUpEvent {
                    url: request.url.clone(),
                    attempts,
                    kind: err.kind(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                }));
            }
        }
        result
    }

    async fn run(
        &self,
        ctx: &FetchContext,
        request: &FetchRequest,
        attempts: &mut u32,
    ) -> FetchResult<Fetched> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last: Option<AttemptFailure> = None;

        loop {
            self.limiter
                .wait(ctx)
                .await
                .map_err(|err| admission_error(err, *attempts, last.take()))?;

            *attempts += 1;
            let attempt = *attempts;
            self.events.dispatch(FetchEvent::PreRequest(PreRequestEvent {
                url: request.url.clone(),
                method: request.method.clone(),
                attempt,
                user_agent: self.profile.user_agent().to_string(),
                timestamp: Utc::now(),
            }));

            let outgoing = TransportRequest::from_fetch(request, Arc::clone(&self.profile));
            let budget = ctx.clamp(self.policy.request_timeout);
            let started = Instant::now();
            let outcome = match ctx
                .guard(tokio::time::timeout(budget, self.transport.send(outgoing)))
                .await
            {
                Err(Interrupted::Cancelled) => return Err(FetchError::Cancelled),
                Err(Interrupted::DeadlineExceeded) => {
                    return Err(FetchError::Timeout {
                        attempts: attempt,
                        last: last.map(Box::new),
                    });
                }
                Ok(Err(_elapsed)) => Err(TransportError::Timeout(budget)),
                Ok(Ok(outcome)) => outcome,
            };
            let latency = started.elapsed();

            let (failure, delay) = match outcome {
                Ok(response) => {
                    self.events.dispatch(FetchEvent::PostResponse(PostResponseEvent {
                        url: request.url.clone(),
                        method: request.method.clone(),
                        attempt,
                        status: response.status,
                        latency,
                        timestamp: Utc::now(),
                    }));

                    match Classification::from_status(response.status) {
                        Classification::Success => {
                            return Ok(Fetched::Found(FetchResponse::new(
                                response.status,
                                response.headers,
                                response.body,
                                request.url.clone(),
                            )));
                        }
                        Classification::NotFound => {
                            return Ok(Fetched::NotFound {
                                url: request.url.clone(),
                            });
                        }
                        Classification::RateLimited { .. } => {
                            let retry_after = parse_retry_after(&response.headers);
                            (
                                AttemptFailure::RateLimited { retry_after },
                                self.policy.rate_limited_backoff(attempt, retry_after),
                            )
                        }
                        Classification::Server => (
                            AttemptFailure::Server {
                                status: response.status,
                            },
                            self.policy.backoff(attempt),
                        ),
                        _ => {
                            return Err(FetchError::FatalClient {
                                status: response.status,
                                url: request.url.clone(),
                                body: response.body,
                            });
                        }
                    }
                }
                Err(err) => {
                    self.events.dispatch(FetchEvent::AttemptFailed(AttemptFailedEvent {
                        url: request.url.clone(),
                        attempt,
                        kind: err.kind(),
                        error: err.to_string(),
                        latency,
                        timestamp: Utc::now(),
                    }));
                    if !err.is_retryable() {
                        return Err(fatal_transport(err));
                    }
                    let delay = self.policy.backoff(attempt);
                    (AttemptFailure::Transport(err), delay)
                }
            };

            if attempt >= max_attempts {
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            let delay = self.jittered(delay);
            if ctx.remaining().is_some_and(|left| delay >= left) {
                log::debug!(
                    "backoff {delay:?} for {} would overrun the deadline",
                    request.url
                );
                return Err(FetchError::Timeout {
                    attempts: attempt,
                    last: Some(Box::new(failure)),
                });
            }

            self.events.dispatch(FetchEvent::Retry(RetryEvent {
                url: request.url.clone(),
                attempt,
                reason: failure.to_string(),
                scheduled_after: delay,
                timestamp: Utc::now(),
            }));

            match ctx.sleep(delay).await {
                Ok(()) => {}
                Err(Interrupted::Cancelled) => return Err(FetchError::Cancelled),
                Err(Interrupted::DeadlineExceeded) => {
                    return Err(FetchError::Timeout {
                        attempts: attempt,
                        last: Some(Box::new(failure)),
                    });
                }
            }
            last = Some(failure);
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.policy.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let fraction: f64 = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.r#gen::<f64>() * self.policy.jitter.min(1.0)
        };
        delay.saturating_add(delay.mul_f64(fraction))
    }
}

fn admission_error(err: LimiterError, attempts: u32, last: Option<AttemptFailure>) -> FetchError {
    match err {
        LimiterError::DeadlineExceeded => FetchError::Timeout {
            attempts,
            last: last.map(Box::new),
        },
        other => FetchError::from(other),
    }
}

fn fatal_transport(err: TransportError) -> FetchError {
    match err {
        TransportError::Tls(message) => FetchError::Config(ConfigError::Invalid(message)),
        TransportError::Decode(message) => FetchError::Decode(message),
        other => FetchError::InvalidRequest(other.to_string()),
    }
}
