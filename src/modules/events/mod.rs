//! Fetch lifecycle events.
//!
//! The retry executor reports every attempt, retry, cache hit and give-up
//! through an [`EventDispatcher`]. Handlers turn them into log lines
//! ([`LoggingHandler`]) or counters ([`MetricsHandler`]).

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::core::ErrorKind;

/// About to dispatch a physical attempt.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub url: Url,
    pub method: Method,
    pub attempt: u32,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

/// An attempt came back with an HTTP status.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub url: Url,
    pub method: Method,
    pub attempt: u32,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// An attempt failed below HTTP (dial, handshake, timeout, broken body).
#[derive(Debug, Clone)]
pub struct AttemptFailedEvent {
    pub url: Url,
    pub attempt: u32,
    pub kind: ErrorKind,
    pub error: String,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheHitEvent {
    pub key: String,
    pub host: String,
    pub timestamp: DateTime<Utc>,
}

/// The logical call ended in an error.
#[derive(Debug, Clone)]
pub struct GiveUpEvent {
    pub url: Url,
    pub attempts: u32,
    pub kind: ErrorKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    AttemptFailed(AttemptFailedEvent),
    Retry(RetryEvent),
    CacheHit(CacheHitEvent),
    GiveUp(GiveUpEvent),
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Broadcasts events to registered handlers, in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PreRequest(pre) => {
                log::debug!("-> {} {} (attempt {})", pre.method, pre.url, pre.attempt);
            }
            FetchEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    post.method,
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::AttemptFailed(failed) => {
                log::debug!(
                    "attempt {} for {} failed ({:?}): {}",
                    failed.attempt,
                    failed.url,
                    failed.kind,
                    failed.error
                );
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.url,
                    retry.attempt + 1,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            FetchEvent::CacheHit(hit) => {
                log::trace!("cache hit {}", hit.key);
            }
            FetchEvent::GiveUp(give_up) => {
                log::warn!(
                    "giving up on {} after {} attempt(s): {}",
                    give_up.url,
                    give_up.attempts,
                    give_up.error
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PostResponse(post) => {
                self.metrics
                    .record_response(post.url.host_str().unwrap_or(""), post.status, post.latency);
            }
            FetchEvent::AttemptFailed(failed) => {
                self.metrics
                    .record_error(failed.url.host_str().unwrap_or(""), failed.latency);
            }
            FetchEvent::Retry(retry) => {
                self.metrics.record_retry(retry.url.host_str().unwrap_or(""));
            }
            FetchEvent::CacheHit(hit) => {
                self.metrics.record_cache_hit(&hit.host);
            }
            FetchEvent::GiveUp(give_up) => {
                self.metrics.record_give_up(give_up.url.host_str().unwrap_or(""));
            }
            FetchEvent::PreRequest(_) => {}
        }
    }
}
