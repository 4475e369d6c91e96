//! Cross-cutting services module
//!
//! Rate limiting, retry orchestration, response caching, lifecycle events
//! and metrics. Each service is an explicit instance; nothing here is global.

pub mod cache;
pub mod events;
pub mod metrics;
pub mod rate_limit;
pub mod retry;

// Re-export commonly used types
pub use cache::{CacheEntry, ResponseCache};
pub use events::{
    AttemptFailedEvent, CacheHitEvent, EventDispatcher, EventHandler, FetchEvent, GiveUpEvent,
    LoggingHandler, MetricsHandler, PostResponseEvent, PreRequestEvent, RetryEvent,
};
pub use metrics::{GlobalStats, HostStats, MetricsCollector, MetricsSnapshot};
pub use rate_limit::{LimiterError, MultiLimiter, RateLimiter};
pub use retry::{Classification, RetryExecutor, RetryPolicy, parse_retry_after};
