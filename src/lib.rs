//! # anifetch
//!
//! The resilient fetch layer of an anime metadata backend: every call to an
//! upstream (Jikan, AniList, Kitsu, AniSkip, scraped HTML sites) goes through
//! one [`Fetcher`] that rate-limits, retries, caches and presents a
//! consistent browser identity on the wire.
//!
//! ## Features
//!
//! - Browser profiles (user-agent + ordered header template) drawn from an
//!   embedded catalog, with a seedable random source
//! - TLS ClientHello shaped after the chosen browser via BoringSSL
//! - Token-bucket rate limiting, composable across several budgets
//! - Retry with exponential backoff and `Retry-After` support
//! - TTL read-through cache, 404 treated as data
//! - Lifecycle events, logging and per-host metrics
//!
//! ## Example
//!
//! ```no_run
//! use anifetch::{FetchContext, Fetcher, UpstreamSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let jikan = Fetcher::for_source(UpstreamSource::Jikan)?;
//!     let ctx = FetchContext::new();
//!     let fetched = jikan.get(&ctx, "https://api.jikan.moe/v4/anime/1").await?;
//!     if let Some(response) = fetched.response() {
//!         println!("{}", response.text()?);
//!     }
//!     jikan.shutdown();
//!     Ok(())
//! }
//! ```

mod fetcher;

pub mod config;
pub mod core;
pub mod fingerprint;
pub mod modules;
pub mod sources;
pub mod transport;

pub use crate::fetcher::{Fetcher, FetcherBuilder};

pub use crate::config::{ConfigError, FetchConfig, RateLimitSpec};

pub use crate::core::{
    AttemptFailure,
    Clock,
    ErrorKind,
    FetchContext,
    FetchError,
    FetchRequest,
    FetchResponse,
    FetchResult,
    Fetched,
    Interrupted,
    ManualClock,
    MonotonicClock,
};

pub use crate::fingerprint::{
    BrowserCatalog,
    BrowserFamily,
    BrowserProfile,
    CatalogError,
    ClientHelloSpec,
    FingerprintId,
    FingerprintMapping,
    FingerprintRegistry,
    resolve_fingerprint,
};

pub use crate::modules::{
    CacheEntry,
    Classification,
    EventDispatcher,
    EventHandler,
    FetchEvent,
    GlobalStats,
    HostStats,
    LimiterError,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    MultiLimiter,
    RateLimiter,
    ResponseCache,
    RetryExecutor,
    RetryPolicy,
};

pub use crate::sources::UpstreamSource;

pub use crate::transport::{
    ImpersonatingConnector,
    ImpersonatingTransport,
    ReqwestTransport,
    TlsShape,
    Transport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
