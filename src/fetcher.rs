//! The fetch facade handed to upstream clients.
//!
//! A [`Fetcher`] is built once per upstream source and owns that source's
//! limiter, retry policy, browser profile and cache. Callers only see
//! [`Fetched`] data or one classified [`FetchError`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use rand::SeedableRng;
use rand::rngs::StdRng;
use url::Url;

use crate::config::{ConfigError, FetchConfig, RateLimitSpec};
use crate::core::{
    Clock, FetchContext, FetchError, FetchRequest, FetchResult, Fetched, MonotonicClock,
};
use crate::fingerprint::{BrowserCatalog, BrowserProfile, FingerprintRegistry};
use crate::modules::cache::ResponseCache;
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, MetricsHandler};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::rate_limit::MultiLimiter;
use crate::modules::retry::RetryExecutor;
use crate::sources::UpstreamSource;
use crate::transport::impersonate::ImpersonatingTransport;
use crate::transport::reqwest_transport::ReqwestTransport;
use crate::transport::{Transport, TransportError};

/// Rate-limited, retrying, caching HTTP client for one upstream.
#[derive(Debug)]
pub struct Fetcher {
    executor: RetryExecutor,
    registry: Arc<FingerprintRegistry>,
    metrics: Option<MetricsCollector>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    /// Must be called inside a tokio runtime when `config` has rate limits.
    pub fn new(config: FetchConfig) -> FetchResult<Self> {
        FetcherBuilder::from_config(config).build()
    }

    pub fn for_source(source: UpstreamSource) -> FetchResult<Self> {
        Self::new(source.config())
    }

    /// One logical call: cache, rate limit, attempts, classification.
    pub async fn fetch(
        &self,
        ctx: &FetchContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> FetchResult<Fetched> {
        let url = Url::parse(url)
            .map_err(|err| FetchError::InvalidRequest(format!("invalid URL {url:?}: {err}")))?;
        let mut request = FetchRequest::new(method, url).with_headers(headers);
        request.body = body;
        self.execute(ctx, request).await
    }

    pub async fn get(&self, ctx: &FetchContext, url: &str) -> FetchResult<Fetched> {
        self.fetch(ctx, Method::GET, url, HeaderMap::new(), None)
            .await
    }

    pub async fn execute(&self, ctx: &FetchContext, request: FetchRequest) -> FetchResult<Fetched> {
        self.executor.execute(ctx, request).await
    }

    /// The identity every request of this fetcher presents.
    pub fn profile(&self) -> &Arc<BrowserProfile> {
        self.executor.profile()
    }

    pub fn registry(&self) -> &Arc<FingerprintRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &MultiLimiter {
        self.executor.limiter()
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache<Fetched>>> {
        self.executor.cache()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(MetricsCollector::snapshot)
    }

    /// Stop the refill tasks. Waiters, including fetchers sharing the same
    /// limiter, fail with [`FetchError::LimiterClosed`] afterwards.
    pub fn shutdown(&self) {
        log::debug!("stopping {} limiter(s)", self.limiter().len());
        self.limiter().stop();
    }
}

pub struct FetcherBuilder {
    config: FetchConfig,
    registry: Option<Arc<FingerprintRegistry>>,
    limiter: Option<MultiLimiter>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<Arc<ResponseCache<Fetched>>>,
    seed: Option<u64>,
    handlers: Vec<Arc<dyn EventHandler>>,
    enable_metrics: bool,
    enable_logging: bool,
}

impl std::fmt::Debug for FetcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherBuilder")
            .field("config", &self.config)
            .field("shared_registry", &self.registry.is_some())
            .field("shared_limiter", &self.limiter.is_some())
            .field("custom_transport", &self.transport.as_ref().map(|t| t.name()))
            .field("seed", &self.seed)
            .field("handlers", &self.handlers.len())
            .field("enable_metrics", &self.enable_metrics)
            .field("enable_logging", &self.enable_logging)
            .finish()
    }
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherBuilder {
    pub fn new() -> Self {
        Self::from_config(FetchConfig::default())
    }

    pub fn from_config(config: FetchConfig) -> Self {
        Self {
            config,
            registry: None,
            limiter: None,
            transport: None,
            clock: None,
            cache: None,
            seed: None,
            handlers: Vec::new(),
            enable_metrics: true,
            enable_logging: true,
        }
    }

    /// Append one `capacity per window` budget.
    pub fn with_rate_limit(mut self, capacity: u32, window: Duration) -> Self {
        self.config
            .rate_limits
            .push(RateLimitSpec::new(capacity, window));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.config.base_backoff = base_backoff;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn with_backoff_jitter(mut self, jitter: f64) -> Self {
        self.config.backoff_jitter = jitter;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// `None` lets a logical call run as long as the caller's context allows.
    pub fn with_overall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.overall_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn with_catalog(mut self, catalog: BrowserCatalog) -> Self {
        self.config.catalog = Some(catalog);
        self
    }

    /// Pin the user-agent instead of drawing one from the registry.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn disable_impersonation(mut self) -> Self {
        self.config.impersonate = false;
        self
    }

    pub fn with_registry(mut self, registry: Arc<FingerprintRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share one provider budget between several fetchers.
    pub fn with_limiter(mut self, limiter: MultiLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache<Fetched>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Seeds profile selection (for an internally built registry) and
    /// backoff jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn disable_metrics(mut self) -> Self {
        self.enable_metrics = false;
        self
    }

    pub fn disable_logging(mut self) -> Self {
        self.enable_logging = false;
        self
    }

    pub fn build(self) -> FetchResult<Fetcher> {
        let Self {
            config,
            registry,
            limiter,
            transport,
            clock,
            cache,
            seed,
            handlers,
            enable_metrics,
            enable_logging,
        } = self;
        config.validate()?;

        let registry = match registry {
            Some(registry) => registry,
            None => {
                let registry = match &config.catalog {
                    Some(catalog) => FingerprintRegistry::from_catalog(catalog)?,
                    None => FingerprintRegistry::builtin()?,
                };
                Arc::new(match seed {
                    Some(seed) => registry.with_seed(seed),
                    None => registry,
                })
            }
        };
        let profile = match &config.user_agent {
            Some(user_agent) => registry.custom_profile(user_agent)?,
            None => registry.select_profile(),
        };

        let limiter = match limiter {
            Some(limiter) => limiter,
            None => MultiLimiter::from_quotas(config.quotas())?,
        };

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None if config.impersonate => {
                Arc::new(ImpersonatingTransport::new().map_err(transport_setup_error)?)
            }
            None => Arc::new(ReqwestTransport::new().map_err(transport_setup_error)?),
        };

        let cache = cache.or_else(|| {
            (!config.cache_ttl.is_zero()).then(|| {
                let clock = clock.unwrap_or_else(|| Arc::new(MonotonicClock));
                Arc::new(ResponseCache::with_clock(config.cache_ttl, clock))
            })
        });

        let mut events = EventDispatcher::new();
        if enable_logging {
            events.register_handler(Arc::new(LoggingHandler));
        }
        let metrics = enable_metrics.then(MetricsCollector::new);
        if let Some(metrics) = &metrics {
            events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
        }
        for handler in handlers {
            events.register_handler(handler);
        }

        log::info!(
            "fetcher ready: {} via {} transport, {} limiter(s), cache {}",
            profile.user_agent(),
            transport.name(),
            limiter.len(),
            if cache.is_some() { "on" } else { "off" }
        );

        let mut executor = RetryExecutor::new(config.retry_policy(), transport, profile)
            .with_limiter(limiter)
            .with_events(Arc::new(events));
        if let Some(cache) = cache {
            executor = executor.with_cache(cache);
        }
        if let Some(seed) = seed {
            executor = executor.with_rng(StdRng::seed_from_u64(seed.wrapping_add(1)));
        }

        Ok(Fetcher {
            executor,
            registry,
            metrics,
            config,
        })
    }
}

fn transport_setup_error(err: TransportError) -> FetchError {
    FetchError::Config(ConfigError::Invalid(format!(
        "transport setup failed: {err}"
    )))
}
