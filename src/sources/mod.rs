//! Per-upstream presets.
//!
//! Each upstream the metadata backend talks to gets its own budget, retry
//! shape and cache lifetime. The numbers follow the providers' published
//! limits where they exist.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{FetchConfig, RateLimitSpec};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamSource {
    Jikan,
    AniList,
    Kitsu,
    AniSkip,
    /// HTML pages scraped with a browser identity.
    Scraped,
}

impl UpstreamSource {
    pub const ALL: [UpstreamSource; 5] = [
        UpstreamSource::Jikan,
        UpstreamSource::AniList,
        UpstreamSource::Kitsu,
        UpstreamSource::AniSkip,
        UpstreamSource::Scraped,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UpstreamSource::Jikan => "jikan",
            UpstreamSource::AniList => "anilist",
            UpstreamSource::Kitsu => "kitsu",
            UpstreamSource::AniSkip => "aniskip",
            UpstreamSource::Scraped => "scraped",
        }
    }

    /// API root; the scraped site is configured by the caller.
    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            UpstreamSource::Jikan => Some("https://api.jikan.moe/v4/"),
            UpstreamSource::AniList => Some("https://graphql.anilist.co/"),
            UpstreamSource::Kitsu => Some("https://kitsu.io/api/edge/"),
            UpstreamSource::AniSkip => Some("https://api.aniskip.com/v2/"),
            UpstreamSource::Scraped => None,
        }
    }

    pub fn config(&self) -> FetchConfig {
        let defaults = FetchConfig::default();
        match self {
            // 3 req/s and 60 req/min.
            UpstreamSource::Jikan => FetchConfig {
                rate_limits: vec![RateLimitSpec::per_second(3), RateLimitSpec::per_minute(60)],
                base_backoff: Duration::from_secs(1),
                ..defaults
            },
            UpstreamSource::AniList => FetchConfig {
                rate_limits: vec![RateLimitSpec::per_minute(90)],
                base_backoff: Duration::from_secs(1),
                backoff_multiplier: 3.0,
                ..defaults
            },
            UpstreamSource::Kitsu => FetchConfig {
                rate_limits: vec![RateLimitSpec::per_second(10)],
                ..defaults
            },
            // Skip times never change once published.
            UpstreamSource::AniSkip => FetchConfig {
                rate_limits: vec![RateLimitSpec::per_second(5)],
                cache_ttl: DAY,
                ..defaults
            },
            UpstreamSource::Scraped => FetchConfig {
                rate_limits: vec![RateLimitSpec::per_second(1), RateLimitSpec::per_minute(30)],
                max_attempts: 4,
                base_backoff: Duration::from_secs(2),
                backoff_jitter: 0.25,
                request_timeout: Duration::from_secs(20),
                overall_timeout: Some(Duration::from_secs(180)),
                cache_ttl: Duration::from_secs(10 * 60),
                ..defaults
            },
        }
    }
}

impl fmt::Display for UpstreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UpstreamSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpstreamSource::ALL
            .into_iter()
            .find(|source| source.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown upstream source: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for source in UpstreamSource::ALL {
            source
                .config()
                .validate()
                .unwrap_or_else(|err| panic!("{source}: {err}"));
        }
    }

    #[test]
    fn jikan_has_two_budgets() {
        let quotas: Vec<_> = UpstreamSource::Jikan.config().quotas().collect();
        assert_eq!(
            quotas,
            vec![(3, Duration::from_secs(1)), (60, Duration::from_secs(60))]
        );
    }

    #[test]
    fn aniskip_caches_for_a_day() {
        assert_eq!(UpstreamSource::AniSkip.config().cache_ttl, DAY);
        assert!(UpstreamSource::Jikan.config().cache_ttl.is_zero());
    }

    #[test]
    fn parses_names() {
        assert_eq!("AniList".parse::<UpstreamSource>().unwrap(), UpstreamSource::AniList);
        assert_eq!(" kitsu ".parse::<UpstreamSource>().unwrap(), UpstreamSource::Kitsu);
        assert!("mal".parse::<UpstreamSource>().is_err());
        assert_eq!(UpstreamSource::Scraped.base_url(), None);
    }
}
