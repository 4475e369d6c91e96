//! Browser version → TLS fingerprint tables.
//!
//! Each family owns a table sorted by descending `min_version` and closed by
//! a sentinel entry with `min_version = 0`, so lookup is total.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{BrowserFamily, CatalogError};

/// Opaque handle naming one pre-defined ClientHello shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintId {
    Chrome131,
    Chrome120,
    Chrome106,
    Chrome83,
    Firefox128,
    Firefox120,
    Firefox102,
    Firefox65,
    Safari17,
    Safari16,
    Safari13,
}

impl FingerprintId {
    pub const ALL: &'static [FingerprintId] = &[
        FingerprintId::Chrome131,
        FingerprintId::Chrome120,
        FingerprintId::Chrome106,
        FingerprintId::Chrome83,
        FingerprintId::Firefox128,
        FingerprintId::Firefox120,
        FingerprintId::Firefox102,
        FingerprintId::Firefox65,
        FingerprintId::Safari17,
        FingerprintId::Safari16,
        FingerprintId::Safari13,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintMapping {
    pub min_version: u32,
    pub fingerprint: FingerprintId,
}

impl FingerprintMapping {
    pub const fn new(min_version: u32, fingerprint: FingerprintId) -> Self {
        Self {
            min_version,
            fingerprint,
        }
    }
}

/// Descending-sorted mapping list with a guaranteed `min_version = 0` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintTable {
    mappings: Vec<FingerprintMapping>,
}

impl FingerprintTable {
    /// Sorts `mappings` by descending `min_version`. Fails without a sentinel.
    pub fn new(mut mappings: Vec<FingerprintMapping>) -> Result<Self, CatalogError> {
        mappings.sort_by(|a, b| b.min_version.cmp(&a.min_version));
        if mappings.last().map(|m| m.min_version) != Some(0) {
            return Err(CatalogError::MissingSentinel);
        }
        Ok(Self { mappings })
    }

    /// First mapping whose `min_version <= version`; the sentinel otherwise.
    pub fn select(&self, version: u32) -> FingerprintId {
        self.mappings
            .iter()
            .find(|mapping| mapping.min_version <= version)
            .or(self.mappings.last())
            .map(|mapping| mapping.fingerprint)
            .unwrap_or(FingerprintId::Chrome83)
    }

    pub fn mappings(&self) -> &[FingerprintMapping] {
        &self.mappings
    }

    /// Built-in table for `family`.
    pub fn for_family(family: BrowserFamily) -> &'static FingerprintTable {
        match family {
            BrowserFamily::Chrome => &CHROME_TABLE,
            BrowserFamily::Edge => &EDGE_TABLE,
            BrowserFamily::Firefox => &FIREFOX_TABLE,
            BrowserFamily::Safari => &SAFARI_TABLE,
        }
    }
}

fn builtin(mappings: &[FingerprintMapping]) -> FingerprintTable {
    FingerprintTable {
        mappings: mappings.to_vec(),
    }
}

const CHROMIUM_MAPPINGS: &[FingerprintMapping] = &[
    FingerprintMapping::new(131, FingerprintId::Chrome131),
    FingerprintMapping::new(120, FingerprintId::Chrome120),
    FingerprintMapping::new(106, FingerprintId::Chrome106),
    FingerprintMapping::new(0, FingerprintId::Chrome83),
];

const FIREFOX_MAPPINGS: &[FingerprintMapping] = &[
    FingerprintMapping::new(128, FingerprintId::Firefox128),
    FingerprintMapping::new(120, FingerprintId::Firefox120),
    FingerprintMapping::new(102, FingerprintId::Firefox102),
    FingerprintMapping::new(0, FingerprintId::Firefox65),
];

const SAFARI_MAPPINGS: &[FingerprintMapping] = &[
    FingerprintMapping::new(17, FingerprintId::Safari17),
    FingerprintMapping::new(16, FingerprintId::Safari16),
    FingerprintMapping::new(0, FingerprintId::Safari13),
];

static CHROME_TABLE: Lazy<FingerprintTable> = Lazy::new(|| builtin(CHROMIUM_MAPPINGS));
static EDGE_TABLE: Lazy<FingerprintTable> = Lazy::new(|| builtin(CHROMIUM_MAPPINGS));
static FIREFOX_TABLE: Lazy<FingerprintTable> = Lazy::new(|| builtin(FIREFOX_MAPPINGS));
static SAFARI_TABLE: Lazy<FingerprintTable> = Lazy::new(|| builtin(SAFARI_MAPPINGS));

static CHROME_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Chrome/(\d+)").expect("invalid chrome version regex"));
static EDGE_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Edg/(\d+)").expect("invalid edge version regex"));
static FIREFOX_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Firefox/(\d+)").expect("invalid firefox version regex"));
static SAFARI_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version/(\d+)").expect("invalid safari version regex"));

/// Major version from a user-agent, using the family-specific pattern.
/// Anything unparseable is version 0, which always lands on the sentinel.
pub fn parse_major_version(family: BrowserFamily, user_agent: &str) -> u32 {
    let pattern = match family {
        BrowserFamily::Chrome => &*CHROME_VERSION_RE,
        BrowserFamily::Edge => &*EDGE_VERSION_RE,
        BrowserFamily::Firefox => &*FIREFOX_VERSION_RE,
        BrowserFamily::Safari => &*SAFARI_VERSION_RE,
    };

    pattern
        .captures(user_agent)
        .and_then(|caps| caps.get(1))
        .and_then(|version| version.as_str().parse().ok())
        .unwrap_or(0)
}

/// Fingerprint handle for `user_agent` within `family`.
pub fn resolve_fingerprint(family: BrowserFamily, user_agent: &str) -> FingerprintId {
    let version = parse_major_version(family, user_agent);
    FingerprintTable::for_family(family).select(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_monotonic() {
        let table = FingerprintTable::new(vec![
            FingerprintMapping::new(0, FingerprintId::Safari13),
            FingerprintMapping::new(120, FingerprintId::Chrome131),
            FingerprintMapping::new(100, FingerprintId::Chrome120),
        ])
        .unwrap();

        assert_eq!(table.select(125), FingerprintId::Chrome131);
        assert_eq!(table.select(120), FingerprintId::Chrome131);
        assert_eq!(table.select(110), FingerprintId::Chrome120);
        assert_eq!(table.select(50), FingerprintId::Safari13);
        assert_eq!(table.select(0), FingerprintId::Safari13);
    }

    #[test]
    fn table_without_sentinel_is_rejected() {
        let err = FingerprintTable::new(vec![FingerprintMapping::new(
            100,
            FingerprintId::Chrome120,
        )])
        .unwrap_err();
        assert!(matches!(err, CatalogError::MissingSentinel));
    }

    #[test]
    fn builtin_tables_are_sorted_and_closed() {
        for family in BrowserFamily::ALL {
            let mappings = FingerprintTable::for_family(*family).mappings();
            assert!(mappings.windows(2).all(|w| w[0].min_version > w[1].min_version));
            assert_eq!(mappings.last().map(|m| m.min_version), Some(0));
        }
    }

    #[test]
    fn resolves_from_user_agent() {
        let chrome = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
        let edge = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0";
        let firefox = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0";
        assert_eq!(resolve_fingerprint(BrowserFamily::Chrome, chrome), FingerprintId::Chrome120);
        assert_eq!(resolve_fingerprint(BrowserFamily::Edge, edge), FingerprintId::Chrome131);
        assert_eq!(resolve_fingerprint(BrowserFamily::Firefox, firefox), FingerprintId::Firefox102);
    }

    #[test]
    fn unparseable_version_falls_back_to_sentinel() {
        assert_eq!(parse_major_version(BrowserFamily::Safari, "curl/8.4.0"), 0);
        assert_eq!(
            resolve_fingerprint(BrowserFamily::Safari, "curl/8.4.0"),
            FingerprintId::Safari13
        );
        assert_eq!(
            resolve_fingerprint(BrowserFamily::Chrome, "Chrome/not-a-number"),
            FingerprintId::Chrome83
        );
    }
}
