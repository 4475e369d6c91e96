//! Browser identity catalog.
//!
//! Responsibilities:
//! - Load header templates and user-agent strings from `browsers.json`.
//! - Pair every user-agent with the TLS fingerprint of its browser version.
//! - Hand out one immutable [`BrowserProfile`] per fetcher, chosen at random.
//!
//! Profiles are built once at startup and never mutated; callers borrow them
//! through `Arc`.

pub mod client_hello;
pub mod mapping;

use std::fmt;
use std::sync::{Arc, Mutex};

use http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client_hello::{ClientHelloSpec, client_hello_spec};
pub use mapping::{
    FingerprintId, FingerprintMapping, FingerprintTable, parse_major_version,
    resolve_fingerprint,
};

const BUILTIN_CATALOG: &str = include_str!("browsers.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
}

impl BrowserFamily {
    pub const ALL: &'static [BrowserFamily] = &[
        BrowserFamily::Chrome,
        BrowserFamily::Edge,
        BrowserFamily::Firefox,
        BrowserFamily::Safari,
    ];

    /// Guess the family from a raw user-agent. Edge and Chrome both carry
    /// `Chrome/`, and Chrome carries `Safari/`, so order matters.
    pub fn detect(user_agent: &str) -> Option<Self> {
        if user_agent.contains("Edg/") {
            Some(BrowserFamily::Edge)
        } else if user_agent.contains("Firefox/") {
            Some(BrowserFamily::Firefox)
        } else if user_agent.contains("Chrome/") {
            Some(BrowserFamily::Chrome)
        } else if user_agent.contains("Safari/") {
            Some(BrowserFamily::Safari)
        } else {
            None
        }
    }
}

impl fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrowserFamily::Chrome => "chrome",
            BrowserFamily::Edge => "edge",
            BrowserFamily::Firefox => "firefox",
            BrowserFamily::Safari => "safari",
        };
        f.write_str(name)
    }
}

/// Static description of the browsers to impersonate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCatalog {
    pub families: IndexMap<BrowserFamily, FamilyCatalog>,
}

/// Header template (in wire order) and user-agents for one family.
///
/// An empty `User-Agent` entry in the template marks where the user-agent
/// goes; without one it is sent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyCatalog {
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
}

impl BrowserCatalog {
    /// Catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("browser catalog JSON invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("browser catalog contains no user-agents")]
    Empty,
    #[error("invalid header '{name}' in browser catalog")]
    InvalidHeader { name: String },
    #[error("fingerprint table has no min_version = 0 sentinel")]
    MissingSentinel,
    #[error("cannot infer browser family from user-agent '{0}'")]
    UnknownBrowser(String),
    #[error("no header template for browser family '{0}'")]
    MissingTemplate(BrowserFamily),
}

/// One immutable browser identity.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserProfile {
    user_agent: String,
    headers: HeaderMap,
    fingerprint: FingerprintId,
    family: BrowserFamily,
    major_version: u32,
}

impl BrowserProfile {
    /// Build a profile from a family header template.
    pub fn from_template(
        family: BrowserFamily,
        user_agent: &str,
        template: &IndexMap<String, String>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            user_agent: user_agent.to_string(),
            headers: build_headers(user_agent, template)?,
            fingerprint: resolve_fingerprint(family, user_agent),
            family,
            major_version: parse_major_version(family, user_agent),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Header set in the order the browser sends it.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn fingerprint(&self) -> FingerprintId {
        self.fingerprint
    }

    pub fn family(&self) -> BrowserFamily {
        self.family
    }

    pub fn major_version(&self) -> u32 {
        self.major_version
    }

    pub fn client_hello(&self) -> &'static ClientHelloSpec {
        client_hello_spec(self.fingerprint)
    }
}

/// Catalog of pre-built profiles plus the random source used to pick one.
pub struct FingerprintRegistry {
    profiles: Vec<Arc<BrowserProfile>>,
    templates: IndexMap<BrowserFamily, IndexMap<String, String>>,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for FingerprintRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintRegistry")
            .field("profiles", &self.profiles.len())
            .field("families", &self.templates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FingerprintRegistry {
    /// Registry over the embedded `browsers.json`.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_catalog(&BrowserCatalog::builtin()?)
    }

    pub fn from_catalog(catalog: &BrowserCatalog) -> Result<Self, CatalogError> {
        let mut profiles = Vec::new();
        for (family, entry) in &catalog.families {
            for user_agent in &entry.user_agents {
                let profile = BrowserProfile::from_template(*family, user_agent, &entry.headers)?;
                log::debug!(
                    "catalog profile {} v{} -> {:?}",
                    family,
                    profile.major_version(),
                    profile.fingerprint()
                );
                profiles.push(Arc::new(profile));
            }
        }

        if profiles.is_empty() {
            return Err(CatalogError::Empty);
        }

        let templates = catalog
            .families
            .iter()
            .map(|(family, entry)| (*family, entry.headers.clone()))
            .collect();

        Ok(Self {
            profiles,
            templates,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Replace the random source, e.g. with a seeded one in tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    /// Uniform random pick across every catalog profile.
    pub fn select_profile(&self) -> Arc<BrowserProfile> {
        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(0..self.profiles.len())
        };
        Arc::clone(&self.profiles[index])
    }

    /// Profile for a caller-pinned user-agent, using its family's template.
    pub fn custom_profile(&self, user_agent: &str) -> Result<Arc<BrowserProfile>, CatalogError> {
        if let Some(existing) = self.profiles.iter().find(|p| p.user_agent() == user_agent) {
            return Ok(Arc::clone(existing));
        }

        let family = BrowserFamily::detect(user_agent)
            .ok_or_else(|| CatalogError::UnknownBrowser(user_agent.to_string()))?;
        let template = self
            .templates
            .get(&family)
            .ok_or(CatalogError::MissingTemplate(family))?;
        Ok(Arc::new(BrowserProfile::from_template(family, user_agent, template)?))
    }

    pub fn profiles(&self) -> &[Arc<BrowserProfile>] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn build_headers(
    user_agent: &str,
    template: &IndexMap<String, String>,
) -> Result<HeaderMap, CatalogError> {
    let mut headers = HeaderMap::with_capacity(template.len() + 1);
    let has_slot = template
        .keys()
        .any(|name| name.eq_ignore_ascii_case("user-agent"));
    if !has_slot {
        insert_header(&mut headers, "User-Agent", user_agent)?;
    }

    for (name, value) in template {
        if name.eq_ignore_ascii_case("user-agent") {
            insert_header(&mut headers, name, user_agent)?;
        } else {
            insert_header(&mut headers, name, value)?;
        }
    }
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), CatalogError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| CatalogError::InvalidHeader { name: name.to_string() })?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| CatalogError::InvalidHeader { name: name.to_string() })?;
    headers.insert(header_name, header_value);
    Ok(())
}
