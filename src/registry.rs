//! Site registry: the lookup tables consulted on every request.
//!
//! Built once from a parsed [`Settings`] document. Sites that fail
//! validation are logged and skipped; the rest stay usable. The registry is
//! immutable after the build, and [`SharedRegistry`] swaps whole registries
//! on reload so readers never see a half-built one.

use arc_swap::ArcSwap;
use http::HeaderName;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::RequestOrigin;
use crate::config::{Settings, SettingsError, Site, StaticToken};
use crate::keys::{AlgorithmError, KeyLoader, SiteAlgorithm};
use crate::token::ClaimProfile;
use crate::types::SiteUrl;

/// Key of the algorithm and anonymous-access tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteKey {
    Url(SiteUrl),
    /// Fallback entry for issuers and hosts no site claims.
    Default,
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Why a site was left out of the registry.
#[derive(Debug)]
pub enum SiteError {
    /// Both `key` and `path` were given.
    AmbiguousKeySource,
    /// Neither `key` nor `path` was given.
    NoKeySource,
    /// A non-default site without a `url`.
    MissingUrl,
    /// A default site was already accepted.
    DuplicateDefault,
    /// The key could not be loaded or bound to the algorithm.
    Algorithm(AlgorithmError),
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousKeySource => write!(f, "only one of key or path may be given"),
            Self::NoKeySource => write!(f, "one of key or path must be given"),
            Self::MissingUrl => write!(f, "non-default site has no url"),
            Self::DuplicateDefault => write!(f, "a default site is already defined"),
            Self::Algorithm(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Algorithm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AlgorithmError> for SiteError {
    fn from(e: AlgorithmError) -> Self {
        Self::Algorithm(e)
    }
}

#[derive(Debug, Clone)]
struct AnonymousOrigin {
    url: Url,
    site: SiteUrl,
}

/// Validated, ready-to-use view of a settings document.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    algorithms: HashMap<SiteKey, SiteAlgorithm>,
    static_tokens: HashMap<String, StaticToken>,
    anonymous: HashMap<SiteKey, bool>,
    anonymous_origins: Vec<AnonymousOrigin>,
    disabled: bool,
    role_header: Option<HeaderName>,
    claim_profiles: Vec<ClaimProfile>,
}

impl SiteRegistry {
    /// Build the registry. Never fails: bad sites and tokens are skipped.
    pub fn build(settings: &Settings, loader: &KeyLoader) -> Self {
        let role_header = settings.role_header.as_deref().and_then(|name| {
            HeaderName::try_from(name.trim())
                .inspect_err(|e| warn!(header = name, error = %e, "Ignoring invalid role header name"))
                .ok()
        });

        let mut registry = Self {
            algorithms: HashMap::new(),
            static_tokens: HashMap::new(),
            anonymous: HashMap::new(),
            anonymous_origins: Vec::new(),
            disabled: settings.disabled,
            role_header,
            claim_profiles: settings.claim_profiles.clone(),
        };

        for site in &settings.sites {
            match registry.add_site(site, loader) {
                Ok(key) => info!(site = %key, algorithm = %site.algorithm, "Registered site"),
                Err(e) => warn!(site = site.label(), error = %e, "Skipping site"),
            }
        }

        for token in &settings.tokens {
            registry.add_static_token(token);
        }

        info!(
            sites = registry.algorithms.len(),
            tokens = registry.static_tokens.len(),
            disabled = registry.disabled,
            "Site registry built"
        );

        registry
    }

    /// Read the settings file and build from it.
    pub fn load(path: &Path, loader: &KeyLoader) -> Result<Self, SettingsError> {
        let settings = Settings::load(path)?;
        Ok(Self::build(&settings, loader))
    }

    fn add_site(&mut self, site: &Site, loader: &KeyLoader) -> Result<SiteKey, SiteError> {
        match (site.key_defined(), site.path_defined()) {
            (true, true) => return Err(SiteError::AmbiguousKeySource),
            (false, false) => return Err(SiteError::NoKeySource),
            _ => {}
        }

        if let Some(path) = site.path.as_deref().filter(|_| site.path_defined()) {
            loader
                .expand_path(path)
                .map_err(|e| SiteError::Algorithm(e.into()))?;
        }

        let algorithm = SiteAlgorithm::resolve(site, loader)?;

        let url = site.url.as_deref().map(str::trim).unwrap_or_default();
        if !site.is_default && url.is_empty() {
            return Err(SiteError::MissingUrl);
        }

        if site.is_default && self.algorithms.contains_key(&SiteKey::Default) {
            return Err(SiteError::DuplicateDefault);
        }

        let key = if site.is_default {
            SiteKey::Default
        } else {
            let site_url = SiteUrl::new(url);
            self.index_anonymous_origin(&site_url);
            SiteKey::Url(site_url)
        };

        if self.algorithms.insert(key.clone(), algorithm).is_some() {
            warn!(site = %key, "Site declared twice; the later declaration replaces the earlier one");
        }
        self.anonymous.insert(key.clone(), site.allow_anonymous_get);

        Ok(key)
    }

    fn index_anonymous_origin(&mut self, site: &SiteUrl) {
        self.anonymous_origins.retain(|o| &o.site != site);
        match Url::parse(site.as_str()) {
            Ok(url) if url.has_host() => self.anonymous_origins.push(AnonymousOrigin {
                url,
                site: site.clone(),
            }),
            _ => warn!(site = %site, "Site url is not an absolute URL; it will not match request hosts"),
        }
    }

    fn add_static_token(&mut self, token: &StaticToken) {
        if token.value.is_empty() {
            warn!(user = %token.user, "Ignoring static token with an empty value");
            return;
        }

        let fingerprint = token_fingerprint(&token.value);
        if self
            .static_tokens
            .insert(token.value.clone(), token.clone())
            .is_some()
        {
            warn!(token = %fingerprint, "Static token declared twice; the later declaration wins");
        }
        debug!(token = %fingerprint, user = %token.user, "Registered static token");
    }

    /// Algorithm for an issuer URL, falling back to the default site.
    pub fn algorithm_for(&self, issuer: &str) -> Option<&SiteAlgorithm> {
        self.algorithms
            .get(&SiteKey::Url(SiteUrl::new(issuer)))
            .or_else(|| self.algorithms.get(&SiteKey::Default))
    }

    pub fn static_token(&self, value: &str) -> Option<&StaticToken> {
        self.static_tokens.get(value)
    }

    /// Whether unauthenticated safe-method requests to `origin` are allowed.
    ///
    /// Only a site whose URL is exactly the request's origin decides; sites
    /// mounted under a path never do. Without a match the default site
    /// decides, and without a default the answer is no.
    pub fn allows_anonymous(&self, origin: &RequestOrigin) -> bool {
        let matched = self
            .anonymous_origins
            .iter()
            .rev()
            .find(|o| origin.matches(&o.url));

        let key = match matched {
            Some(o) => SiteKey::Url(o.site.clone()),
            None => SiteKey::Default,
        };
        self.anonymous.get(&key).copied().unwrap_or(false)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Outbound header carrying the comma-joined role list.
    pub fn role_header(&self) -> Option<&HeaderName> {
        self.role_header.as_ref()
    }

    pub fn claim_profiles(&self) -> &[ClaimProfile] {
        &self.claim_profiles
    }

    /// Accepted sites, ordered by key with the default last.
    pub fn sites(&self) -> Vec<(&SiteKey, &SiteAlgorithm, bool)> {
        let mut sites: Vec<_> = self
            .algorithms
            .iter()
            .map(|(key, alg)| (key, alg, self.anonymous.get(key).copied().unwrap_or(false)))
            .collect();
        sites.sort_by(|a, b| a.0.cmp(b.0));
        sites
    }

    pub fn static_token_count(&self) -> usize {
        self.static_tokens.len()
    }
}

/// Short SHA-256 fingerprint for naming a static token in logs.
pub fn token_fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("{:x}", digest)[..12].to_string()
}

/// A registry that can be replaced atomically while requests read it.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<ArcSwap<SiteRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: SiteRegistry) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(registry)),
        }
    }

    /// Snapshot of the current registry. Lock-free.
    pub fn current(&self) -> Arc<SiteRegistry> {
        self.inner.load_full()
    }

    pub fn replace(&self, registry: SiteRegistry) {
        self.inner.store(Arc::new(registry));
    }

    /// Rebuild from the settings file. On error the current registry stays.
    pub fn reload(&self, path: &Path, loader: &KeyLoader) -> Result<(), SettingsError> {
        let registry = SiteRegistry::load(path, loader)?;
        self.replace(registry);
        info!(path = %path.display(), "Settings reloaded");
        Ok(())
    }
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("current", &self.current())
            .finish()
    }
}
