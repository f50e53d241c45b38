use crate::archive::{extract_archive, mark_bin_executables};
use crate::download::{fetch_bytes, fetch_cached};
use crate::layout::InstallLayout;
use crate::ProvisionError;
use bosun_schema::RuntimeId;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// A source of managed runtime kits.
///
/// Providers are constructor-injected into the orchestrator; there is no
/// global registry. `can_provide` claims an identifier; `provide`
/// materializes the kit and returns its path.
pub trait RuntimeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Higher priority wins among providers claiming the same identifier.
    fn priority(&self) -> u32;

    fn can_provide(&self, id: &RuntimeId) -> bool;

    fn provide(&self, id: &RuntimeId) -> Result<PathBuf, ProvisionError>;
}

/// Resolves runtime identifiers through an ordered provider set, caching
/// each result for the orchestrator's lifetime. A resolved path never
/// changes once handed out.
pub struct RuntimeResolver {
    providers: Vec<Box<dyn RuntimeProvider>>,
    cache: Mutex<HashMap<RuntimeId, PathBuf>>,
}

impl RuntimeResolver {
    pub fn new(mut providers: Vec<Box<dyn RuntimeProvider>>) -> Self {
        // Stable sort keeps registration order among equal priorities.
        providers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self {
            providers,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, id: &RuntimeId) -> Result<PathBuf, ProvisionError> {
        if let Some(path) = self.lock_cache().get(id).cloned() {
            debug!("runtime {id} resolved from cache: {}", path.display());
            return Ok(path);
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.can_provide(id))
            .ok_or_else(|| ProvisionError::NoProvider(id.to_string()))?;

        info!("resolving runtime {id} via provider '{}'", provider.name());
        let path = provider.provide(id)?;

        // First resolution wins even if another code path raced us here.
        let mut cache = self.lock_cache();
        let entry = cache.entry(id.clone()).or_insert_with(|| path.clone());
        Ok(entry.clone())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<RuntimeId, PathBuf>> {
        match self.cache.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Serves the runtime kit the host process itself runs on.
///
/// Claims every identifier at low priority, so it acts as the fallback when
/// no download-backed provider claims the id first.
pub struct HostRuntimeProvider {
    home: PathBuf,
    priority: u32,
}

impl HostRuntimeProvider {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            priority: 10,
        }
    }

    pub fn with_priority(home: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            home: home.into(),
            priority,
        }
    }
}

impl RuntimeProvider for HostRuntimeProvider {
    fn name(&self) -> &str {
        "host-runtime"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_provide(&self, _id: &RuntimeId) -> bool {
        self.home.is_dir()
    }

    fn provide(&self, _id: &RuntimeId) -> Result<PathBuf, ProvisionError> {
        Ok(self.home.clone())
    }
}

/// Downloads a named runtime distribution from a public release index.
///
/// The index is a JSON array of releases; the provider picks the release
/// whose tag matches the requested version, filters its assets by OS,
/// architecture, and build variant, drops pre-release/debug/test assets,
/// and installs the first remaining one.
pub struct ReleaseIndexProvider {
    index_url: String,
    os: String,
    arch: String,
    layout: InstallLayout,
    priority: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

/// Asset-name tokens that disqualify a candidate outright.
const EXCLUDED_TOKENS: &[&str] = &["ea", "rc", "beta", "debug", "test", "testimage", "sources", "sbom"];

impl ReleaseIndexProvider {
    pub fn new(index_url: impl Into<String>, layout: InstallLayout) -> Self {
        Self {
            index_url: index_url.into(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            layout,
            priority: 50,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn select_asset<'a>(&self, release: &'a Release, id: &RuntimeId) -> Option<&'a Asset> {
        release.assets.iter().find(|asset| {
            let lower = asset.name.to_lowercase();
            lower.contains(&self.os.to_lowercase())
                && lower.contains(&self.arch.to_lowercase())
                && lower.contains(&id.variant.to_lowercase())
                && !has_excluded_token(&lower)
        })
    }
}

fn has_excluded_token(name: &str) -> bool {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| EXCLUDED_TOKENS.contains(&token))
}

fn matches_version(tag: &str, version: &str) -> bool {
    tag == version || tag.trim_start_matches('v') == version
}

impl RuntimeProvider for ReleaseIndexProvider {
    fn name(&self) -> &str {
        "release-index"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_provide(&self, id: &RuntimeId) -> bool {
        !id.version.is_empty()
    }

    fn provide(&self, id: &RuntimeId) -> Result<PathBuf, ProvisionError> {
        let kit = self.layout.runtime_kit(&id.dir_name());
        if kit.exists() {
            debug!("runtime kit already installed at {}", kit.display());
            return Ok(kit);
        }
        self.layout.initialize()?;

        let body = fetch_bytes(&self.agent, &self.index_url)?;
        let releases: Vec<Release> =
            serde_json::from_slice(&body).map_err(|e| ProvisionError::MalformedIndex {
                url: self.index_url.clone(),
                detail: e.to_string(),
            })?;

        let release = releases
            .iter()
            .find(|r| !r.prerelease && matches_version(&r.tag_name, &id.version))
            .ok_or_else(|| ProvisionError::NoMatchingAsset(id.to_string()))?;

        let asset = self
            .select_asset(release, id)
            .ok_or_else(|| ProvisionError::NoMatchingAsset(id.to_string()))?;

        info!("installing runtime {id} from asset '{}'", asset.name);
        let archive = fetch_cached(
            &self.agent,
            &asset.browser_download_url,
            &self.layout.download_dir(),
            &asset.name,
        )?;

        if let Err(e) = extract_archive(&archive, &kit) {
            let _ = std::fs::remove_dir_all(&kit);
            return Err(e);
        }
        mark_bin_executables(&kit)?;

        Ok(kit)
    }
}
