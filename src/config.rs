use crate::cloudflare_bypass::{FlareSolverrClient, FlareSolverrConfig};
use crate::engine::EngineSettings;
use crate::error::ScanError;
use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
use crate::request::{DirectHttp, Fetcher};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub descriptors_path: PathBuf,
    pub database_path: PathBuf,
    pub log_config: PathBuf,
    pub requests: RequestsConfig,
    pub flaresolverr: FlareSolverrSettings,
    pub scheduler: SchedulerConfig,
    /// Per-source overrides, keyed by source name.
    pub sources: BTreeMap<String, SourceOverride>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RequestsConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries of the emulated client on 429 and 5xx answers
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// How long a successful response is reused
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlareSolverrSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_flaresolverr_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_flaresolverr_timeout")]
    pub max_timeout_ms: u64,

    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Primary (front page) sweep interval
    #[serde(default = "default_update_interval")]
    pub update_interval_mins: u64,

    /// Full sweep interval
    #[serde(default = "default_backup_interval")]
    pub backup_interval_hours: u64,

    #[serde(default = "default_backup_startup_delay")]
    pub backup_startup_delay_secs: u64,

    /// Delay between two requests to the same source
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: u64,

    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub include_premium: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceOverride {
    #[serde(default)]
    pub check_interval_mins: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool { true }
fn default_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_cache_ttl() -> u64 { 30 }
fn default_flaresolverr_url() -> String { "http://localhost:8191".to_string() }
fn default_flaresolverr_timeout() -> u64 { 60_000 }
fn default_rotation_interval() -> u64 { 600 }
fn default_update_interval() -> u64 { 25 }
fn default_backup_interval() -> u64 { 6 }
fn default_backup_startup_delay() -> u64 { 300 }
fn default_request_delay() -> u64 { 20 }
fn default_max_concurrent_sources() -> usize { 10 }
fn default_failure_threshold() -> u32 { 5 }

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            enable_cookies: true,
            enable_compression: true,
            cache_ttl_secs: default_cache_ttl(),
            proxy_url: None,
        }
    }
}

impl Default for FlareSolverrSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_flaresolverr_url(),
            api_key: None,
            max_timeout_ms: default_flaresolverr_timeout(),
            proxies: Vec::new(),
            rotation_interval_secs: default_rotation_interval(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_mins: default_update_interval(),
            backup_interval_hours: default_backup_interval(),
            backup_startup_delay_secs: default_backup_startup_delay(),
            request_delay_secs: default_request_delay(),
            max_concurrent_sources: default_max_concurrent_sources(),
            failure_threshold: default_failure_threshold(),
            include_premium: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            descriptors_path: PathBuf::from("scanlators.json"),
            database_path: PathBuf::from("manga.db"),
            log_config: PathBuf::from("log4rs.yml"),
            requests: RequestsConfig::default(),
            flaresolverr: FlareSolverrSettings::default(),
            scheduler: SchedulerConfig::default(),
            sources: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    /// Defaults when the file is missing; a file that exists but does not
    /// parse is logged and ignored.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No {} found, using default settings", path.display());
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).unwrap_or_else(|e| {
                log::error!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::error!("Cannot read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ScanError> {
        toml::from_str::<Config>(content)
            .map_err(|e| ScanError::configuration("config.toml", e.to_string()))
    }

    /// Sources switched off in the configuration file.
    pub fn disabled_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|(_, o)| !o.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let source_intervals: HashMap<String, Duration> = self
            .sources
            .iter()
            .filter_map(|(name, o)| {
                o.check_interval_mins
                    .map(|mins| (name.clone(), Duration::from_secs(mins * 60)))
            })
            .collect();
        EngineSettings {
            request_delay: Duration::from_secs(self.scheduler.request_delay_secs),
            failure_threshold: self.scheduler.failure_threshold.max(1),
            max_concurrent_sources: self.scheduler.max_concurrent_sources.max(1),
            include_premium: self.scheduler.include_premium,
            default_interval: Duration::from_secs(self.scheduler.update_interval_mins * 60),
            source_intervals,
        }
    }
}

impl RequestsConfig {
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            enable_cookies: self.enable_cookies,
            enable_gzip: self.enable_compression,
            proxy_url: self.proxy_url.clone(),
        }
    }
}

impl FlareSolverrSettings {
    pub fn client_config(&self) -> FlareSolverrConfig {
        FlareSolverrConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            max_timeout_ms: self.max_timeout_ms,
            proxies: self.proxies.clone(),
            rotation_interval_secs: self.rotation_interval_secs,
        }
    }
}

/// Fetcher with every request strategy the configuration enables.
pub fn build_fetcher(config: &Config) -> Result<Fetcher, ScanError> {
    let requests = &config.requests;
    let client_error = |e: reqwest::Error| ScanError::configuration("requests", e.to_string());

    let direct = DirectHttp::new(
        Duration::from_secs(requests.timeout_secs),
        requests.proxy_url.as_deref(),
    )
    .map_err(client_error)?;
    let emulated = EnhancedHttpClient::with_config(requests.http_client_config()).map_err(client_error)?;

    let mut fetcher = Fetcher::new(Duration::from_secs(requests.cache_ttl_secs))
        .with_strategy(Arc::new(direct))
        .with_strategy(Arc::new(emulated));

    if config.flaresolverr.enabled {
        let flare = FlareSolverrClient::new(config.flaresolverr.client_config()).map_err(client_error)?;
        fetcher = fetcher.with_strategy(Arc::new(flare));
        log::info!("FlareSolverr enabled at {}", config.flaresolverr.base_url);
    }
    Ok(fetcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RequestKind;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.scheduler.update_interval_mins, 25);
        assert_eq!(config.scheduler.failure_threshold, 5);
        assert_eq!(config.requests.cache_ttl_secs, 30);
        assert!(!config.flaresolverr.enabled);
    }

    #[test]
    fn test_source_overrides() {
        let config = Config::from_toml(
            r#"
            [scheduler]
            request_delay_secs = 0

            [sources.mangapark]
            check_interval_mins = 60

            [sources.hivetoon]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.disabled_sources(), vec!["hivetoon"]);

        let settings = config.engine_settings();
        assert_eq!(settings.request_delay, Duration::ZERO);
        assert_eq!(settings.source_intervals["mangapark"], Duration::from_secs(3600));
        assert!(!settings.source_intervals.contains_key("hivetoon"));
    }

    #[test]
    fn test_bad_value_is_a_configuration_error() {
        let err = Config::from_toml("[scheduler]\nupdate_interval_mins = \"soon\"").unwrap_err();
        assert!(matches!(err, ScanError::Configuration { .. }));
    }

    #[test]
    fn test_proxy_strategy_only_when_enabled() {
        let mut config = Config::default();
        let fetcher = build_fetcher(&config).unwrap();
        assert!(fetcher.supports(RequestKind::Direct));
        assert!(fetcher.supports(RequestKind::Emulated));
        assert!(!fetcher.supports(RequestKind::ProxyRouted));

        config.flaresolverr.enabled = true;
        let fetcher = build_fetcher(&config).unwrap();
        assert!(fetcher.supports(RequestKind::ProxyRouted));
    }
}
