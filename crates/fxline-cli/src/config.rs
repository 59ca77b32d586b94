//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fxline_cache::{Coordinator, SourceConfig};
use fxline_core::{Fetcher, SystemClock};
use fxline_ecb::EcbFetcher;
use fxline_store::{FileStore, KvStore};
use fxline_yahoo::YahooFetcher;
use serde::Deserialize;

/// Global configuration for fxline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub http: HttpSettings,
    /// Data sources by id. Replaces the built-in set when present.
    pub sources: BTreeMap<String, SourceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            http: HttpSettings::default(),
            sources: default_sources(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the shared file store
    #[serde(deserialize_with = "deserialize_env_path")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let dir = directories::ProjectDirs::from("", "", "fxline")
            .map(|d| d.data_dir().join("store"))
            .unwrap_or_else(|| PathBuf::from("./fxline-store"));
        Self { dir }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Seconds
    pub connect_timeout: u64,
    /// Seconds
    pub read_timeout: u64,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = fxline_core::HttpConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout.as_secs(),
            read_timeout: defaults.read_timeout.as_secs(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Ecb,
    Yahoo,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ecb => "ecb",
            Self::Yahoo => "yahoo",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub kind: SourceKind,
    /// Quoted currency (ecb)
    #[serde(default)]
    pub currency: Option<String>,
    /// Tickers covered by `refresh` (yahoo)
    #[serde(default)]
    pub tickers: Vec<String>,
    /// Upstream endpoint override
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub settings: SourceConfig,
}

impl SourceEntry {
    fn ecb(currency: &str, utc_offset_minutes: i32) -> Self {
        Self {
            kind: SourceKind::Ecb,
            currency: Some(currency.to_string()),
            tickers: Vec::new(),
            base_url: None,
            settings: SourceConfig {
                utc_offset_minutes,
                ..Default::default()
            },
        }
    }

    fn yahoo(utc_offset_minutes: i32) -> Self {
        Self {
            kind: SourceKind::Yahoo,
            currency: None,
            tickers: Vec::new(),
            base_url: None,
            settings: SourceConfig {
                utc_offset_minutes,
                ..Default::default()
            },
        }
    }

    /// Upstream adapter for this source.
    pub fn fetcher(&self) -> Result<Arc<dyn Fetcher>> {
        Ok(match self.kind {
            SourceKind::Ecb => {
                let currency = self.currency.as_deref().unwrap_or("USD");
                let mut fetcher = EcbFetcher::new(currency)?;
                if let Some(url) = &self.base_url {
                    fetcher = fetcher.with_base_url(url);
                }
                Arc::new(fetcher)
            }
            SourceKind::Yahoo => {
                let mut fetcher = YahooFetcher::new();
                if let Some(url) = &self.base_url {
                    fetcher = fetcher.with_base_url(url);
                }
                Arc::new(fetcher)
            }
        })
    }
}

/// ECB rates fix around 16:00 CET; NYSE closes in New York time.
fn default_sources() -> BTreeMap<String, SourceEntry> {
    BTreeMap::from([
        ("ecb-usd".to_string(), SourceEntry::ecb("USD", 60)),
        ("stocks".to_string(), SourceEntry::yahoo(-300)),
    ])
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    expand_env_var(&raw)
        .map(PathBuf::from)
        .ok_or_else(|| serde::de::Error::custom(format!("environment variable in {raw:?} is not set")))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./fxline.toml (current directory)
    /// 2. ~/.config/fxline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("fxline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "fxline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        for (id, entry) in &config.sources {
            entry
                .settings
                .validate()
                .with_context(|| format!("source {id}"))?;
        }
        Ok(config)
    }

    pub fn source(&self, id: &str) -> Result<&SourceEntry> {
        self.sources.get(id).with_context(|| {
            let known: Vec<&str> = self.sources.keys().map(String::as_str).collect();
            format!("Unknown source {id:?} (configured: {})", known.join(", "))
        })
    }

    /// Open the shared store.
    pub fn open_store(&self) -> Result<Arc<FileStore>> {
        let store = FileStore::open(&self.store.dir)
            .with_context(|| format!("Cannot open store at {}", self.store.dir.display()))?;
        Ok(Arc::new(store))
    }

    /// Coordinator for source `id` over `kv`, on the wall clock.
    pub fn coordinator(&self, id: &str, kv: Arc<dyn KvStore>) -> Result<Coordinator> {
        let entry = self.source(id)?;
        let coordinator = Coordinator::new(
            id,
            entry.settings.clone(),
            kv,
            entry.fetcher()?,
            Arc::new(SystemClock),
        )?;
        Ok(coordinator)
    }
}
