use crate::capture::{FrameEncoding, StreamConstraints};
use crate::speech::SpeechParams;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/analyze";
pub const DEFAULT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_FRAMES_DIR: &str = "frames";
pub const ENV_ENDPOINT: &str = "MOODY_MIRROR_ENDPOINT";
pub const ENV_INTERVAL_MS: &str = "MOODY_MIRROR_INTERVAL_MS";
pub const ENV_FRAMES_DIR: &str = "MOODY_MIRROR_FRAMES_DIR";
pub const ENV_PAGE_URL: &str = "MOODY_MIRROR_PAGE_URL";

/// Where the analysis service lives. Only `http` and `https` are accepted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(value.trim())
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{value}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            other => Err(ConfigError::InvalidEndpoint(format!(
                "{value}: unsupported scheme '{other}'"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Root of the service, used for the health probe.
    pub fn origin_root(&self) -> Url {
        let mut root = self.0.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleInterval {
    pub period_ms: u64,
}

impl CycleInterval {
    pub fn new(period_ms: u64) -> Result<Self, ConfigError> {
        if period_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self { period_ms })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for CycleInterval {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnalysisBackend {
    #[default]
    Remote,
    /// Local canned roasts, no network.
    Canned,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub endpoint: Endpoint,
    pub interval: CycleInterval,
    pub encoding: FrameEncoding,
    pub constraints: StreamConstraints,
    pub speech: SpeechParams,
    pub request_timeout: Option<Duration>,
    pub page_url: Option<Url>,
    pub frames_dir: PathBuf,
    pub backend: AnalysisBackend,
}

impl AppConfig {
    /// Every other setting at its default.
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            interval: CycleInterval::default(),
            encoding: FrameEncoding::default(),
            constraints: StreamConstraints::default(),
            speech: SpeechParams::default(),
            request_timeout: None,
            page_url: None,
            frames_dir: PathBuf::from(DEFAULT_FRAMES_DIR),
            backend: AnalysisBackend::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid analysis endpoint {0}")]
    InvalidEndpoint(String),
    #[error("invalid page url {0}")]
    InvalidPageUrl(String),
    #[error("cycle interval must be > 0 ms")]
    ZeroInterval,
    #[error("interval is not a number of milliseconds: {0}")]
    InvalidInterval(String),
    #[error("frame quality must be within (0, 1], got {0}")]
    QualityOutOfRange(String),
}

/// Process environment lookup, swappable in tests.
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;

    /// Like [`Env::var`], but an exported-but-blank variable counts as unset.
    fn setting(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    settings: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.settings.get(key).cloned()
    }
}

pub fn resolve_endpoint(cli_value: Option<String>, env: &impl Env) -> Result<Endpoint, ConfigError> {
    let raw = resolve_string_with_default(cli_value, ENV_ENDPOINT, env, DEFAULT_ENDPOINT);
    Endpoint::parse(&raw)
}

pub fn resolve_interval(cli_value: Option<u64>, env: &impl Env) -> Result<CycleInterval, ConfigError> {
    match cli_value {
        Some(ms) => CycleInterval::new(ms),
        None => match env.setting(ENV_INTERVAL_MS) {
            Some(raw) => {
                let ms = raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidInterval(raw.clone()))?;
                CycleInterval::new(ms)
            }
            None => Ok(CycleInterval::default()),
        },
    }
}

pub fn resolve_page_url(cli_value: Option<String>, env: &impl Env) -> Result<Option<Url>, ConfigError> {
    match resolve_optional_string(cli_value, ENV_PAGE_URL, env) {
        Some(raw) => Url::parse(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidPageUrl(format!("{raw}: {e}"))),
        None => Ok(None),
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    cli_value
        .or_else(|| env.setting(env_key))
        .unwrap_or_else(|| default.to_owned())
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    cli_value.or_else(|| env.setting(env_key))
}
