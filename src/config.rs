//! Configuration loading and constants.
//!
//! Builds the service configuration once at startup: compiled-in defaults,
//! then an optional TOML file, then the process environment. The result is
//! validated before anything binds or touches the filesystem, and is shared
//! read-only (behind `Arc`) for the rest of the process lifetime.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

// =============================================================================
// Service identity
// =============================================================================

/// Service name reported by `/` and `/api/health`
pub const SERVICE_NAME: &str = "SongGeneration API";

/// Service version reported by `/`
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// HTTP defaults
// =============================================================================

/// Default bind address (all interfaces, as inside a container)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listening port. The container image and the application both use
/// 10000; the 7860 advertised by the model card is not used.
pub const DEFAULT_PORT: u16 = 10000;

/// Path of the liveness endpoint
pub const HEALTH_PATH: &str = "/api/health";

/// Routes the health path may not shadow
const RESERVED_PATHS: &[&str] = &[
    "/",
    "/api/generate",
    "/api/generate-music",
    "/api/generate-pure-music",
    "/api/genres",
];

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Generated files get unique names, so they never change once written
pub const HTTP_CACHE_OUTPUT_MAX_AGE: u32 = 86400;

/// Genre list only changes with a new release
pub const HTTP_CACHE_GENRES_MAX_AGE: u32 = 300;

pub const CACHE_CONTROL_OUTPUT: &str =
    formatcp!("public, max-age={}, immutable", HTTP_CACHE_OUTPUT_MAX_AGE);

pub const CACHE_CONTROL_GENRES: &str = formatcp!("public, max-age={}", HTTP_CACHE_GENRES_MAX_AGE);

/// Health and generation responses must never be served from a cache
pub const CACHE_CONTROL_NO_STORE: &str = "no-store";

// =============================================================================
// Container health check defaults
// =============================================================================

/// Seconds between probes
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Budget for a whole probe, enforced by the monitor
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;

/// Budget for the HTTP request inside a probe
pub const DEFAULT_HEALTH_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Grace window after start during which failures do not count
pub const DEFAULT_HEALTH_START_PERIOD_SECS: u64 = 120;

/// Consecutive failures before the target is reported unhealthy
pub const DEFAULT_HEALTH_RETRIES: u32 = 3;

// =============================================================================
// Generation defaults
// =============================================================================

/// Longest instrumental track that may be requested, in seconds
pub const DEFAULT_MAX_DURATION_SECS: u32 = 300;

/// Instrumental track length when the request does not set one
pub const DEFAULT_MUSIC_DURATION_SECS: u32 = 180;

/// Upper bound on a single backend run
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 900;

/// Generation is GPU bound; one job at a time unless configured otherwise
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 1;

/// Number of lyric characters echoed back in responses
pub const LYRICS_PREVIEW_CHARS: usize = 100;

/// Genres accepted by the generation endpoints
pub const GENRES: &[&str] = &[
    "Auto",
    "Pop",
    "R&B",
    "Dance",
    "Jazz",
    "Rock",
    "Chinese Style",
    "Chinese Tradition",
    "Metal",
    "Reggae",
    "Chinese Opera",
];

// =============================================================================
// Default paths and strings
// =============================================================================

pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "songgen=info,tower_http=info";

// =============================================================================
// Environment variables
// =============================================================================

pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_CACHE_DIR: &str = "TRANSFORMERS_CACHE";
pub const ENV_CACHE_DIR_FALLBACK: &str = "HF_HOME";
pub const ENV_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ENV_UNBUFFERED: &str = "PYTHONUNBUFFERED";
pub const ENV_API_KEY: &str = "API_KEY";
pub const ENV_PUBLIC_URL: &str = "RENDER_EXTERNAL_URL";
pub const ENV_BACKEND_COMMAND: &str = "SONGGEN_BACKEND_COMMAND";
pub const ENV_CREATE_DIRS: &str = "SONGGEN_CREATE_DIRS";
pub const ENV_LOG_FORMAT: &str = "SONGGEN_LOG_FORMAT";

/// Root configuration, immutable once the process starts serving.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpConfig::default_port")]
    pub port: u16,
    /// Externally reachable base URL, shown in the endpoint listing
    pub public_url: Option<String>,
    /// When set, generation routes require a matching `X-API-Key` header
    pub api_key: Option<Secret>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            public_url: None,
            api_key: None,
        }
    }
}

impl HttpConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }
}

/// Filesystem layout the service depends on
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Where generated audio is written and served from
    #[serde(default = "StorageConfig::default_output_dir")]
    pub output_dir: PathBuf,
    /// Model/cache directory handed to the inference backend
    #[serde(default = "StorageConfig::default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Create missing directories at startup instead of refusing to start
    #[serde(default = "StorageConfig::default_create_dirs")]
    pub create_dirs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
            cache_dir: Self::default_cache_dir(),
            create_dirs: Self::default_create_dirs(),
        }
    }
}

impl StorageConfig {
    fn default_output_dir() -> PathBuf {
        PathBuf::from(DEFAULT_OUTPUT_DIR)
    }

    fn default_cache_dir() -> PathBuf {
        PathBuf::from(DEFAULT_CACHE_DIR)
    }

    fn default_create_dirs() -> bool {
        true
    }
}

/// Inference backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Program and arguments of the external generator. Empty disables generation.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "GenerationConfig::default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "GenerationConfig::default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "GenerationConfig::default_max_duration")]
    pub max_duration_seconds: u32,
    /// Ask the generator not to buffer its output (PYTHONUNBUFFERED)
    #[serde(default)]
    pub unbuffered_output: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_concurrent: Self::default_max_concurrent(),
            timeout_seconds: Self::default_timeout(),
            max_duration_seconds: Self::default_max_duration(),
            unbuffered_output: false,
        }
    }
}

impl GenerationConfig {
    fn default_max_concurrent() -> usize {
        DEFAULT_MAX_CONCURRENT_GENERATIONS
    }

    fn default_timeout() -> u64 {
        DEFAULT_GENERATION_TIMEOUT_SECS
    }

    fn default_max_duration() -> u32 {
        DEFAULT_MAX_DURATION_SECS
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Container health check parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    #[serde(default = "HealthCheckConfig::default_path")]
    pub path: String,
    #[serde(default = "HealthCheckConfig::default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "HealthCheckConfig::default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "HealthCheckConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "HealthCheckConfig::default_start_period")]
    pub start_period_seconds: u64,
    #[serde(default = "HealthCheckConfig::default_retries")]
    pub retries: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            interval_seconds: Self::default_interval(),
            timeout_seconds: Self::default_timeout(),
            request_timeout_seconds: Self::default_request_timeout(),
            start_period_seconds: Self::default_start_period(),
            retries: Self::default_retries(),
        }
    }
}

impl HealthCheckConfig {
    fn default_path() -> String {
        HEALTH_PATH.to_string()
    }
    fn default_interval() -> u64 {
        DEFAULT_HEALTH_INTERVAL_SECS
    }
    fn default_timeout() -> u64 {
        DEFAULT_HEALTH_TIMEOUT_SECS
    }
    fn default_request_timeout() -> u64 {
        DEFAULT_HEALTH_REQUEST_TIMEOUT_SECS
    }
    fn default_start_period() -> u64 {
        DEFAULT_HEALTH_START_PERIOD_SECS
    }
    fn default_retries() -> u32 {
        DEFAULT_HEALTH_RETRIES
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_secs(self.start_period_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "health.path must start with '/', got {:?}",
                self.path
            )));
        }
        // Captures and wildcards would make the router reject the path at startup
        if self.path.contains(['{', '}'])
            || self
                .path
                .split('/')
                .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
        {
            return Err(ConfigError::Validation(format!(
                "health.path must be a literal path without captures or wildcards, got {:?}",
                self.path
            )));
        }
        if RESERVED_PATHS.contains(&self.path.as_str()) || self.path.starts_with("/outputs") {
            return Err(ConfigError::Validation(format!(
                "health.path {:?} collides with another route",
                self.path
            )));
        }
        if self.interval_seconds == 0 || self.timeout_seconds == 0 || self.request_timeout_seconds == 0
        {
            return Err(ConfigError::Validation(
                "health interval and timeouts must be at least one second".to_string(),
            ));
        }
        if self.request_timeout_seconds > self.timeout_seconds {
            return Err(ConfigError::Validation(format!(
                "health.request_timeout_seconds ({}) exceeds health.timeout_seconds ({})",
                self.request_timeout_seconds, self.timeout_seconds
            )));
        }
        if self.retries == 0 {
            return Err(ConfigError::Validation(
                "health.retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected \"text\" or \"json\", got {:?}", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// A configuration value that must not show up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl ServiceConfig {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Load configuration using `env` to look up environment variables.
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. The result is not validated.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay environment variables. Empty values count as unset.
    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        if let Some(host) = get(ENV_HOST) {
            self.http.host = host.trim().to_string();
        }
        if let Some(port) = get(ENV_PORT) {
            self.http.port = port.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                name: ENV_PORT,
                value: port.clone(),
                reason: format!("{}", e),
            })?;
        }
        if let Some(url) = get(ENV_PUBLIC_URL) {
            self.http.public_url = Some(url.trim().to_string());
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.http.api_key = Some(Secret::new(key));
        }

        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            self.storage.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(ENV_CACHE_DIR).or_else(|| get(ENV_CACHE_DIR_FALLBACK)) {
            self.storage.cache_dir = PathBuf::from(dir);
        }
        if let Some(flag) = get(ENV_CREATE_DIRS) {
            self.storage.create_dirs =
                parse_bool(&flag).ok_or_else(|| ConfigError::InvalidEnv {
                    name: ENV_CREATE_DIRS,
                    value: flag.clone(),
                    reason: "expected a boolean (true/false, 1/0, yes/no, on/off)".to_string(),
                })?;
        }

        if let Some(command) = get(ENV_BACKEND_COMMAND) {
            self.generation.command = command.split_whitespace().map(str::to_string).collect();
        }
        // Any non-empty value enables it, matching how Python reads the variable
        if get(ENV_UNBUFFERED).is_some() {
            self.generation.unbuffered_output = true;
        }

        if let Some(format) = get(ENV_LOG_FORMAT) {
            self.logging.format = format.parse().map_err(|reason| ConfigError::InvalidEnv {
                name: ENV_LOG_FORMAT,
                value: format.clone(),
                reason,
            })?;
        }

        Ok(())
    }

    /// Check every value the service relies on before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be between 1 and 65535".to_string(),
            ));
        }
        if let Some(url) = &self.http.public_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "public URL must start with http:// or https://, got {:?}",
                    url
                )));
            }
        }
        if self.storage.output_dir.as_os_str().is_empty()
            || self.storage.cache_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "storage.output_dir and storage.cache_dir must not be empty".to_string(),
            ));
        }
        if self.generation.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "generation.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.generation.timeout_seconds == 0 || self.generation.max_duration_seconds == 0 {
            return Err(ConfigError::Validation(
                "generation.timeout_seconds and generation.max_duration_seconds must be positive"
                    .to_string(),
            ));
        }
        if self.generation.command.iter().any(|part| part.is_empty()) {
            return Err(ConfigError::Validation(
                "generation.command must not contain empty arguments".to_string(),
            ));
        }

        self.health.validate()
    }

    /// Socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.http.host.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "http.host must be an IP address, got {:?}",
                self.http.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.http.port))
    }

    /// URL a co-located health probe should call.
    ///
    /// Wildcard bind addresses are probed over loopback.
    pub fn health_url(&self) -> String {
        let ip = match self.http.host.parse::<IpAddr>() {
            Ok(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Ok(ip) => ip,
            Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        format!("http://{}{}", SocketAddr::new(ip, self.http.port), self.health.path)
    }

    /// Base URL shown to clients in the endpoint listing.
    pub fn public_base_url(&self) -> String {
        match &self.http.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.http.port),
        }
    }

    pub fn generation_enabled(&self) -> bool {
        !self.generation.command.is_empty()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("Configuration error: {0}")]
    Validation(String),
}
