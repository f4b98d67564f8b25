//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Federation configuration.
    pub federation: FederationConfig,
    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkersConfig,
    /// Media processing configuration.
    #[serde(default)]
    pub media: MediaConfig,
    /// Web push configuration.
    #[serde(default)]
    pub web_push: WebPushConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whether federation is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Instance name.
    pub instance_name: String,
    /// Path to the instance actor's PKCS#8 private key. Generated on first
    /// start when the file does not exist.
    #[serde(default = "default_instance_key_path")]
    pub instance_key_path: String,
}

/// Per-pipeline worker counts and lifecycle timeouts.
///
/// A count of `0` means "scale from available parallelism": the composition
/// root multiplies the CPU count by a per-pipeline factor.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Client-side-effect workers.
    #[serde(default)]
    pub client: usize,
    /// Federator-side-effect workers.
    #[serde(default)]
    pub federator: usize,
    /// Outbound delivery workers.
    #[serde(default)]
    pub delivery: usize,
    /// Remote dereference workers.
    #[serde(default)]
    pub dereference: usize,
    /// Media processing workers.
    #[serde(default)]
    pub processing: usize,
    /// Web push fan-out workers.
    #[serde(default)]
    pub web_push: usize,
    /// Seconds to wait for in-flight messages when stopping a pool.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Seconds granted to queue persistence on shutdown, independent of the
    /// shutdown signal itself.
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            client: 0,
            federator: 0,
            delivery: 0,
            dereference: 0,
            processing: 0,
            web_push: 0,
            shutdown_timeout_secs: default_shutdown_timeout(),
            persist_timeout_secs: default_persist_timeout(),
        }
    }
}

/// Media processing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Number of sandboxed transcoder units. Independent of (and usually
    /// smaller than) the processing worker count.
    #[serde(default = "default_sandbox_capacity")]
    pub sandbox_capacity: usize,
    /// Path to the ffmpeg WASM module (wasm-ffmpeg builds).
    #[serde(default = "default_wasm_module_path")]
    pub wasm_module_path: String,
    /// Path to the ffmpeg binary (native-ffmpeg builds).
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    /// Scratch directory for in-flight transcodes.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Age in hours after which leftover scratch files are pruned.
    #[serde(default = "default_temp_retention_hours")]
    pub temp_retention_hours: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            sandbox_capacity: default_sandbox_capacity(),
            wasm_module_path: default_wasm_module_path(),
            ffmpeg_binary: default_ffmpeg_binary(),
            work_dir: default_work_dir(),
            temp_retention_hours: default_temp_retention_hours(),
        }
    }
}

/// Web push configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebPushConfig {
    /// VAPID private key in base64url form. Push fan-out is disabled when
    /// unset.
    #[serde(default)]
    pub vapid_private_key: Option<String>,
    /// Contact address reported to push services.
    #[serde(default)]
    pub contact: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_true() -> bool {
    true
}

fn default_instance_key_path() -> String {
    "data/instance_key.pem".to_string()
}

const fn default_shutdown_timeout() -> u64 {
    30
}

const fn default_persist_timeout() -> u64 {
    60
}

const fn default_sandbox_capacity() -> usize {
    2
}

fn default_wasm_module_path() -> String {
    "data/ffmpeg.wasm".to_string()
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_work_dir() -> String {
    "data/media-work".to_string()
}

const fn default_temp_retention_hours() -> u64 {
    24
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `PELAGO_ENV`)
    /// 3. Environment variables with `PELAGO_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("PELAGO_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PELAGO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PELAGO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
