use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Error returned by [`EngineConfig::validate`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} concurrency ceiling must be at least 1")]
    ZeroCeiling(&'static str),
    #[error("minimum concurrency ({min}) must be between 1 and the network ceiling ({network})")]
    BadMinimum { min: usize, network: usize },
    #[error("chunk_size_bytes must be greater than zero")]
    ZeroChunkSize,
    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),
    #[error("{0} must be in (0, 1]")]
    BadFactor(&'static str),
}

/// Retry policy parameters (`[retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per file in the main pass (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for network-class failures.
    pub base_delay_secs: f64,
    /// Base delay in seconds for lock/permission failures (antivirus, busy files).
    pub lock_base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: f64,
    /// Attempts per chunk in chunked mode.
    pub chunk_max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2.0,
            lock_base_delay_secs: 5.0,
            max_delay_secs: 20.0,
            chunk_max_attempts: 5,
        }
    }
}

/// Adaptive concurrency controller parameters (`[adaptive]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Requests dispatched between two controller checkpoints.
    pub checkpoint_interval: usize,
    /// Shrink both ceilings once the permission-error count exceeds this.
    pub permission_error_threshold: u32,
    /// Shrink toward the minimum once consecutive errors exceed this.
    pub consecutive_error_threshold: u32,
    /// Pause admission once consecutive errors exceed this.
    pub pause_error_threshold: u32,
    /// Minimum time between two consecutive-error shrinks, in seconds.
    pub cooldown_secs: f64,
    /// Length of the high-error pause, in seconds.
    pub pause_secs: f64,
    /// Network ceiling multiplier applied on permission errors.
    pub network_shrink_factor: f64,
    /// I/O ceiling multiplier applied on permission errors.
    pub io_shrink_factor: f64,
    /// Grow ceilings back after this many clean checkpoints. `None` keeps the
    /// one-way shrink behaviour.
    #[serde(default)]
    pub recovery_checkpoints: Option<u32>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 500,
            permission_error_threshold: 5,
            consecutive_error_threshold: 10,
            pause_error_threshold: 8,
            cooldown_secs: 5.0,
            pause_secs: 5.0,
            network_shrink_factor: 0.6,
            io_shrink_factor: 0.5,
            recovery_checkpoints: None,
        }
    }
}

/// libcurl connection tuning (`[http]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Abort a transfer slower than `low_speed_limit_bytes` for `low_speed_time_secs`.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    pub max_redirects: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            max_redirects: 5,
            user_agent: None,
        }
    }
}

/// Global engine configuration loaded from `~/.config/hauler/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent network fetches admitted at once.
    pub network_concurrency: usize,
    /// Concurrent disk writes admitted at once.
    pub io_concurrency: usize,
    /// Floor for adaptive shrinking.
    pub min_concurrency: usize,
    /// Files with a known size below this are fetched into memory, then written.
    pub memory_threshold_bytes: u64,
    /// Files with a known size at or above this are fetched in byte ranges.
    pub chunk_threshold_bytes: u64,
    /// Size of each byte range in chunked mode.
    pub chunk_size_bytes: u64,
    /// Disable chunked mode entirely (every large file is streamed).
    #[serde(default = "default_true")]
    pub chunked_enabled: bool,
    /// Pause before replacing a destination so file scanners release their locks.
    pub settle_delay_ms: u64,
    /// Network ceiling of the final low-concurrency pass over failed files.
    pub final_pass_network: usize,
    /// I/O ceiling of the final pass.
    pub final_pass_io: usize,
    /// Attempts per file in the final pass.
    pub final_pass_attempts: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_true() -> bool {
    true
}

/// Platform-tuned `(network, io, min)` ceilings. Windows gets lower limits
/// because its file system and on-access scanners saturate earlier.
pub fn platform_concurrency() -> (usize, usize, usize) {
    if cfg!(windows) {
        (40, 15, 8)
    } else if cfg!(target_os = "macos") {
        (60, 25, 10)
    } else {
        (80, 30, 15)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let (network, io, min) = platform_concurrency();
        Self {
            network_concurrency: network,
            io_concurrency: io,
            min_concurrency: min,
            memory_threshold_bytes: 5 * MIB,
            chunk_threshold_bytes: 20 * MIB,
            chunk_size_bytes: 10 * MIB,
            chunked_enabled: true,
            settle_delay_ms: 200,
            final_pass_network: 5,
            final_pass_io: 3,
            final_pass_attempts: 3,
            retry: RetryConfig::default(),
            adaptive: AdaptiveConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_concurrency == 0 {
            return Err(ConfigError::ZeroCeiling("network"));
        }
        if self.io_concurrency == 0 {
            return Err(ConfigError::ZeroCeiling("io"));
        }
        if self.final_pass_network == 0 {
            return Err(ConfigError::ZeroCeiling("final pass network"));
        }
        if self.final_pass_io == 0 {
            return Err(ConfigError::ZeroCeiling("final pass io"));
        }
        if self.min_concurrency == 0 || self.min_concurrency > self.network_concurrency {
            return Err(ConfigError::BadMinimum {
                min: self.min_concurrency,
                network: self.network_concurrency,
            });
        }
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("retry.max_attempts"));
        }
        if self.retry.chunk_max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("retry.chunk_max_attempts"));
        }
        if self.final_pass_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("final_pass_attempts"));
        }
        if self.adaptive.checkpoint_interval == 0 {
            return Err(ConfigError::ZeroAttempts("adaptive.checkpoint_interval"));
        }
        for (name, f) in [
            ("adaptive.network_shrink_factor", self.adaptive.network_shrink_factor),
            ("adaptive.io_shrink_factor", self.adaptive.io_shrink_factor),
        ] {
            if !(f > 0.0 && f <= 1.0) {
                return Err(ConfigError::BadFactor(name));
            }
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hauler")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
