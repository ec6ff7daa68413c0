use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("ZAPDROP_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("ZAPDROP_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self> {
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("Server port must be greater than zero");
        }
        if self.store.backend == StoreBackend::Postgres {
            let url = self.store.url.as_deref().unwrap_or_default();
            if url.is_empty() {
                bail!("store.url is required for the postgres backend");
            }
            if self.store.max_connections < self.store.min_connections.unwrap_or(1) {
                bail!("Max connections must be >= min connections");
            }
            if self.store.max_connections > 128 {
                bail!("Connection pool oversized");
            }
        }
        if self.gateway.kind == GatewayKind::Lnbits {
            if self.gateway.url.as_deref().unwrap_or_default().is_empty() {
                bail!("gateway.url is required for the lnbits gateway");
            }
            if self.gateway.admin_key.as_deref().unwrap_or_default().is_empty() {
                bail!("gateway.admin_key is required for the lnbits gateway");
            }
        }
        self.gateway.ensure_bounds()?;
        self.lifecycle.ensure_bounds()?;
        // The payout deadline must outlive the HTTP client's own timeout
        if self.lifecycle.payout_timeout() < self.gateway.request_timeout() {
            bail!("lifecycle.payout_timeout_ms must be >= gateway.request_timeout_ms");
        }
        self.throttle.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
    /// Bearer token for the reconciliation endpoint; the endpoint is not
    /// mounted without it.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "StoreConfig::default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl StoreConfig {
    const fn default_max_connections() -> u32 {
        16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Lnbits,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub kind: GatewayKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub admin_key: Option<String>,
    /// Where the gateway should POST completion notifications.
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "GatewayConfig::default_verify_funding")]
    pub verify_funding: bool,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(15_000))
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure_timeout_ms(self.request_timeout_ms.unwrap_or(15_000), "gateway.request_timeout_ms")
    }

    const fn default_verify_funding() -> bool {
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "LifecycleConfig::default_expiry_grace_seconds")]
    pub expiry_grace_seconds: i64,
    #[serde(default = "LifecycleConfig::default_stale_pending_seconds")]
    pub stale_pending_seconds: i64,
    #[serde(default = "LifecycleConfig::default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "LifecycleConfig::default_payout_timeout_ms")]
    pub payout_timeout_ms: u64,
    #[serde(default = "LifecycleConfig::default_receivable_timeout_ms")]
    pub receivable_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiry_grace_seconds: Self::default_expiry_grace_seconds(),
            stale_pending_seconds: Self::default_stale_pending_seconds(),
            sweep_interval_seconds: Self::default_sweep_interval_seconds(),
            payout_timeout_ms: Self::default_payout_timeout_ms(),
            receivable_timeout_ms: Self::default_receivable_timeout_ms(),
        }
    }
}

impl LifecycleConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn payout_timeout(&self) -> Duration {
        Duration::from_millis(self.payout_timeout_ms)
    }

    pub fn receivable_timeout(&self) -> Duration {
        Duration::from_millis(self.receivable_timeout_ms)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if self.expiry_grace_seconds < 0 {
            bail!("lifecycle.expiry_grace_seconds cannot be negative");
        }
        if self.stale_pending_seconds <= 0 {
            bail!("lifecycle.stale_pending_seconds must be positive");
        }
        if self.sweep_interval_seconds == 0 || self.sweep_interval_seconds > 86_400 {
            bail!("lifecycle.sweep_interval_seconds must be within 1..=86400");
        }
        ensure_timeout_ms(self.payout_timeout_ms, "lifecycle.payout_timeout_ms")?;
        ensure_timeout_ms(self.receivable_timeout_ms, "lifecycle.receivable_timeout_ms")
    }

    const fn default_expiry_grace_seconds() -> i64 {
        300
    }

    const fn default_stale_pending_seconds() -> i64 {
        3_600
    }

    const fn default_sweep_interval_seconds() -> u64 {
        300
    }

    const fn default_payout_timeout_ms() -> u64 {
        30_000
    }

    const fn default_receivable_timeout_ms() -> u64 {
        10_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "ThrottleConfig::default_window_seconds")]
    pub window_seconds: i64,
    #[serde(default = "ThrottleConfig::default_burst_threshold")]
    pub burst_threshold: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_seconds: Self::default_window_seconds(),
            burst_threshold: Self::default_burst_threshold(),
        }
    }
}

impl ThrottleConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if self.window_seconds <= 0 {
            bail!("throttle.window_seconds must be positive");
        }
        if self.burst_threshold == 0 {
            bail!("throttle.burst_threshold must be positive");
        }
        Ok(())
    }

    const fn default_window_seconds() -> i64 {
        60
    }

    const fn default_burst_threshold() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default)]
    pub hcaptcha_secret: Option<String>,
    #[serde(default = "ChallengeConfig::default_verify_url")]
    pub verify_url: String,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            hcaptcha_secret: None,
            verify_url: Self::default_verify_url(),
        }
    }
}

impl ChallengeConfig {
    fn default_verify_url() -> String {
        "https://hcaptcha.com/siteverify".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub gallery_max_capacity: u64,
    pub gallery_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gallery_max_capacity: 128,
            gallery_ttl_seconds: 30,
        }
    }
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if self.gallery_max_capacity == 0 {
            bail!("cache.gallery_max_capacity must be positive");
        }
        if self.gallery_ttl_seconds > 3_600 {
            bail!("cache.gallery_ttl_seconds cannot exceed one hour");
        }
        Ok(())
    }
}

fn ensure_timeout_ms(millis: u64, label: &str) -> Result<()> {
    if !(100..=120_000).contains(&millis) {
        bail!("{label} must be within 100..=120000 ms, got {millis}");
    }
    Ok(())
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
