/*!
 * Configuration types for Kiosklink
 */

use crate::error::{KioskError, Result};
use kiosklink_connect::{
    ConnectionIdentity, InitialRetry, ManagerConfig, SysinfoConnectivity, TransportConfig,
};
use kiosklink_core_resilience::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a kiosk display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    /// Duplex endpoint of the order backend (ws:// or wss://)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Who this display is
    #[serde(default)]
    pub identity: IdentitySection,

    /// Bounded start-up phase
    #[serde(default)]
    pub initial_retry: InitialRetrySection,

    /// Unbounded reconnection after the start-up phase or a dropped session
    #[serde(default)]
    pub steady_retry: SteadyRetrySection,

    /// Transport tuning, including the fast backup reconnection
    #[serde(default)]
    pub transport: TransportSection,

    /// Host reachability probing
    #[serde(default)]
    pub network: NetworkSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IdentitySection {
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub display_id: String,
    #[serde(default)]
    pub organization_id: String,
    /// Omitted when the display connects before it has been provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialRetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// How long a completed handshake may wait for the auth acknowledgement
    #[serde(default = "default_confirm_window_ms")]
    pub confirm_window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyRetrySection {
    #[serde(default = "default_steady_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_steady_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backup_attempts")]
    pub backup_attempts: u32,
    #[serde(default = "default_backup_initial_ms")]
    pub backup_initial_delay_ms: u64,
    #[serde(default = "default_backup_max_ms")]
    pub backup_max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub polling_fallback: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
            identity: IdentitySection::default(),
            initial_retry: InitialRetrySection::default(),
            steady_retry: SteadyRetrySection::default(),
            transport: TransportSection::default(),
            network: NetworkSection::default(),
        }
    }
}

impl Default for InitialRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            confirm_window_ms: default_confirm_window_ms(),
        }
    }
}

impl Default for SteadyRetrySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_steady_initial_ms(),
            max_delay_ms: default_steady_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            backup_attempts: default_backup_attempts(),
            backup_initial_delay_ms: default_backup_initial_ms(),
            backup_max_delay_ms: default_backup_max_ms(),
            polling_fallback: true,
            poll_timeout_ms: default_poll_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8080/display".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_confirm_window_ms() -> u64 {
    2_000
}

fn default_steady_initial_ms() -> u64 {
    10_000
}

fn default_steady_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_backup_attempts() -> u32 {
    3
}

fn default_backup_initial_ms() -> u64 {
    1_000
}

fn default_backup_max_ms() -> u64 {
    5_000
}

fn default_poll_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_ms() -> u64 {
    15_000
}

fn default_idle_timeout_ms() -> u64 {
    45_000
}

fn default_probe_interval_ms() -> u64 {
    3_000
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

impl KioskConfig {
    /// Default location: `<config dir>/kiosklink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kiosklink").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KioskError::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: KioskConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_path().ok_or_else(|| {
                    KioskError::Config("no configuration directory on this host".to_string())
                })?;
                Self::from_file(&path)
            }
        }
    }

    /// Check every section, including that the transport's backup
    /// reconnection gives up before the first steady-state delay
    pub fn validate(&self) -> Result<()> {
        self.identity()?;

        let jitter = self.steady_retry.jitter;
        if !(0.0..1.0).contains(&jitter) {
            return Err(KioskError::Config(format!(
                "steady_retry.jitter must be within [0, 1), got {}",
                jitter
            )));
        }
        if self.network.probe_interval_ms == 0 {
            return Err(KioskError::Config(
                "network.probe_interval_ms must be greater than 0".to_string(),
            ));
        }

        let manager = self.manager_config();
        let transport = self.transport_config();
        manager.validate().map_err(invalid)?;
        transport.validate().map_err(invalid)?;
        manager.check_layering(&transport).map_err(invalid)?;
        Ok(())
    }

    /// Identity presented to the backend
    pub fn identity(&self) -> Result<ConnectionIdentity> {
        let section = &self.identity;
        let fields = [
            ("store_id", &section.store_id),
            ("device_id", &section.device_id),
            ("display_id", &section.display_id),
            ("organization_id", &section.organization_id),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(KioskError::Config(format!("identity.{} must be set", name)));
        }

        Ok(ConnectionIdentity::new(
            section.store_id.clone(),
            section.device_id.clone(),
            section.display_id.clone(),
            section.organization_id.clone(),
        )
        .with_token(section.auth_token.clone()))
    }

    pub fn initial_retry(&self) -> InitialRetry {
        InitialRetry {
            max_attempts: self.initial_retry.max_attempts,
            base_delay: ms(self.initial_retry.base_delay_ms),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let steady = &self.steady_retry;
        ManagerConfig {
            initial: self.initial_retry(),
            confirm_window: ms(self.initial_retry.confirm_window_ms),
            steady: BackoffPolicy::exponential(
                ms(steady.initial_delay_ms),
                steady.multiplier,
                ms(steady.max_delay_ms),
            )
            .with_jitter(steady.jitter),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let transport = &self.transport;
        TransportConfig {
            endpoint: self.endpoint.clone(),
            connect_timeout: ms(transport.connect_timeout_ms),
            backup_attempts: transport.backup_attempts,
            backup_backoff: BackoffPolicy::exponential(
                ms(transport.backup_initial_delay_ms),
                2.0,
                ms(transport.backup_max_delay_ms),
            ),
            polling_fallback: transport.polling_fallback,
            poll_timeout: ms(transport.poll_timeout_ms),
            heartbeat_interval: ms(transport.heartbeat_interval_ms),
            idle_timeout: ms(transport.idle_timeout_ms),
        }
    }

    pub fn connectivity(&self) -> SysinfoConnectivity {
        SysinfoConnectivity::new(ms(self.network.probe_interval_ms))
    }

    /// Configuration written by `kiosklink init`
    pub fn example() -> Self {
        Self {
            identity: IdentitySection {
                store_id: "store-1".to_string(),
                device_id: "kiosk-1".to_string(),
                display_id: "front-counter".to_string(),
                organization_id: "org-1".to_string(),
                auth_token: None,
            },
            ..Default::default()
        }
    }
}

fn invalid(err: kiosklink_connect::ConnectError) -> KioskError {
    KioskError::Config(err.to_string())
}
