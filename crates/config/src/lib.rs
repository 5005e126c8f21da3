//! Configuration loading, validation, and management for the RVM controller.
//!
//! Loads configuration from `~/.rvm/config.toml` with environment variable
//! overrides. Every threshold, delay and retry count the controller uses
//! lives here; nothing in the state machine is hard-coded tuning.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rvm/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RvmConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    /// Local hardware API and event feed endpoints
    #[serde(default)]
    pub local_api: LocalApiConfig,

    /// Classifier thresholds and item-detection policy
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Motion and settle delays
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub compactor: CompactorConfig,

    /// Session deadlines and teardown bounds
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub weight: WeightConfig,

    /// How motion phases learn that the belt/sorter arrived
    #[serde(default)]
    pub positioning: PositioningConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Operator HTTP API
    #[serde(default)]
    pub operator: OperatorConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
}

fn default_device_id() -> String {
    "RVM-0001".into()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Per-request timeout for hardware commands
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,

    /// First reconnect delay after the event feed drops; doubles up to the max
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8081".into()
}
fn default_ws_url() -> String {
    "ws://localhost:8081/websocket".into()
}
fn default_request_timeout_ms() -> u64 {
    8_000
}
fn default_reconnect_initial_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for LocalApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            timeout_ms: default_request_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Classifier thresholds and the detection retry policy.
///
/// The relaxation factors and noise floor differ between detector firmware
/// generations; treat the defaults as a starting point, not ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_metal_can_threshold")]
    pub metal_can_threshold: f64,

    #[serde(default = "default_plastic_bottle_threshold")]
    pub plastic_bottle_threshold: f64,

    #[serde(default = "default_glass_threshold")]
    pub glass_threshold: f64,

    /// Below this, an unmatched label is a bad photo, not an item
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,

    /// Relaxation applied to canonical short-code labels (`0-pet`, `1-can`)
    #[serde(default = "default_relax_canonical")]
    pub relax_factor_canonical: f64,

    /// Relaxation applied to variant and legacy free-text labels
    #[serde(default = "default_relax_legacy")]
    pub relax_factor_legacy: f64,

    /// UNKNOWN classifications tolerated before the item is rejected
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Grams; anything lighter is treated as an empty belt
    #[serde(default = "default_min_valid_weight")]
    pub min_valid_weight: f64,

    #[serde(default = "default_max_calibration_attempts")]
    pub max_calibration_attempts: u32,

    /// Nudge the belt under the camera before the first capture of a cycle
    #[serde(default = "default_true")]
    pub position_before_photo: bool,
}

fn default_metal_can_threshold() -> f64 {
    0.22
}
fn default_plastic_bottle_threshold() -> f64 {
    0.30
}
fn default_glass_threshold() -> f64 {
    0.25
}
fn default_noise_floor() -> f64 {
    0.15
}
fn default_relax_canonical() -> f64 {
    0.7
}
fn default_relax_legacy() -> f64 {
    0.8
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1_500
}
fn default_min_valid_weight() -> f64 {
    2.0
}
fn default_max_calibration_attempts() -> u32 {
    2
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            metal_can_threshold: default_metal_can_threshold(),
            plastic_bottle_threshold: default_plastic_bottle_threshold(),
            glass_threshold: default_glass_threshold(),
            noise_floor: default_noise_floor(),
            relax_factor_canonical: default_relax_canonical(),
            relax_factor_legacy: default_relax_legacy(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            min_valid_weight: default_min_valid_weight(),
            max_calibration_attempts: default_max_calibration_attempts(),
            position_before_photo: true,
        }
    }
}

/// Motion and settle delays, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_belt_to_camera_ms")]
    pub belt_to_camera_ms: u64,
    #[serde(default = "default_belt_to_sorter_ms")]
    pub belt_to_sorter_ms: u64,
    #[serde(default = "default_belt_reverse_ms")]
    pub belt_reverse_ms: u64,
    #[serde(default = "default_sorter_rotate_ms")]
    pub sorter_rotate_ms: u64,
    #[serde(default = "default_sorter_reset_ms")]
    pub sorter_reset_ms: u64,
    #[serde(default = "default_drop_settle_ms")]
    pub drop_settle_ms: u64,
    #[serde(default = "default_position_settle_ms")]
    pub position_settle_ms: u64,
    /// Delay before arming the next photo after a cycle ends
    #[serde(default = "default_photo_rearm_ms")]
    pub photo_rearm_ms: u64,
    #[serde(default = "default_weight_request_ms")]
    pub weight_request_ms: u64,
    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,
    /// Pause between the two gate-close attempts at teardown
    #[serde(default = "default_gate_settle_ms")]
    pub gate_settle_ms: u64,
    /// Sorter travel home before the next hardware step at start or reset
    #[serde(default = "default_home_settle_ms")]
    pub home_settle_ms: u64,
    #[serde(default = "default_command_gap_ms")]
    pub command_gap_ms: u64,
    /// A capture with no classification after this long counts as UNKNOWN
    #[serde(default = "default_photo_timeout_ms")]
    pub photo_timeout_ms: u64,
    /// A weight request with no reading after this long abandons the item
    #[serde(default = "default_weight_timeout_ms")]
    pub weight_timeout_ms: u64,
    /// An unanswered capture older than this is presumed lost and no longer
    /// matched against arriving classifications
    #[serde(default = "default_capture_expiry_ms")]
    pub capture_expiry_ms: u64,
}

fn default_belt_to_camera_ms() -> u64 {
    1_800
}
fn default_belt_to_sorter_ms() -> u64 {
    2_200
}
fn default_belt_reverse_ms() -> u64 {
    3_500
}
fn default_sorter_rotate_ms() -> u64 {
    2_200
}
fn default_sorter_reset_ms() -> u64 {
    3_000
}
fn default_drop_settle_ms() -> u64 {
    300
}
fn default_position_settle_ms() -> u64 {
    100
}
fn default_photo_rearm_ms() -> u64 {
    500
}
fn default_weight_request_ms() -> u64 {
    300
}
fn default_calibration_ms() -> u64 {
    800
}
fn default_gate_settle_ms() -> u64 {
    400
}
fn default_home_settle_ms() -> u64 {
    1_000
}
fn default_command_gap_ms() -> u64 {
    100
}
fn default_photo_timeout_ms() -> u64 {
    10_000
}
fn default_weight_timeout_ms() -> u64 {
    5_000
}
fn default_capture_expiry_ms() -> u64 {
    20_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            belt_to_camera_ms: default_belt_to_camera_ms(),
            belt_to_sorter_ms: default_belt_to_sorter_ms(),
            belt_reverse_ms: default_belt_reverse_ms(),
            sorter_rotate_ms: default_sorter_rotate_ms(),
            sorter_reset_ms: default_sorter_reset_ms(),
            drop_settle_ms: default_drop_settle_ms(),
            position_settle_ms: default_position_settle_ms(),
            photo_rearm_ms: default_photo_rearm_ms(),
            weight_request_ms: default_weight_request_ms(),
            calibration_ms: default_calibration_ms(),
            gate_settle_ms: default_gate_settle_ms(),
            home_settle_ms: default_home_settle_ms(),
            command_gap_ms: default_command_gap_ms(),
            photo_timeout_ms: default_photo_timeout_ms(),
            weight_timeout_ms: default_weight_timeout_ms(),
            capture_expiry_ms: default_capture_expiry_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    /// Stop the compactor after this long without a new accepted item
    #[serde(default = "default_compactor_idle_ms")]
    pub idle_stop_ms: u64,

    /// Non-forced teardown lets the compactor finish crushing for this long
    #[serde(default = "default_compactor_grace_ms")]
    pub grace_ms: u64,
}

fn default_compactor_idle_ms() -> u64 {
    8_000
}
fn default_compactor_grace_ms() -> u64 {
    2_000
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            idle_stop_ms: default_compactor_idle_ms(),
            grace_ms: default_compactor_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_inactivity_ms")]
    pub inactivity_ms: u64,

    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Delay between opening the gate and arming the first photo
    #[serde(default = "default_start_settle_ms")]
    pub start_settle_ms: u64,

    /// Pause after tearing down a session that a new start pre-empted
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,

    /// Upper bound teardown waits for an in-flight cycle
    #[serde(default = "default_teardown_wait_ms")]
    pub teardown_wait_limit_ms: u64,

    /// Delay between a critical bin-full signal and the session timeout
    #[serde(default = "default_bin_full_delay_ms")]
    pub bin_full_delay_ms: u64,
}

fn default_inactivity_ms() -> u64 {
    300_000
}
fn default_max_duration_ms() -> u64 {
    600_000
}
fn default_start_settle_ms() -> u64 {
    4_000
}
fn default_restart_settle_ms() -> u64 {
    2_000
}
fn default_teardown_wait_ms() -> u64 {
    60_000
}
fn default_bin_full_delay_ms() -> u64 {
    2_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_ms: default_inactivity_ms(),
            max_duration_ms: default_max_duration_ms(),
            start_settle_ms: default_start_settle_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            teardown_wait_limit_ms: default_teardown_wait_ms(),
            bin_full_delay_ms: default_bin_full_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Scale calibration coefficient; grams = raw * coefficient / 1000
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
}

fn default_coefficient() -> f64 {
    988.0
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            coefficient: default_coefficient(),
        }
    }
}

/// How a motion phase decides the belt or sorter has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositioningStrategy {
    /// Wait the configured travel time.
    #[default]
    FixedDelay,
    /// Wait for the limit-switch event, falling back to a timeout.
    HardwareSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositioningConfig {
    #[serde(default)]
    pub strategy: PositioningStrategy,

    /// Fallback when the limit switch never reports
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,
}

fn default_signal_timeout_ms() -> u64 {
    5_000
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self {
            strategy: PositioningStrategy::default(),
            signal_timeout_ms: default_signal_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Start the next photo while the sorter is still returning home
    #[serde(default = "default_true")]
    pub overlap_sorter_reset: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            overlap_sorter_reset: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Module-id requests sent from the heartbeat before giving up
    #[serde(default = "default_module_id_retries")]
    pub max_module_id_retries: u32,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_module_id_retries() -> u32 {
    10
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            max_module_id_retries: default_module_id_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8090
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Broadcast buffer for telemetry subscribers
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Log a detection summary every N attempts (0 = never)
    #[serde(default = "default_summary_every")]
    pub summary_every: u64,
}

fn default_channel_capacity() -> usize {
    256
}
fn default_summary_every() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            summary_every: default_summary_every(),
        }
    }
}

impl RvmConfig {
    /// Load configuration from the default path (~/.rvm/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `RVM_DEVICE_ID`
    /// - `RVM_LOCAL_API_URL`
    /// - `RVM_EVENT_FEED_URL`
    /// - `RVM_OPERATOR_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&Self::config_path())
    }

    /// Load from `path`, then apply the environment overrides.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(id) = std::env::var("RVM_DEVICE_ID") {
            self.device.id = id;
        }
        if let Ok(url) = std::env::var("RVM_LOCAL_API_URL") {
            self.local_api.base_url = url;
        }
        if let Ok(url) = std::env::var("RVM_EVENT_FEED_URL") {
            self.local_api.ws_url = url;
        }
        if let Ok(port) = std::env::var("RVM_OPERATOR_PORT") {
            self.operator.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("RVM_OPERATOR_PORT is not a port: {port}"))
            })?;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rvm")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        for (name, value) in [
            ("metal_can_threshold", d.metal_can_threshold),
            ("plastic_bottle_threshold", d.plastic_bottle_threshold),
            ("glass_threshold", d.glass_threshold),
            ("relax_factor_canonical", d.relax_factor_canonical),
            ("relax_factor_legacy", d.relax_factor_legacy),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "detection.{name} must be in (0.0, 1.0], got {value}"
                )));
            }
        }

        if !(0.0..1.0).contains(&d.noise_floor) {
            return Err(ConfigError::ValidationError(
                "detection.noise_floor must be in [0.0, 1.0)".into(),
            ));
        }

        if d.min_valid_weight < 0.0 {
            return Err(ConfigError::ValidationError(
                "detection.min_valid_weight must not be negative".into(),
            ));
        }

        if self.weight.coefficient <= 0.0 {
            return Err(ConfigError::ValidationError(
                "weight.coefficient must be > 0".into(),
            ));
        }

        if self.session.inactivity_ms == 0 || self.session.max_duration_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session deadlines must be non-zero".into(),
            ));
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat.interval_secs must be > 0".into(),
            ));
        }

        if self.local_api.reconnect_initial_ms > self.local_api.reconnect_max_ms {
            return Err(ConfigError::ValidationError(
                "local_api.reconnect_initial_ms must not exceed reconnect_max_ms".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `rvm config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
