//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Shared primitives and utilities for the attack harness."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

/// Base voltage (line-to-neutral) of the IEEE 13-bus feeder head used by the co-simulation.
pub const DEFAULT_NOMINAL_VOLTAGE: f64 = 2401.78;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9898))
}

fn default_federate_name() -> String {
    "gridstrike_attacker".to_owned()
}

fn default_broker_address() -> String {
    "tcp://127.0.0.1:23404".to_owned()
}

fn default_time_delta() -> f64 {
    1.0
}

fn default_max_advance_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_nominal_voltage() -> f64 {
    DEFAULT_NOMINAL_VOLTAGE
}

fn default_nominal_power() -> f64 {
    1_200_000.0
}

fn default_deviation_threshold() -> f64 {
    0.05
}

fn default_slew_threshold() -> f64 {
    0.1
}

fn default_history_capacity() -> usize {
    1000
}

fn default_voltage_min_pu() -> f64 {
    0.7
}

fn default_voltage_max_pu() -> f64 {
    1.3
}

fn default_max_injection() -> f64 {
    5_000_000.0
}

fn default_min_power_factor() -> f64 {
    0.5
}

fn default_max_duration() -> f64 {
    300.0
}

fn default_min_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_allowed_techniques() -> Vec<String> {
    ["spoof_data", "inject_load", "reconnaissance", "block_command"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_restricted_targets() -> Vec<String> {
    vec!["safety_systems".to_owned(), "emergency_controls".to_owned()]
}

fn default_weight_voltage() -> f64 {
    0.3
}

fn default_weight_power() -> f64 {
    0.3
}

fn default_weight_imbalance() -> f64 {
    0.2
}

fn default_weight_stress() -> f64 {
    0.2
}

fn default_max_score() -> f64 {
    100.0
}

fn default_campaign_duration() -> f64 {
    60.0
}

fn default_pacing() -> f64 {
    2.0
}

fn default_loopback_seed() -> u64 {
    0x6E1D_u64
}

fn default_base_load() -> f64 {
    1_200_000.0
}

fn default_base_power_factor() -> f64 {
    0.95
}

fn default_noise_sigma() -> f64 {
    0.002
}

fn default_sensitivity() -> f64 {
    0.02
}

fn default_regulator_gain() -> f64 {
    0.5
}

fn default_injection_decay() -> f64 {
    0.8
}

fn default_publish_every() -> u32 {
    1
}

fn default_history_directory() -> PathBuf {
    PathBuf::from("target/gridstrike/history")
}

fn default_true() -> bool {
    true
}

/// Primary configuration object for the harness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub threat_model: ThreatModelConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub loopback: LoopbackConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GRIDSTRIKE_CONFIG";

    /// Load configuration from disk, respecting the `GRIDSTRIKE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Unlike a daemon, the harness is usable without any file: when neither the
    /// environment override nor a candidate exists the built-in defaults apply.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.federation.validate()?;
        self.monitor.validate()?;
        self.threat_model.validate()?;
        self.impact.validate()?;
        self.campaign.validate()?;
        self.loopback.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Direction of a federation channel relative to this federate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelDirection {
    Publication,
    Subscription,
}

/// Declared value type carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Double,
    Complex,
    Boolean,
    Text,
}

/// Declarative channel entry, resolved into a typed channel by the federation client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Logical name used by the rest of the harness (e.g. `voltage_A`).
    pub name: String,
    /// Key registered on the federation bus (e.g. `IEEE13bus_fed/gld_hlc_conn/Va`).
    pub key: String,
    pub direction: ChannelDirection,
    pub value_kind: ValueKind,
    #[serde(default)]
    pub unit: String,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default = "default_federate_name")]
    pub federate_name: String,
    #[serde(default = "default_broker_address")]
    pub broker_address: String,
    /// Simulation seconds requested per single step.
    #[serde(default = "default_time_delta")]
    pub time_delta: f64,
    /// Longest wall-clock wait for a time grant before reporting a federation timeout.
    #[serde(default = "default_max_advance_wait", rename = "max_advance_wait_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_advance_wait: Duration,
    /// Channel set; empty selects the standard attack/monitoring channel set.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            federate_name: default_federate_name(),
            broker_address: default_broker_address(),
            time_delta: default_time_delta(),
            max_advance_wait: default_max_advance_wait(),
            channels: Vec::new(),
        }
    }
}

impl FederationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.time_delta.is_finite() && self.time_delta > 0.0) {
            return Err(anyhow!(
                "federation.time_delta must be positive, got {}",
                self.time_delta
            ));
        }
        if self.max_advance_wait.is_zero() {
            return Err(anyhow!("federation.max_advance_wait_ms must be non-zero"));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.name.as_str()) {
                return Err(anyhow!(
                    "federation channel '{}' declared more than once",
                    channel.name
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    /// Per-phase apparent power treated as 1.0 pu.
    #[serde(default = "default_nominal_power")]
    pub nominal_power: f64,
    /// Explicit nominal per measurement name, taking precedence over the kind defaults.
    #[serde(default)]
    pub nominal_overrides: IndexMap<String, f64>,
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold: f64,
    /// Largest tolerated per-unit change between consecutive snapshots.
    #[serde(default = "default_slew_threshold")]
    pub slew_threshold: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            nominal_voltage: default_nominal_voltage(),
            nominal_power: default_nominal_power(),
            nominal_overrides: IndexMap::new(),
            deviation_threshold: default_deviation_threshold(),
            slew_threshold: default_slew_threshold(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nominal_voltage <= 0.0 || self.nominal_power <= 0.0 {
            return Err(anyhow!("monitor nominals must be positive"));
        }
        if let Some((name, value)) = self.nominal_overrides.iter().find(|(_, v)| **v <= 0.0) {
            return Err(anyhow!(
                "monitor nominal override '{}' must be positive, got {}",
                name,
                value
            ));
        }
        if self.deviation_threshold <= 0.0 || self.slew_threshold <= 0.0 {
            return Err(anyhow!("monitor thresholds must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(anyhow!("monitor.history_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// What the validator does with a numeric parameter outside its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsPolicy {
    #[default]
    Clamp,
    Reject,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatModelConfig {
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    #[serde(default = "default_voltage_min_pu")]
    pub voltage_min_pu: f64,
    #[serde(default = "default_voltage_max_pu")]
    pub voltage_max_pu: f64,
    /// Largest apparent power (VA) any injection or spoofed power value may carry.
    #[serde(default = "default_max_injection")]
    pub max_injection: f64,
    #[serde(default = "default_min_power_factor")]
    pub min_power_factor: f64,
    /// Longest spoof/block duration in seconds.
    #[serde(default = "default_max_duration")]
    pub max_duration: f64,
    #[serde(default = "default_min_interval", rename = "min_interval_secs")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub min_interval: Duration,
    #[serde(default = "default_allowed_techniques")]
    pub allowed_techniques: Vec<String>,
    #[serde(default = "default_restricted_targets")]
    pub restricted_targets: Vec<String>,
    #[serde(default)]
    pub bounds_policy: BoundsPolicy,
}

impl Default for ThreatModelConfig {
    fn default() -> Self {
        Self {
            nominal_voltage: default_nominal_voltage(),
            voltage_min_pu: default_voltage_min_pu(),
            voltage_max_pu: default_voltage_max_pu(),
            max_injection: default_max_injection(),
            min_power_factor: default_min_power_factor(),
            max_duration: default_max_duration(),
            min_interval: default_min_interval(),
            allowed_techniques: default_allowed_techniques(),
            restricted_targets: default_restricted_targets(),
            bounds_policy: BoundsPolicy::default(),
        }
    }
}

impl ThreatModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nominal_voltage <= 0.0 {
            return Err(anyhow!("threat_model.nominal_voltage must be positive"));
        }
        if !(self.voltage_min_pu > 0.0 && self.voltage_min_pu < self.voltage_max_pu) {
            return Err(anyhow!(
                "threat_model voltage bounds invalid: min {} pu, max {} pu",
                self.voltage_min_pu,
                self.voltage_max_pu
            ));
        }
        if self.max_injection <= 0.0 || self.max_duration <= 0.0 {
            return Err(anyhow!(
                "threat_model.max_injection and max_duration must be positive"
            ));
        }
        if !(0.0..=1.0).contains(&self.min_power_factor) {
            return Err(anyhow!(
                "threat_model.min_power_factor must lie in [0, 1], got {}",
                self.min_power_factor
            ));
        }
        Ok(())
    }

    /// Lowest admissible voltage magnitude in volts.
    pub fn min_voltage(&self) -> f64 {
        self.voltage_min_pu * self.nominal_voltage
    }

    /// Highest admissible voltage magnitude in volts.
    pub fn max_voltage(&self) -> f64 {
        self.voltage_max_pu * self.nominal_voltage
    }

    /// Load a threat model from a YAML document laid out in sections
    /// (`voltage_limits`, `power_limits`, `timing_limits`, ...). Missing
    /// sections and keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read threat model {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("failed to load threat model {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let file: ThreatModelFile =
            serde_yaml::from_str(contents).with_context(|| "invalid threat model yaml")?;
        let config = file.apply(Self::default());
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ThreatModelFile {
    #[serde(default)]
    voltage_limits: Option<LimitSection>,
    #[serde(default)]
    power_limits: Option<PowerLimitSection>,
    #[serde(default)]
    timing_limits: Option<TimingLimitSection>,
    #[serde(default)]
    allowed_techniques: Option<Vec<String>>,
    #[serde(default)]
    restricted_targets: Option<Vec<String>>,
    #[serde(default)]
    simulation_safety: Option<SafetySection>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitSection {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PowerLimitSection {
    max_injection: Option<f64>,
    min_power_factor: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimingLimitSection {
    min_interval: Option<f64>,
    max_duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SafetySection {
    prevent_permanent_damage: Option<bool>,
}

impl ThreatModelFile {
    fn apply(self, mut base: ThreatModelConfig) -> ThreatModelConfig {
        if let Some(limits) = self.voltage_limits {
            base.voltage_min_pu = limits.min.unwrap_or(base.voltage_min_pu);
            base.voltage_max_pu = limits.max.unwrap_or(base.voltage_max_pu);
        }
        if let Some(power) = self.power_limits {
            base.max_injection = power.max_injection.unwrap_or(base.max_injection);
            base.min_power_factor = power.min_power_factor.unwrap_or(base.min_power_factor);
        }
        if let Some(timing) = self.timing_limits {
            if let Some(interval) = timing.min_interval.filter(|v| v.is_finite() && *v >= 0.0) {
                base.min_interval = Duration::from_secs_f64(interval);
            }
            base.max_duration = timing.max_duration.unwrap_or(base.max_duration);
        }
        if let Some(techniques) = self.allowed_techniques {
            base.allowed_techniques = techniques;
        }
        if let Some(targets) = self.restricted_targets {
            base.restricted_targets = targets;
        }
        if let Some(safety) = self.simulation_safety {
            // Clamping keeps the simulation inside its numeric envelope; without
            // that guarantee out-of-bounds values have to be refused.
            base.bounds_policy = match safety.prevent_permanent_damage {
                Some(false) => BoundsPolicy::Reject,
                _ => BoundsPolicy::Clamp,
            };
        }
        base
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConfig {
    #[serde(default = "default_weight_voltage")]
    pub voltage_weight: f64,
    #[serde(default = "default_weight_power")]
    pub power_weight: f64,
    #[serde(default = "default_weight_imbalance")]
    pub imbalance_weight: f64,
    #[serde(default = "default_weight_stress")]
    pub stress_weight: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            voltage_weight: default_weight_voltage(),
            power_weight: default_weight_power(),
            imbalance_weight: default_weight_imbalance(),
            stress_weight: default_weight_stress(),
            max_score: default_max_score(),
        }
    }
}

impl ImpactConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.voltage_weight,
            self.power_weight,
            self.imbalance_weight,
            self.stress_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(anyhow!("impact weights must be finite and non-negative"));
        }
        if !(self.max_score.is_finite() && self.max_score > 0.0) {
            return Err(anyhow!("impact.max_score must be positive"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Campaign length in simulation seconds.
    #[serde(default = "default_campaign_duration")]
    pub duration: f64,
    /// Simulation seconds to let the grid settle between attacks.
    #[serde(default = "default_pacing")]
    pub pacing: f64,
    /// Optional wall-clock cap on top of the simulation-time duration.
    #[serde(default, rename = "max_wall_secs")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub max_wall: Option<Duration>,
    #[serde(default)]
    pub max_attacks: Option<usize>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            duration: default_campaign_duration(),
            pacing: default_pacing(),
            max_wall: None,
            max_attacks: None,
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(anyhow!("campaign.duration must be positive"));
        }
        if !(self.pacing.is_finite() && self.pacing >= 0.0) {
            return Err(anyhow!("campaign.pacing must be non-negative"));
        }
        Ok(())
    }
}

/// Parameters of the in-process simulated federation peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackConfig {
    #[serde(default = "default_loopback_seed")]
    pub seed: u64,
    /// Grant granularity in simulation seconds.
    #[serde(default = "default_time_delta")]
    pub period: f64,
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    /// Per-phase baseline apparent power in VA.
    #[serde(default = "default_base_load")]
    pub base_load: f64,
    #[serde(default = "default_base_power_factor")]
    pub base_power_factor: f64,
    /// Standard deviation of measurement noise in per-unit.
    #[serde(default = "default_noise_sigma")]
    pub noise_sigma_pu: f64,
    /// Voltage drop in per-unit per MVA of load above baseline.
    #[serde(default = "default_sensitivity")]
    pub sensitivity_pu_per_mva: f64,
    /// Fraction of the voltage error the regulator removes each step.
    #[serde(default = "default_regulator_gain")]
    pub regulator_gain: f64,
    /// Fraction of injected load still present after each step.
    #[serde(default = "default_injection_decay")]
    pub injection_decay: f64,
    #[serde(default = "default_publish_every")]
    pub publish_every: u32,
    /// Simulation time after which the peer stops granting advances.
    #[serde(default)]
    pub stall_after: Option<f64>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            seed: default_loopback_seed(),
            period: default_time_delta(),
            nominal_voltage: default_nominal_voltage(),
            base_load: default_base_load(),
            base_power_factor: default_base_power_factor(),
            noise_sigma_pu: default_noise_sigma(),
            sensitivity_pu_per_mva: default_sensitivity(),
            regulator_gain: default_regulator_gain(),
            injection_decay: default_injection_decay(),
            publish_every: default_publish_every(),
            stall_after: None,
        }
    }
}

impl LoopbackConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err(anyhow!("loopback.period must be positive"));
        }
        if self.noise_sigma_pu < 0.0 {
            return Err(anyhow!("loopback.noise_sigma_pu must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.regulator_gain)
            || !(0.0..=1.0).contains(&self.injection_decay)
            || !(0.0..=1.0).contains(&self.base_power_factor)
        {
            return Err(anyhow!(
                "loopback gain, decay and power factor must lie in [0, 1]"
            ));
        }
        if self.publish_every == 0 {
            return Err(anyhow!("loopback.publish_every must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_history_directory")]
    pub directory: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_history_directory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().expect("empty config is valid");
        assert_eq!(config.threat_model.max_injection, 5_000_000.0);
        assert_eq!(config.threat_model.min_interval, Duration::from_secs(1));
        assert_eq!(config.federation.time_delta, 1.0);
        assert_eq!(config.monitor.history_capacity, 1000);
        assert!(config
            .threat_model
            .restricted_targets
            .contains(&"emergency_controls".to_owned()));
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: AppConfig = r#"
            [threat_model]
            bounds_policy = "reject"
            min_interval_secs = 0.25
            max_injection = 2500000.0

            [federation]
            time_delta = 0.5
            max_advance_wait_ms = 250

            [[federation.channels]]
            name = "voltage_A"
            key = "feeder/Va"
            direction = "subscription"
            value_kind = "complex"
            unit = "V"
        "#
        .parse()
        .expect("valid config");
        assert_eq!(config.threat_model.bounds_policy, BoundsPolicy::Reject);
        assert_eq!(config.threat_model.min_interval, Duration::from_millis(250));
        assert_eq!(config.federation.max_advance_wait, Duration::from_millis(250));
        assert_eq!(config.federation.channels.len(), 1);
        assert_eq!(config.federation.channels[0].value_kind, ValueKind::Complex);
    }

    #[test]
    fn validation_rejects_inverted_voltage_bounds() {
        let err = r#"
            [threat_model]
            voltage_min_pu = 1.2
            voltage_max_pu = 0.9
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("voltage bounds"));
    }

    #[test]
    fn yaml_threat_model_merges_over_defaults() {
        let config = ThreatModelConfig::from_yaml_str(
            r#"
voltage_limits:
  min: 0.8
timing_limits:
  min_interval: 2.5
restricted_targets:
  - safety_systems
  - emergency_controls
  - relay_settings
simulation_safety:
  prevent_permanent_damage: false
"#,
        )
        .expect("valid yaml");
        assert_eq!(config.voltage_min_pu, 0.8);
        assert_eq!(config.voltage_max_pu, 1.3);
        assert_eq!(config.min_interval, Duration::from_millis(2500));
        assert_eq!(config.restricted_targets.len(), 3);
        assert_eq!(config.bounds_policy, BoundsPolicy::Reject);
    }

    #[test]
    fn missing_candidates_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml")]);
        // The environment override may be set by an outer harness; only assert the
        // fallback when it is not.
        if std::env::var(AppConfig::ENV_CONFIG_PATH).is_err() {
            let loaded = loaded.expect("defaults load");
            assert!(loaded.source.is_none());
        }
    }
}
