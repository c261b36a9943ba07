//! ---
//! gs_section: "02-messaging-ipc-data-model"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Federation session, channel schema, and bus adapters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use gridstrike_common::{ChannelConfig, ChannelDirection, ValueKind};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Logical federation time in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn from_secs(secs: f64) -> Self {
        SimTime(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    pub fn plus(self, secs: f64) -> Self {
        SimTime(self.0 + secs)
    }

    /// Seconds elapsed since `earlier`, saturating at zero.
    pub fn since(self, earlier: SimTime) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }

    pub fn max(self, other: SimTime) -> Self {
        if other.0.total_cmp(&self.0).is_gt() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

/// Rectangular complex value (voltage or apparent power phasor).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Phasor {
    pub re: f64,
    pub im: f64,
}

impl Phasor {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn from_polar(magnitude: f64, angle_deg: f64) -> Self {
        let rad = angle_deg.to_radians();
        Self {
            re: magnitude * rad.cos(),
            im: magnitude * rad.sin(),
        }
    }

    /// Apparent power phasor from magnitude (VA) and a lagging power factor.
    pub fn from_power_factor(magnitude: f64, power_factor: f64) -> Self {
        let pf = power_factor.clamp(0.0, 1.0);
        Self {
            re: magnitude * pf,
            im: magnitude * pf.acos().sin(),
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.re.hypot(self.im)
    }

    pub fn angle_deg(&self) -> f64 {
        self.im.atan2(self.re).to_degrees()
    }

    /// Ratio of real to apparent power; zero for a zero phasor.
    pub fn power_factor(&self) -> f64 {
        let magnitude = self.magnitude();
        if magnitude > 0.0 {
            self.re / magnitude
        } else {
            0.0
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            re: self.re * factor,
            im: self.im * factor,
        }
    }
}

impl std::ops::Add for Phasor {
    type Output = Phasor;

    fn add(self, rhs: Phasor) -> Phasor {
        Phasor::new(self.re + rhs.re, self.im + rhs.im)
    }
}

/// Typed value carried on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    Double(f64),
    Complex(Phasor),
    Boolean(bool),
    /// Short string payload for structured control messages.
    Text(String),
}

impl ChannelValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ChannelValue::Double(_) => ValueKind::Double,
            ChannelValue::Complex(_) => ValueKind::Complex,
            ChannelValue::Boolean(_) => ValueKind::Boolean,
            ChannelValue::Text(_) => ValueKind::Text,
        }
    }

    /// Scalar magnitude for numeric values.
    pub fn magnitude(&self) -> Option<f64> {
        match self {
            ChannelValue::Double(v) => Some(v.abs()),
            ChannelValue::Complex(p) => Some(p.magnitude()),
            ChannelValue::Boolean(_) | ChannelValue::Text(_) => None,
        }
    }

    pub fn as_phasor(&self) -> Option<Phasor> {
        match self {
            ChannelValue::Complex(p) => Some(*p),
            ChannelValue::Double(v) => Some(Phasor::new(*v, 0.0)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ChannelValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Electrical phase of a three-phase measurement or control point.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    /// Parse a trailing `_A`/`_B`/`_C` suffix (e.g. `voltage_B`).
    pub fn from_suffix(name: &str) -> Option<Phase> {
        let (_, suffix) = name.rsplit_once('_')?;
        suffix.parse().ok()
    }

    /// Parse a trailing bus key segment such as `Va` or `Sc`.
    pub fn from_key_segment(segment: &str) -> Option<Phase> {
        let mut chars = segment.chars();
        let _signal = chars.next()?;
        let phase = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        phase.to_string().parse().ok()
    }

    pub fn index(self) -> usize {
        match self {
            Phase::A => 0,
            Phase::B => 1,
            Phase::C => 2,
        }
    }

    /// Nominal phase angle of a balanced positive-sequence system.
    pub fn nominal_angle_deg(self) -> f64 {
        match self {
            Phase::A => 0.0,
            Phase::B => -120.0,
            Phase::C => 120.0,
        }
    }
}

/// Channel declaration. Immutable once the session is joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub key: String,
    pub direction: ChannelDirection,
    pub kind: ValueKind,
    pub unit: String,
}

impl ChannelSpec {
    pub fn publication(
        name: impl Into<String>,
        key: impl Into<String>,
        kind: ValueKind,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            direction: ChannelDirection::Publication,
            kind,
            unit: unit.into(),
        }
    }

    pub fn subscription(
        name: impl Into<String>,
        key: impl Into<String>,
        kind: ValueKind,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            direction: ChannelDirection::Subscription,
            kind,
            unit: unit.into(),
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.direction == ChannelDirection::Subscription
    }

    pub fn phase(&self) -> Option<Phase> {
        Phase::from_suffix(&self.name)
    }
}

impl From<&ChannelConfig> for ChannelSpec {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            name: config.name.clone(),
            key: config.key.clone(),
            direction: config.direction,
            kind: config.value_kind,
            unit: config.unit.clone(),
        }
    }
}

/// Sample received on a subscription at a granted time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub channel: String,
    pub value: ChannelValue,
    pub simulation_time: SimTime,
    pub received_wall_time: DateTime<Utc>,
}

pub const FEEDER_PREFIX: &str = "IEEE13bus_fed/gld_hlc_conn";
pub const TRANSMISSION_PREFIX: &str = "gridpack";
pub const ATTACK_PREFIX: &str = "mcp_attack";

/// Standard channel set: feeder-head voltages and power flows, transmission-side voltages,
/// and the attacker's voltage, power and command-blocking publications.
pub fn default_channels() -> Vec<ChannelSpec> {
    let mut channels = Vec::with_capacity(16);
    for phase in Phase::ALL {
        let p = phase.to_string().to_ascii_lowercase();
        channels.push(ChannelSpec::subscription(
            format!("voltage_{phase}"),
            format!("{FEEDER_PREFIX}/V{p}"),
            ValueKind::Complex,
            "V",
        ));
        channels.push(ChannelSpec::subscription(
            format!("power_{phase}"),
            format!("{FEEDER_PREFIX}/S{p}"),
            ValueKind::Complex,
            "VA",
        ));
        channels.push(ChannelSpec::subscription(
            format!("gpk_voltage_{phase}"),
            format!("{TRANSMISSION_PREFIX}/V{p}"),
            ValueKind::Complex,
            "V",
        ));
        channels.push(ChannelSpec::publication(
            format!("voltage_attack_{phase}"),
            format!("{ATTACK_PREFIX}/V{p}"),
            ValueKind::Complex,
            "V",
        ));
        channels.push(ChannelSpec::publication(
            format!("power_attack_{phase}"),
            format!("{ATTACK_PREFIX}/S{p}"),
            ValueKind::Complex,
            "VA",
        ));
    }
    channels.push(ChannelSpec::publication(
        "block_commands",
        format!("{ATTACK_PREFIX}/block_commands"),
        ValueKind::Boolean,
        "",
    ));
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phasor_polar_round_trip() {
        let p = Phasor::from_polar(2401.78, -120.0);
        assert!((p.magnitude() - 2401.78).abs() < 1e-6);
        assert!((p.angle_deg() + 120.0).abs() < 1e-9);
    }

    #[test]
    fn power_factor_phasor_components() {
        let s = Phasor::from_power_factor(1_000_000.0, 0.8);
        assert!((s.re - 800_000.0).abs() < 1e-6);
        assert!((s.im - 600_000.0).abs() < 1e-6);
        assert!((s.power_factor() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn phase_parsing_from_names_and_keys() {
        assert_eq!(Phase::from_suffix("gpk_voltage_B"), Some(Phase::B));
        assert_eq!(Phase::from_suffix("block_commands"), None);
        assert_eq!(Phase::from_key_segment("Sc"), Some(Phase::C));
        assert_eq!(Phase::from_key_segment("block_commands"), None);
    }

    #[test]
    fn default_channel_names_are_unique() {
        let channels = default_channels();
        let mut names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), channels.len());
        assert_eq!(channels.iter().filter(|c| c.is_subscription()).count(), 9);
    }

    #[test]
    fn sim_time_never_goes_backwards_under_max() {
        let a = SimTime::from_secs(3.0);
        assert_eq!(a.max(SimTime::from_secs(2.0)), a);
        assert_eq!(a.since(SimTime::from_secs(5.0)), 0.0);
    }
}
