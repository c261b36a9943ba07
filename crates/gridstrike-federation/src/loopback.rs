//! ---
//! gs_section: "02-messaging-ipc-data-model"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Federation session, channel schema, and bus adapters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! In-process federation peer with a coarse three-phase feeder model.
//!
//! The peer grants time on a fixed period, applies attacker publications at the next
//! grant, and reports feeder-head voltages and power flows plus transmission-side
//! voltages with seeded Gaussian noise. It is not a power-flow solver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridstrike_common::{ChannelDirection, LoopbackConfig, ValueKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, trace};

use crate::bus::{BusReading, FederationBus};
use crate::channel::{
    ChannelSpec, ChannelValue, Phase, Phasor, SimTime, ATTACK_PREFIX, TRANSMISSION_PREFIX,
};
use crate::{FederationError, Result};

const GRANT_EPSILON: f64 = 1e-9;

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    registrations: AtomicU64,
    publishes: AtomicU64,
    time_requests: AtomicU64,
    grants: AtomicU64,
    finalizes: AtomicU64,
}

/// Shared call counters for a [`LoopbackBus`]. Clones observe the same counters.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    inner: Arc<Counters>,
}

impl BusStats {
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> u64 {
        self.inner.registrations.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> u64 {
        self.inner.publishes.load(Ordering::SeqCst)
    }

    /// Time requests, granted or not.
    pub fn advances(&self) -> u64 {
        self.inner.time_requests.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> u64 {
        self.inner.grants.load(Ordering::SeqCst)
    }

    pub fn finalizes(&self) -> u64 {
        self.inner.finalizes.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    FeederVoltage(Phase),
    FeederPower(Phase),
    TransmissionVoltage(Phase),
    SpoofVoltage(Phase),
    AttackPower(Phase),
    BlockCommands,
}

impl Signal {
    fn classify(key: &str, direction: ChannelDirection) -> Option<Signal> {
        let (prefix, segment) = key.rsplit_once('/')?;
        if direction == ChannelDirection::Publication {
            if !prefix.starts_with(ATTACK_PREFIX) {
                return None;
            }
            if segment == "block_commands" {
                return Some(Signal::BlockCommands);
            }
            let phase = Phase::from_key_segment(segment)?;
            return match segment.chars().next()? {
                'V' => Some(Signal::SpoofVoltage(phase)),
                'S' => Some(Signal::AttackPower(phase)),
                _ => None,
            };
        }
        let phase = Phase::from_key_segment(segment)?;
        match (segment.chars().next()?, prefix.starts_with(TRANSMISSION_PREFIX)) {
            ('V', true) => Some(Signal::TransmissionVoltage(phase)),
            ('V', false) => Some(Signal::FeederVoltage(phase)),
            ('S', false) => Some(Signal::FeederPower(phase)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    direction: ChannelDirection,
    kind: ValueKind,
    signal: Option<Signal>,
}

#[derive(Debug, Clone, Default)]
struct FeederModel {
    voltage_pu: [f64; 3],
    injected: [Phasor; 3],
    spoofed_voltage: [Option<Phasor>; 3],
    blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Initializing,
    Executing,
    Finalized,
}

/// Simulated federation peer implementing [`FederationBus`] in-process.
pub struct LoopbackBus {
    config: LoopbackConfig,
    rng: StdRng,
    stats: BusStats,
    lifecycle: Lifecycle,
    registrations: HashMap<String, Registration>,
    time: SimTime,
    steps: u64,
    pending: Vec<(Signal, ChannelValue)>,
    inbox: HashMap<String, BusReading>,
    model: FeederModel,
}

impl LoopbackBus {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            stats: BusStats::default(),
            lifecycle: Lifecycle::Idle,
            registrations: HashMap::new(),
            time: SimTime::ZERO,
            steps: 0,
            pending: Vec::new(),
            inbox: HashMap::new(),
            model: FeederModel::default(),
        }
    }

    /// Handle onto this peer's call counters.
    pub fn stats(&self) -> BusStats {
        self.stats.clone()
    }

    pub fn is_blocked(&self) -> bool {
        self.model.blocked
    }

    fn base_load(&self) -> Phasor {
        Phasor::from_power_factor(self.config.base_load, self.config.base_power_factor)
    }

    fn sample_noise(&mut self) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        z * self.config.noise_sigma_pu.max(0.0)
    }

    fn apply_pending(&mut self) {
        for (signal, value) in std::mem::take(&mut self.pending) {
            match (signal, value) {
                (Signal::SpoofVoltage(phase), value) => {
                    self.model.spoofed_voltage[phase.index()] = value.as_phasor();
                }
                (Signal::AttackPower(phase), value) => {
                    if let Some(power) = value.as_phasor() {
                        self.model.injected[phase.index()] = power;
                    }
                }
                (Signal::BlockCommands, value) => {
                    if let Some(blocked) = value.as_bool() {
                        self.model.blocked = blocked;
                    }
                }
                _ => {}
            }
        }
    }

    /// Advance the feeder model by one period.
    fn step_model(&mut self) {
        let base = self.base_load();
        for phase in Phase::ALL {
            let i = phase.index();
            let load = base + self.model.injected[i];
            let extra_mva = (load.magnitude() - self.config.base_load) / 1e6;
            let uncorrected = 1.0 - self.config.sensitivity_pu_per_mva * extra_mva;
            self.model.voltage_pu[i] = if self.model.blocked {
                uncorrected
            } else {
                uncorrected + self.config.regulator_gain * (1.0 - uncorrected)
            };
        }
        self.steps += 1;
    }

    fn decay_injection(&mut self) {
        for injected in &mut self.model.injected {
            *injected = injected.scale(self.config.injection_decay);
        }
    }

    /// Refresh subscription values from the model. Stale when the peer skips this step.
    fn publish_state(&mut self, fresh: bool) {
        for reading in self.inbox.values_mut() {
            reading.updated = false;
        }
        if !fresh {
            return;
        }
        let base = self.base_load();
        let mut subscriptions: Vec<(String, Signal)> = self
            .registrations
            .iter()
            .filter(|(_, reg)| reg.direction == ChannelDirection::Subscription)
            .filter_map(|(key, reg)| reg.signal.map(|signal| (key.clone(), signal)))
            .collect();
        subscriptions.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, signal) in subscriptions {
            let noise = 1.0 + self.sample_noise();
            let value = match signal {
                Signal::FeederVoltage(phase) => {
                    let i = phase.index();
                    match self.model.spoofed_voltage[i] {
                        Some(spoofed) => spoofed,
                        None => Phasor::from_polar(
                            self.model.voltage_pu[i] * self.config.nominal_voltage * noise,
                            phase.nominal_angle_deg(),
                        ),
                    }
                }
                Signal::TransmissionVoltage(phase) => {
                    let sag = 1.0 - self.model.voltage_pu[phase.index()];
                    Phasor::from_polar(
                        (1.0 - 0.5 * sag) * self.config.nominal_voltage * noise,
                        phase.nominal_angle_deg(),
                    )
                }
                Signal::FeederPower(phase) => {
                    (base + self.model.injected[phase.index()]).scale(noise)
                }
                _ => continue,
            };
            self.inbox.insert(
                key,
                BusReading {
                    value: ChannelValue::Complex(value),
                    updated: true,
                },
            );
        }
        self.model.spoofed_voltage = [None; 3];
    }

    fn reset_session(&mut self) {
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.registrations.clear();
        self.time = SimTime::ZERO;
        self.steps = 0;
        self.pending.clear();
        self.inbox.clear();
        self.model = FeederModel {
            voltage_pu: [1.0; 3],
            ..FeederModel::default()
        };
    }

    fn require(&self, expected: Lifecycle, op: &str) -> Result<()> {
        if self.lifecycle == expected {
            Ok(())
        } else {
            Err(FederationError::Bus(format!(
                "loopback peer cannot {op} while {:?}",
                self.lifecycle
            )))
        }
    }
}

impl FederationBus for LoopbackBus {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn connect(&mut self, federate: &str) -> Result<()> {
        BusStats::bump(&self.stats.inner.connects);
        self.reset_session();
        self.lifecycle = Lifecycle::Initializing;
        debug!(federate, seed = self.config.seed, "loopback peer connected");
        Ok(())
    }

    fn register(&mut self, spec: &ChannelSpec) -> Result<()> {
        self.require(Lifecycle::Initializing, "register")?;
        if self.registrations.contains_key(&spec.key) {
            return Err(FederationError::Bus(format!(
                "key '{}' already registered",
                spec.key
            )));
        }
        BusStats::bump(&self.stats.inner.registrations);
        self.registrations.insert(
            spec.key.clone(),
            Registration {
                direction: spec.direction,
                kind: spec.kind,
                signal: Signal::classify(&spec.key, spec.direction),
            },
        );
        Ok(())
    }

    fn enter_executing(&mut self) -> Result<()> {
        self.require(Lifecycle::Initializing, "enter executing mode")?;
        self.lifecycle = Lifecycle::Executing;
        self.publish_state(true);
        Ok(())
    }

    fn publish(&mut self, key: &str, value: &ChannelValue) -> Result<()> {
        self.require(Lifecycle::Executing, "publish")?;
        let registration = self
            .registrations
            .get(key)
            .ok_or_else(|| FederationError::UnknownChannel(key.to_owned()))?;
        if registration.kind != value.kind() {
            return Err(FederationError::Bus(format!(
                "key '{key}' registered as {:?}",
                registration.kind
            )));
        }
        BusStats::bump(&self.stats.inner.publishes);
        if let Some(signal) = registration.signal {
            self.pending.push((signal, value.clone()));
        }
        trace!(key, "loopback publication queued");
        Ok(())
    }

    fn request_time(
        &mut self,
        requested: SimTime,
        max_wait: Duration,
    ) -> Result<Option<SimTime>> {
        self.require(Lifecycle::Executing, "advance")?;
        BusStats::bump(&self.stats.inner.time_requests);

        if let Some(stall_after) = self.config.stall_after {
            if requested.as_secs() > stall_after + GRANT_EPSILON {
                std::thread::sleep(max_wait);
                return Ok(None);
            }
        }

        let period = self.config.period;
        let target = requested.max(self.time).as_secs();
        let periods = ((target / period) - GRANT_EPSILON).ceil().max(0.0);
        let granted = SimTime::from_secs(periods * period).max(self.time);
        let steps = ((granted.as_secs() - self.time.as_secs()) / period).round() as u64;

        if steps > 0 {
            self.apply_pending();
            for _ in 0..steps {
                self.step_model();
                let fresh = self.steps % u64::from(self.config.publish_every) == 0;
                self.publish_state(fresh);
                self.decay_injection();
            }
        } else {
            self.publish_state(false);
        }
        self.time = granted;
        BusStats::bump(&self.stats.inner.grants);
        trace!(granted = granted.as_secs(), steps, "loopback grant");
        Ok(Some(granted))
    }

    fn read(&mut self, key: &str) -> Option<BusReading> {
        let reading = self.inbox.get_mut(key)?;
        let snapshot = reading.clone();
        reading.updated = false;
        Some(snapshot)
    }

    fn finalize(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Finalized {
            BusStats::bump(&self.stats.inner.finalizes);
            self.lifecycle = Lifecycle::Finalized;
            debug!(time = self.time.as_secs(), "loopback peer finalized");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::default_channels;

    fn connected_bus(config: LoopbackConfig) -> LoopbackBus {
        let mut bus = LoopbackBus::new(config);
        bus.connect("test").unwrap();
        for spec in default_channels() {
            bus.register(&spec).unwrap();
        }
        bus.enter_executing().unwrap();
        bus
    }

    fn feeder_voltage(bus: &mut LoopbackBus, phase: &str) -> f64 {
        bus.read(&format!("IEEE13bus_fed/gld_hlc_conn/V{phase}"))
            .and_then(|r| r.value.magnitude())
            .unwrap()
    }

    #[test]
    fn grants_round_up_to_period() {
        let mut bus = connected_bus(LoopbackConfig {
            period: 0.5,
            ..LoopbackConfig::default()
        });
        let granted = bus
            .request_time(SimTime::from_secs(1.2), Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert!((granted.as_secs() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn load_injection_sags_voltage() {
        let config = LoopbackConfig {
            noise_sigma_pu: 0.0,
            ..LoopbackConfig::default()
        };
        let mut bus = connected_bus(config);
        bus.request_time(SimTime::from_secs(1.0), Duration::from_millis(10))
            .unwrap();
        let before = feeder_voltage(&mut bus, "a");

        bus.publish(
            "mcp_attack/Sa",
            &ChannelValue::Complex(Phasor::from_power_factor(5_000_000.0, 0.9)),
        )
        .unwrap();
        bus.request_time(SimTime::from_secs(2.0), Duration::from_millis(10))
            .unwrap();
        let after = feeder_voltage(&mut bus, "a");
        assert!(after < before, "{after} should be below {before}");
    }

    #[test]
    fn spoofed_voltage_is_reported_for_one_step() {
        let config = LoopbackConfig {
            noise_sigma_pu: 0.0,
            ..LoopbackConfig::default()
        };
        let mut bus = connected_bus(config);
        bus.publish(
            "mcp_attack/Vb",
            &ChannelValue::Complex(Phasor::from_polar(2000.0, -120.0)),
        )
        .unwrap();
        bus.request_time(SimTime::from_secs(1.0), Duration::from_millis(10))
            .unwrap();
        assert!((feeder_voltage(&mut bus, "b") - 2000.0).abs() < 1e-6);
        bus.request_time(SimTime::from_secs(2.0), Duration::from_millis(10))
            .unwrap();
        assert!((feeder_voltage(&mut bus, "b") - 2401.78).abs() < 1.0);
    }

    #[test]
    fn stalled_peer_reports_no_grant() {
        let mut bus = connected_bus(LoopbackConfig {
            stall_after: Some(1.0),
            ..LoopbackConfig::default()
        });
        assert!(bus
            .request_time(SimTime::from_secs(1.0), Duration::from_millis(1))
            .unwrap()
            .is_some());
        assert!(bus
            .request_time(SimTime::from_secs(2.0), Duration::from_millis(1))
            .unwrap()
            .is_none());
        assert_eq!(bus.stats().advances(), 2);
        assert_eq!(bus.stats().grants(), 1);
    }

    #[test]
    fn skipped_steps_leave_readings_stale() {
        let mut bus = connected_bus(LoopbackConfig {
            publish_every: 2,
            ..LoopbackConfig::default()
        });
        bus.request_time(SimTime::from_secs(1.0), Duration::from_millis(1))
            .unwrap();
        let reading = bus.read("IEEE13bus_fed/gld_hlc_conn/Va").unwrap();
        assert!(!reading.updated);
        bus.request_time(SimTime::from_secs(2.0), Duration::from_millis(1))
            .unwrap();
        let reading = bus.read("IEEE13bus_fed/gld_hlc_conn/Va").unwrap();
        assert!(reading.updated);
    }
}
