//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Grid state cache with single-writer snapshot replacement."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use gridstrike_common::{system_clock, MonitorConfig, SharedClock};
use gridstrike_federation::{ChannelSpec, SimTime, TelemetrySample};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::snapshot::{GridSnapshot, HealthStatus, HealthSummary, Measurement, MeasurementKind};
use crate::stability::StabilityMetrics;

#[derive(Debug)]
struct CacheState {
    current: Arc<GridSnapshot>,
    ring: VecDeque<Arc<GridSnapshot>>,
    baseline: Option<Arc<GridSnapshot>>,
}

/// Owner of the grid snapshot and its bounded history.
///
/// Ingestion builds a complete new snapshot and swaps it in under a short write lock,
/// so readers only ever see whole snapshots. Concurrent ingests are serialised.
#[derive(Debug)]
pub struct GridStateCache {
    config: MonitorConfig,
    clock: SharedClock,
    kinds: RwLock<HashMap<String, MeasurementKind>>,
    writer: Mutex<()>,
    state: RwLock<CacheState>,
}

impl GridStateCache {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: MonitorConfig, clock: SharedClock) -> Self {
        let empty = Arc::new(GridSnapshot::empty(clock.now()));
        let capacity = config.history_capacity.max(1);
        Self {
            config,
            clock,
            kinds: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            state: RwLock::new(CacheState {
                current: empty,
                ring: VecDeque::with_capacity(capacity),
                baseline: None,
            }),
        }
    }

    /// Record the measurement kind of each channel from its declared unit.
    pub fn describe_channels<'a>(&self, channels: impl IntoIterator<Item = &'a ChannelSpec>) {
        let mut kinds = self.kinds.write();
        for spec in channels {
            kinds.insert(spec.name.clone(), MeasurementKind::from_unit(&spec.unit));
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Fold one batch of freshly received samples into a new snapshot.
    ///
    /// Measurements absent from the batch carry over unchanged. Samples stamped after
    /// `granted` are discarded so no measurement is ahead of the federation clock.
    pub fn ingest(&self, samples: &[TelemetrySample], granted: SimTime) -> Arc<GridSnapshot> {
        let _writer = self.writer.lock();
        let previous = self.state.read().current.clone();

        let mut measurements = previous.measurements.clone();
        let mut updated = BTreeSet::new();
        {
            let kinds = self.kinds.read();
            for sample in samples {
                if sample.simulation_time > granted {
                    warn!(
                        channel = %sample.channel,
                        sample_time = sample.simulation_time.as_secs(),
                        granted = granted.as_secs(),
                        "discarding sample newer than granted time"
                    );
                    continue;
                }
                let kind = kinds
                    .get(&sample.channel)
                    .copied()
                    .unwrap_or_else(|| kind_from_name(&sample.channel));
                let nominal = self.nominal_for(&sample.channel, kind);
                updated.insert(sample.channel.clone());
                measurements.insert(
                    sample.channel.clone(),
                    Measurement::derive(sample.clone(), kind, nominal),
                );
            }
        }

        let mut anomalies = BTreeSet::new();
        for (name, m) in &measurements {
            if m.kind == MeasurementKind::Other {
                continue;
            }
            if m.deviation > self.config.deviation_threshold {
                anomalies.insert(name.clone());
                continue;
            }
            if updated.contains(name) {
                if let Some(prior) = previous.measurements.get(name) {
                    if (m.per_unit - prior.per_unit).abs() > self.config.slew_threshold {
                        anomalies.insert(name.clone());
                    }
                }
            }
        }

        let health = HealthSummary::assess(&measurements);
        let snapshot = Arc::new(GridSnapshot {
            sequence: previous.sequence + 1,
            simulation_time: granted.max(previous.simulation_time),
            captured_at: self.clock.now(),
            measurements,
            anomalies,
            health,
        });

        let mut state = self.state.write();
        if state.ring.len() >= self.config.history_capacity.max(1) {
            state.ring.pop_front();
        }
        state.ring.push_back(snapshot.clone());
        state.current = snapshot.clone();
        if state.baseline.is_none()
            && !snapshot.is_empty()
            && snapshot.health.status == HealthStatus::Healthy
        {
            info!(sequence = snapshot.sequence, "baseline snapshot captured");
            state.baseline = Some(snapshot.clone());
        }
        drop(state);

        debug!(
            sequence = snapshot.sequence,
            granted = granted.as_secs(),
            samples = updated.len(),
            anomalies = snapshot.anomalies.len(),
            health = snapshot.health.score,
            "snapshot ingested"
        );
        snapshot
    }

    /// The latest snapshot. Never blocks on an in-flight ingest for longer than the swap.
    pub fn snapshot(&self) -> Arc<GridSnapshot> {
        self.state.read().current.clone()
    }

    /// Up to `window` most recent snapshots, oldest first. Larger windows are truncated
    /// to what is retained.
    pub fn history(&self, window: usize) -> HistoryWindow {
        let state = self.state.read();
        let skip = state.ring.len().saturating_sub(window);
        HistoryWindow {
            entries: state.ring.iter().skip(skip).cloned().collect(),
        }
    }

    /// Names of measurements flagged in the latest snapshot.
    pub fn anomalies(&self) -> BTreeSet<String> {
        self.state.read().current.anomalies.clone()
    }

    /// First snapshot that assessed as healthy, if any.
    pub fn baseline(&self) -> Option<Arc<GridSnapshot>> {
        self.state.read().baseline.clone()
    }

    /// Stability over the most recent `window` snapshots.
    pub fn stability(&self, window: usize) -> StabilityMetrics {
        StabilityMetrics::over(self.history(window).iter())
    }

    /// Forget everything observed so far: history, baseline and the current
    /// measurements. Used when a new session restarts simulated time at zero. Sequence
    /// numbers keep increasing across the reset.
    pub fn reset(&self) {
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        let mut empty = GridSnapshot::empty(self.clock.now());
        empty.sequence = state.current.sequence;
        state.current = Arc::new(empty);
        state.ring.clear();
        state.baseline = None;
        debug!(sequence = state.current.sequence, "grid state reset");
    }

    fn nominal_for(&self, name: &str, kind: MeasurementKind) -> f64 {
        if let Some(nominal) = self.config.nominal_overrides.get(name) {
            return *nominal;
        }
        match kind {
            MeasurementKind::Voltage => self.config.nominal_voltage,
            MeasurementKind::Power => self.config.nominal_power,
            MeasurementKind::Other => 1.0,
        }
    }
}

fn kind_from_name(name: &str) -> MeasurementKind {
    if name.contains("voltage") {
        MeasurementKind::Voltage
    } else if name.contains("power") {
        MeasurementKind::Power
    } else {
        MeasurementKind::Other
    }
}

/// Ordered, restartable view over retained snapshots.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    entries: Vec<Arc<GridSnapshot>>,
}

impl HistoryWindow {
    pub fn iter(&self) -> impl Iterator<Item = &GridSnapshot> + Clone {
        self.entries.iter().map(|entry| &**entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&GridSnapshot> {
        self.entries.first().map(|entry| &**entry)
    }

    pub fn last(&self) -> Option<&GridSnapshot> {
        self.entries.last().map(|entry| &**entry)
    }
}

impl<'a> IntoIterator for &'a HistoryWindow {
    type Item = &'a GridSnapshot;
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, Arc<GridSnapshot>>,
        fn(&'a Arc<GridSnapshot>) -> &'a GridSnapshot,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .iter()
            .map(deref_snapshot as fn(&'a Arc<GridSnapshot>) -> &'a GridSnapshot)
    }
}

fn deref_snapshot(entry: &Arc<GridSnapshot>) -> &GridSnapshot {
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridstrike_federation::{ChannelValue, Phase, Phasor};

    fn voltage(phase: Phase, magnitude: f64, at: f64) -> TelemetrySample {
        TelemetrySample {
            channel: format!("voltage_{phase}"),
            value: ChannelValue::Complex(Phasor::from_polar(magnitude, phase.nominal_angle_deg())),
            simulation_time: SimTime::from_secs(at),
            received_wall_time: Utc::now(),
        }
    }

    fn cache(capacity: usize) -> GridStateCache {
        GridStateCache::new(MonitorConfig {
            history_capacity: capacity,
            ..MonitorConfig::default()
        })
    }

    #[test]
    fn ingest_derives_per_unit_and_deviation() {
        let cache = cache(10);
        let snap = cache.ingest(&[voltage(Phase::A, 2401.78 * 0.9, 1.0)], SimTime::from_secs(1.0));
        let m = snap.get("voltage_A").unwrap();
        assert!((m.per_unit - 0.9).abs() < 1e-9);
        assert!((m.deviation - 0.1).abs() < 1e-9);
        assert!(snap.anomalies.contains("voltage_A"));
        assert_eq!(snap.health.score, 80);
    }

    #[test]
    fn unchanged_measurements_carry_over() {
        let cache = cache(10);
        cache.ingest(
            &[voltage(Phase::A, 2401.78, 1.0), voltage(Phase::B, 2401.78, 1.0)],
            SimTime::from_secs(1.0),
        );
        let snap = cache.ingest(&[voltage(Phase::A, 2400.0, 2.0)], SimTime::from_secs(2.0));
        assert_eq!(snap.measurements.len(), 2);
        assert_eq!(
            snap.get("voltage_B").unwrap().sample.simulation_time,
            SimTime::from_secs(1.0)
        );
        assert_eq!(snap.simulation_time, SimTime::from_secs(2.0));
    }

    #[test]
    fn slew_between_snapshots_is_flagged() {
        let cache = GridStateCache::new(MonitorConfig {
            deviation_threshold: 0.5,
            slew_threshold: 0.1,
            ..MonitorConfig::default()
        });
        cache.ingest(&[voltage(Phase::C, 2401.78 * 1.2, 1.0)], SimTime::from_secs(1.0));
        assert!(cache.anomalies().is_empty());
        cache.ingest(&[voltage(Phase::C, 2401.78 * 0.95, 2.0)], SimTime::from_secs(2.0));
        assert!(cache.anomalies().contains("voltage_C"));
    }

    #[test]
    fn future_samples_are_discarded() {
        let cache = cache(10);
        let snap = cache.ingest(&[voltage(Phase::A, 2401.78, 5.0)], SimTime::from_secs(1.0));
        assert!(snap.get("voltage_A").is_none());
    }

    #[test]
    fn history_truncates_to_capacity_and_restarts() {
        let cache = cache(3);
        for t in 1..=5 {
            cache.ingest(&[voltage(Phase::A, 2401.78, t as f64)], SimTime::from_secs(t as f64));
        }
        let window = cache.history(10);
        assert_eq!(window.len(), 3);
        let first_pass: Vec<u64> = window.iter().map(|s| s.sequence).collect();
        let second_pass: Vec<u64> = (&window).into_iter().map(|s| s.sequence).collect();
        assert_eq!(first_pass, vec![3, 4, 5]);
        assert_eq!(first_pass, second_pass);
        assert_eq!(cache.history(2).first().unwrap().sequence, 4);
    }

    #[test]
    fn baseline_is_first_healthy_snapshot() {
        let cache = cache(10);
        cache.ingest(&[voltage(Phase::A, 2401.78 * 0.8, 1.0)], SimTime::from_secs(1.0));
        assert!(cache.baseline().is_none());
        cache.ingest(&[voltage(Phase::A, 2401.78, 2.0)], SimTime::from_secs(2.0));
        cache.ingest(&[voltage(Phase::A, 2401.78, 3.0)], SimTime::from_secs(3.0));
        assert_eq!(cache.baseline().unwrap().sequence, 2);
    }

    #[test]
    fn reset_drops_measurements_but_keeps_sequence_rising() {
        let cache = cache(10);
        cache.ingest(&[voltage(Phase::A, 2401.78, 6.0)], SimTime::from_secs(6.0));
        cache.reset();

        let cleared = cache.snapshot();
        assert!(cleared.is_empty());
        assert_eq!(cleared.simulation_time, SimTime::ZERO);
        assert!(cache.history(10).is_empty());
        assert!(cache.baseline().is_none());

        let snap = cache.ingest(&[voltage(Phase::B, 2401.78, 1.0)], SimTime::from_secs(1.0));
        assert_eq!(snap.simulation_time, SimTime::from_secs(1.0));
        assert!(snap.get("voltage_A").is_none());
        assert_eq!(snap.sequence, 2);
    }
}
