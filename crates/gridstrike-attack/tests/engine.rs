//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "tests"
//! gs_type: "source"
//! gs_scope: "test"
//! gs_description: "Attack engine pipeline tests against the loopback peer."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use gridstrike_attack::{
    AttackEngine, AttackFailure, AttackIntent, AttackResult, HandlerContext, HandlerError,
    HandlerOutcome, Parameters, RejectionReason, Technique, TechniqueHandler, ValidatedIntent,
};
use gridstrike_common::{
    FederationConfig, ImpactConfig, LoopbackConfig, MonitorConfig, ThreatModelConfig,
};
use gridstrike_federation::{default_channels, BusStats, FederationClient, LoopbackBus};
use gridstrike_metrics::{new_registry, AttackMetrics};
use gridstrike_monitor::GridStateCache;
use gridstrike_persistence::{replay, RecordLogWriter};
use serde_json::{json, Value};

fn engine_with(
    loopback: LoopbackConfig,
    threat_model: ThreatModelConfig,
) -> (AttackEngine, BusStats) {
    let bus = LoopbackBus::new(loopback);
    let stats = bus.stats();
    let config = FederationConfig {
        max_advance_wait: Duration::from_millis(20),
        ..FederationConfig::default()
    };
    let mut session = FederationClient::new(&config, Box::new(bus));
    session.join(default_channels()).expect("join succeeds");
    let cache = Arc::new(GridStateCache::new(MonitorConfig::default()));
    let engine = AttackEngine::new(session, cache, threat_model, ImpactConfig::default());
    (engine, stats)
}

fn engine() -> (AttackEngine, BusStats) {
    engine_with(LoopbackConfig::default(), ThreatModelConfig::default())
}

fn intent(technique: &str, params: Value) -> AttackIntent {
    let parameters: Parameters = serde_json::from_value(params).expect("object parameters");
    AttackIntent::new(technique, parameters)
}

#[test]
fn oversized_injection_is_clamped_and_executed() {
    let (mut engine, stats) = engine();
    let result = engine
        .execute(intent("inject_load", json!({"magnitude": 10_000_000.0})))
        .unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(result.parameters["magnitude"], json!(5_000_000.0));
    assert_eq!(result.adjustments.len(), 1);
    assert_eq!(result.adjustments[0].parameter, "magnitude");
    assert_eq!(stats.publishes(), 1);
    assert_eq!(stats.advances(), 1);
    assert!(result.post_state.sequence > result.pre_state.sequence);
    assert!(result.impact_score > 0.0);
    assert!(result.impact_score <= 100.0);
}

#[test]
fn denied_target_never_reaches_the_bus() {
    let (mut engine, stats) = engine();
    let result = engine
        .execute(intent(
            "spoof_data",
            json!({"target": "emergency_controls", "value": 2400.0}),
        ))
        .unwrap();

    assert!(!result.success);
    assert!(matches!(
        result.failure,
        Some(AttackFailure::Rejected {
            reason: RejectionReason::DeniedTarget { .. }
        })
    ));
    assert_eq!(stats.publishes(), 0);
    assert_eq!(stats.advances(), 0);
    assert_eq!(result.pre_state, result.post_state);
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn unknown_technique_is_a_recorded_failure() {
    let (mut engine, stats) = engine();
    let result = engine.execute(intent("overload_relay", json!({}))).unwrap();
    assert!(matches!(
        result.failure,
        Some(AttackFailure::UnknownTechnique { ref name }) if name == "overload_relay"
    ));
    assert!(result.is_rejected());
    assert_eq!(stats.publishes() + stats.advances(), 0);
}

#[test]
fn reconnaissance_is_side_effect_free() {
    let (mut engine, stats) = engine();
    let result = engine.execute(intent("reconnaissance", json!({}))).unwrap();

    assert!(result.success);
    assert_eq!(result.impact_score, 0.0);
    assert_eq!(stats.publishes(), 0);
    assert_eq!(stats.advances(), 0);
    // Every voltage measurement is a bus: three feeder phases and three transmission phases.
    let buses: Vec<&str> = result.payload["buses"]
        .as_array()
        .expect("bus list")
        .iter()
        .filter_map(|bus| bus["name"].as_str())
        .collect();
    assert_eq!(buses.len(), 6);
    assert!(buses.contains(&"voltage_A"));
    assert!(buses.contains(&"gpk_voltage_C"));
    assert_eq!(
        result.payload["channels"].as_array().map(Vec::len),
        Some(default_channels().len())
    );
}

#[test]
fn second_spoof_inside_minimum_interval_is_rate_limited() {
    let (mut engine, stats) = engine();
    let start = Utc::now();
    let spoof = |offset_ms| {
        let parameters: Parameters =
            serde_json::from_value(json!({"target": "voltage_A", "value": 2200.0})).unwrap();
        AttackIntent::at(
            "spoof_data",
            parameters,
            start + chrono::Duration::milliseconds(offset_ms),
        )
    };

    let first = engine.execute(spoof(0)).unwrap();
    let second = engine.execute(spoof(100)).unwrap();

    assert!(first.success);
    assert!(!second.success);
    assert!(second.is_rate_limited());
    assert_eq!(stats.publishes(), 1);

    engine.reset_rate_limits();
    assert!(engine.execute(spoof(200)).unwrap().success);
}

struct PanickingHandler;

impl TechniqueHandler for PanickingHandler {
    fn execute(
        &self,
        _intent: &ValidatedIntent,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        panic!("relay model diverged");
    }
}

struct FaultingHandler;

impl TechniqueHandler for FaultingHandler {
    fn execute(
        &self,
        _intent: &ValidatedIntent,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        Err(HandlerError::Fault("injector offline".into()))
    }
}

#[test]
fn faulting_handlers_yield_failed_results_and_engine_continues() {
    let (mut engine, _stats) = engine();
    engine.register(Technique::InjectLoad, PanickingHandler);
    engine.register(Technique::BlockCommand, FaultingHandler);

    let first = engine.execute(intent("inject_load", json!({}))).unwrap();
    let second = engine.execute(intent("block_command", json!({}))).unwrap();
    let third = engine.execute(intent("reconnaissance", json!({}))).unwrap();

    assert!(!first.success);
    assert!(matches!(
        first.failure,
        Some(AttackFailure::Handler { ref message }) if message.contains("relay model diverged")
    ));
    assert!(!second.success);
    assert_eq!(second.outcome_label(), "handler_error");
    assert!(third.success);
    assert_eq!(engine.history().len(), 3);
}

#[test]
fn stalled_federation_is_fatal_but_recorded() {
    let loopback = LoopbackConfig {
        stall_after: Some(0.5),
        ..LoopbackConfig::default()
    };
    let (mut engine, _stats) = engine_with(loopback, ThreatModelConfig::default());

    let err = engine
        .execute(intent("inject_load", json!({"magnitude": 1.0e6})))
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.result().success);
    assert_eq!(engine.history().len(), 1);
    assert!(matches!(
        engine.history()[0].failure,
        Some(AttackFailure::Federation { .. })
    ));
}

#[test]
fn block_release_is_left_to_the_caller() {
    let (mut engine, stats) = engine();
    let result = engine
        .execute(intent("block_command", json!({"duration": 5.0})))
        .unwrap();
    assert!(result.success);
    assert_eq!(result.payload["blocked"], json!(true));
    let release = engine.outstanding_block().expect("deadline recorded");

    assert!(!engine
        .release_expired_blocks(release.deadline - chrono::Duration::seconds(1))
        .unwrap());
    let publishes = stats.publishes();
    assert!(engine
        .release_expired_blocks(release.deadline + chrono::Duration::seconds(1))
        .unwrap());
    assert_eq!(stats.publishes(), publishes + 1);
    assert!(engine.outstanding_block().is_none());
    assert!(!engine.release_block().unwrap());
}

#[test]
fn lowering_the_block_flag_clears_the_pending_release() {
    let (mut engine, stats) = engine();
    engine
        .execute(intent("block_command", json!({"duration": 5.0})))
        .unwrap();
    assert!(engine.outstanding_block().is_some());

    let parameters: Parameters = serde_json::from_value(json!({"enable": false})).unwrap();
    let lower = AttackIntent::at(
        "block_command",
        parameters,
        Utc::now() + chrono::Duration::seconds(2),
    );
    let result = engine.execute(lower).unwrap();
    assert!(result.success, "{result:?}");
    assert_eq!(result.payload["blocked"], json!(false));
    assert!(engine.outstanding_block().is_none());

    let publishes = stats.publishes();
    assert!(!engine.release_block().unwrap());
    assert_eq!(stats.publishes(), publishes);
}

#[test]
fn rejoined_session_starts_from_an_empty_grid_picture() {
    let (mut engine, _stats) = engine();
    for _ in 0..6 {
        engine.step().unwrap();
    }
    assert!(engine.cache().snapshot().simulation_time.as_secs() >= 6.0);
    engine.finalize().unwrap();
    engine.rejoin().unwrap();

    let granted = engine.session().granted_time();
    let snapshot = engine.cache().snapshot();
    assert!(snapshot.simulation_time <= granted);
    assert!(snapshot
        .measurements
        .values()
        .all(|m| m.sample.simulation_time <= granted));
    assert!(engine.cache().history(100).len() <= 1);

    let snapshot = engine.step().unwrap();
    let granted = engine.session().granted_time();
    assert!(snapshot.simulation_time <= granted);
    assert!(granted.as_secs() < 6.0);
    assert!(snapshot
        .measurements
        .values()
        .all(|m| m.sample.simulation_time <= granted));

    let result = engine
        .execute(intent("inject_load", json!({"magnitude": 1.0e6})))
        .unwrap();
    assert!(result.pre_state.simulation_time <= result.post_state.simulation_time);
    assert!(result.post_state.simulation_time <= engine.session().granted_time());
}

#[test]
fn every_result_reaches_the_history_sink_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.jsonl");
    let sink = RecordLogWriter::<AttackResult>::open(&path)?;
    let (engine, _stats) = engine();
    let mut engine = engine.with_history_sink(Box::new(sink));

    engine.execute(intent("reconnaissance", json!({})))?;
    engine.execute(intent("spoof_data", json!({"target": "safety_systems"})))?;
    engine.execute(intent("inject_load", json!({"phase": "C"})))?;

    let mut techniques = Vec::new();
    let count = replay::<AttackResult, _>(&path, |entry| {
        techniques.push((entry.sequence, entry.record.technique, entry.record.success));
        Ok(())
    })?;
    assert_eq!(count, 3);
    assert_eq!(
        techniques,
        vec![
            (1, "reconnaissance".to_owned(), true),
            (2, "spoof_data".to_owned(), false),
            (3, "inject_load".to_owned(), true),
        ]
    );
    assert_eq!(engine.history().len(), 3);
    Ok(())
}

#[test]
fn outcomes_are_counted_in_metrics() -> Result<()> {
    let registry = new_registry();
    let metrics = AttackMetrics::new(registry.clone())?;
    let (engine, _stats) = engine();
    let mut engine = engine.with_metrics(metrics);

    engine.execute(intent("reconnaissance", json!({})))?;
    engine.execute(intent("bogus", json!({})))?;

    let families = registry.gather();
    let attacks = families
        .iter()
        .find(|family| family.get_name() == "gridstrike_attacks_total")
        .expect("attack counter registered");
    let total: f64 = attacks
        .get_metric()
        .iter()
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(total, 2.0);
    Ok(())
}
