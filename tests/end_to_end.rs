//! ---
//! gs_section: "15-testing-qa-runbook"
//! gs_subsection: "integration-tests"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "End-to-end scenarios across configuration, engine, campaigns and history."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use gridstrike_attack::{
    AttackEngine, AttackFailure, AttackIntent, AttackResult, AttackSummaryRow, Parameters,
    RejectionReason,
};
use gridstrike_campaign::{
    CampaignController, CampaignSummary, CancelToken, ComparisonReport, HeuristicStrategy,
    RandomStrategy, ScriptedStrategy, TerminationReason,
};
use gridstrike_common::{AppConfig, ThreatModelConfig};
use gridstrike_federation::{BusStats, FederationClient, LoopbackBus};
use gridstrike_metrics::{new_registry, AttackMetrics};
use gridstrike_monitor::GridStateCache;
use gridstrike_persistence::{export_csv, replay, RecordLogWriter};
use serde_json::json;
use tempfile::tempdir;

const CONFIG: &str = r#"
[federation]
federate_name = "red-team"
time_delta = 1.0
max_advance_wait_ms = 50

[threat_model]
min_interval_secs = 0.0
restricted_targets = ["safety_systems", "emergency_controls", "relay_settings"]

[campaign]
duration = 12.0
pacing = 2.0

[loopback]
seed = 42
"#;

fn build(config: &AppConfig, seed: u64) -> Result<(AttackEngine, BusStats)> {
    let mut loopback = config.loopback.clone();
    loopback.seed = seed;
    let bus = LoopbackBus::new(loopback);
    let stats = bus.stats();
    let mut session = FederationClient::new(&config.federation, Box::new(bus));
    session.join(FederationClient::configured_channels(&config.federation))?;
    let cache = Arc::new(GridStateCache::new(config.monitor.clone()));
    let engine = AttackEngine::new(
        session,
        cache,
        config.threat_model.clone(),
        config.impact.clone(),
    );
    Ok((engine, stats))
}

#[test]
fn configured_campaign_is_recorded_and_exported() -> Result<()> {
    let config: AppConfig = CONFIG.parse()?;
    let dir = tempdir()?;
    let log_path = dir.path().join("history").join("campaign.jsonl");
    let (engine, stats) = build(&config, 42)?;
    let registry = new_registry();
    let mut engine = engine
        .with_history_sink(Box::new(RecordLogWriter::<AttackResult>::open(&log_path)?))
        .with_metrics(AttackMetrics::new(registry.clone())?);

    let mut script = ScriptedStrategy::from_json(&json!([
        {"technique": "reconnaissance"},
        {"technique": "spoof_data", "parameters": {"target": "relay_settings", "value": 2000.0}},
        {"technique": "inject_load", "parameters": {"phase": "A", "magnitude": 2.0e6, "power_factor": 0.9}},
        {"technique": "block_command", "parameters": {"enable": true, "duration": 30.0}},
    ]))?;
    let mut controller = CampaignController::new(config.campaign.clone());
    let campaign = controller.run(&mut engine, &mut script)?;

    assert_eq!(campaign.termination, Some(TerminationReason::ControllerStop));
    assert_eq!(campaign.results.len(), 4);
    assert!(matches!(
        campaign.results[1].failure,
        Some(AttackFailure::Rejected {
            reason: RejectionReason::DeniedTarget { .. }
        })
    ));
    assert!(campaign.results[2].success);
    assert!(campaign.results[2].impact_score > 0.0);
    assert!(campaign.results[3].success);
    // The outstanding block is cleared when the campaign seals.
    assert!(engine.outstanding_block().is_none());
    assert!(stats.publishes() >= 3);

    let mut replayed = Vec::new();
    let count = replay::<AttackResult, _>(&log_path, |entry| {
        replayed.push(entry.record);
        Ok(())
    })?;
    assert_eq!(count, 4);
    assert_eq!(replayed, campaign.results);

    let csv_path = dir.path().join("history.csv");
    let rows = export_csv(&csv_path, replayed.iter().map(AttackSummaryRow::from))?;
    assert_eq!(rows, 4);
    let csv = std::fs::read_to_string(&csv_path)?;
    assert!(csv.lines().next().is_some_and(|header| header.contains("technique")));
    assert!(csv.contains("relay_settings") || csv.contains("denied"));

    let summary = CampaignSummary::from_campaign(&campaign);
    assert_eq!(summary.successes, 3);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.strategic_coherence, 75.0);
    Ok(())
}

#[test]
fn shipped_configuration_files_load() -> Result<()> {
    let config: AppConfig = include_str!("../configs/gridstrike.toml").parse()?;
    assert_eq!(config.campaign.duration, 60.0);
    assert!(config.history.enabled);

    let threat_model =
        ThreatModelConfig::from_yaml_str(include_str!("../configs/threat_model.example.yaml"))?;
    assert!(threat_model
        .restricted_targets
        .iter()
        .any(|target| target == "protection_relays"));
    Ok(())
}

#[test]
fn yaml_threat_model_gates_the_engine() -> Result<()> {
    let mut config = AppConfig::default();
    config.threat_model = ThreatModelConfig::from_yaml_str(
        r#"
allowed_techniques:
  - reconnaissance
  - inject_load
power_limits:
  max_injection: 1000000
"#,
    )?;
    let (mut engine, stats) = build(&config, 7)?;

    let spoof = engine.execute(AttackIntent::new("spoof_data", Parameters::new()))?;
    assert!(matches!(
        spoof.failure,
        Some(AttackFailure::Rejected {
            reason: RejectionReason::TechniqueNotAllowed { .. }
        })
    ));
    assert_eq!(stats.publishes(), 0);

    let parameters: Parameters = serde_json::from_value(json!({"magnitude": 4.0e6}))?;
    let inject = engine.execute(AttackIntent::new("inject_load", parameters))?;
    assert!(inject.success);
    assert_eq!(inject.parameters["magnitude"], json!(1_000_000.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strategies_compare_on_independent_sessions() -> Result<()> {
    let config: AppConfig = CONFIG.parse()?;
    let cancel = CancelToken::new();
    let mut tasks = Vec::new();
    for seed in 1..=2u64 {
        for heuristic in [true, false] {
            let config = config.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::task::spawn_blocking(move || -> Result<(bool, CampaignSummary)> {
                let (mut engine, _stats) = build(&config, seed)?;
                let mut controller =
                    CampaignController::new(config.campaign.clone()).with_cancel_token(cancel);
                let campaign = if heuristic {
                    let mut strategy = HeuristicStrategy::new(config.threat_model.nominal_voltage);
                    controller.run(&mut engine, &mut strategy)?
                } else {
                    let mut strategy = RandomStrategy::seeded(seed);
                    controller.run(&mut engine, &mut strategy)?
                };
                engine.finalize()?;
                Ok((heuristic, CampaignSummary::from_campaign(&campaign)))
            }));
        }
    }

    let mut heuristic = Vec::new();
    let mut random = Vec::new();
    for task in tasks {
        let (is_heuristic, summary) = task.await??;
        assert_eq!(summary.termination.as_deref(), Some("duration elapsed"));
        assert!(summary.sim_elapsed >= 12.0);
        if is_heuristic {
            heuristic.push(summary);
        } else {
            random.push(summary);
        }
    }

    let report = ComparisonReport::compare(
        ("heuristic", heuristic.as_slice()),
        ("random", random.as_slice()),
    );
    assert_eq!(report.candidate.campaigns, 2);
    assert_eq!(report.baseline.campaigns, 2);
    assert!(report.candidate.max_impact >= report.candidate.mean_impact);
    assert!((0.0..=1.0).contains(&report.baseline.effective_share));
    match report.improvement_ratio {
        Some(ratio) => assert!(ratio >= 0.0),
        None => assert_eq!(report.baseline.mean_impact, 0.0),
    }
    Ok(())
}
