//! ---
//! gs_section: "05-networking-external-interfaces"
//! gs_subsection: "binary"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Subcommand implementations for the operator CLI."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use gridstrike_attack::{
    normalize_parameters, AttackIntent, AttackResult, AttackSummaryRow, Parameters, ReconReport,
};
use gridstrike_campaign::{
    AttackService, CampaignSummary, CancelToken, ComparisonReport, ServiceError,
};
use gridstrike_persistence::{export_csv, replay};
use serde::Serialize;
use serde_json::Value;
use tokio::signal;
use tokio::task;
use tracing::{info, warn};

use crate::harness::{Harness, StrategyKind};

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Technique name, e.g. `inject_load`.
    #[arg(long)]
    pub technique: String,
    /// Parameter as `key=value`; values are read as JSON when they parse, text otherwise.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Rewrite aliases and fill defaults before validation.
    #[arg(long)]
    pub normalize: bool,
}

#[derive(Debug, Args)]
pub struct CampaignArgs {
    #[arg(long, value_enum, default_value = "heuristic")]
    pub strategy: StrategyKind,
    /// Campaign length in simulation seconds; defaults to the configured duration.
    #[arg(long)]
    pub duration: Option<f64>,
    /// Seed for the loopback peer and the random strategy.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    #[arg(long, default_value_t = 5)]
    pub trials: usize,
    #[arg(long)]
    pub duration: Option<f64>,
    /// First seed; trial `n` uses `seed + n` for both strategies.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Record log written by a previous run.
    #[arg(long, value_name = "FILE")]
    pub path: PathBuf,
    /// Also export a flat CSV of the history.
    #[arg(long, value_name = "OUT")]
    pub csv: Option<PathBuf>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_params(pairs: &[String]) -> Result<Parameters> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("parameter '{pair}' is not KEY=VALUE"))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
            Ok((key.trim().to_owned(), value))
        })
        .collect()
}

pub fn execute(harness: &Harness, args: ExecuteArgs) -> Result<()> {
    let mut parameters = parse_params(&args.params)?;
    if args.normalize {
        parameters = normalize_parameters(&args.technique, &parameters, harness.nominal_voltage());
    }
    let mut engine = harness.engine(None, Some("execute"))?;
    let outcome = engine.execute(AttackIntent::new(args.technique, parameters));
    let result = match &outcome {
        Ok(result) => result,
        Err(err) => err.result(),
    };
    print_json(result)?;
    if let Some(release) = engine.outstanding_block() {
        info!(deadline = %release.deadline, "command block stays raised until the session closes");
    }
    engine.finalize()?;
    outcome.map(|_| ()).map_err(Into::into)
}

pub async fn campaign(harness: &Harness, args: CampaignArgs) -> Result<()> {
    let seed = args.seed.unwrap_or(harness.config.loopback.seed);
    let engine = harness.engine(Some(seed), Some(args.strategy.label()))?;
    let config = harness.campaign_config(args.duration);
    let duration = config.duration;
    let service = AttackService::new(engine, config).with_metrics(harness.campaign_metrics());

    let handle = service.start_campaign(duration, args.strategy.build(seed, harness.nominal_voltage()))?;
    let cancel = handle.cancel_token();
    let mut join = task::spawn_blocking(move || handle.join());
    let outcome = tokio::select! {
        outcome = &mut join => outcome?,
        _ = signal::ctrl_c() => {
            warn!("ctrl-c received; cancelling campaign");
            cancel.cancel();
            join.await?
        }
    };

    let result = match outcome {
        Ok(campaign) => {
            print_json(&CampaignSummary::from_campaign(&campaign))?;
            Ok(())
        }
        Err(ServiceError::Campaign(err)) => {
            if let Some(campaign) = err.campaign() {
                print_json(&CampaignSummary::from_campaign(campaign))?;
            }
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    };
    service.finalize()?;
    result
}

pub async fn compare(harness: &Harness, args: CompareArgs) -> Result<()> {
    if args.trials == 0 {
        return Err(anyhow!("--trials must be at least 1"));
    }
    let cancel = CancelToken::new();
    let mut trials = Vec::with_capacity(args.trials * 2);
    for trial in 0..args.trials {
        let seed = args.seed + trial as u64;
        for kind in [StrategyKind::Heuristic, StrategyKind::Random] {
            let harness = harness.clone();
            let cancel = cancel.clone();
            let duration = args.duration;
            trials.push((
                kind,
                task::spawn_blocking(move || harness.run_trial(kind, seed, duration, cancel)),
            ));
        }
    }

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("ctrl-c received; cancelling trials");
                cancel.cancel();
            }
        })
    };

    let mut heuristic = Vec::new();
    let mut random = Vec::new();
    for (kind, trial) in trials {
        match trial.await.context("trial task failed")? {
            Ok(summary) => match kind {
                StrategyKind::Heuristic => heuristic.push(summary),
                StrategyKind::Random => random.push(summary),
            },
            Err(err) => warn!(strategy = kind.label(), error = %err, "trial failed"),
        }
    }
    interrupt.abort();

    let report = ComparisonReport::compare(
        (StrategyKind::Heuristic.label(), heuristic.as_slice()),
        (StrategyKind::Random.label(), random.as_slice()),
    );
    info!(
        heuristic_mean = report.candidate.mean_impact,
        random_mean = report.baseline.mean_impact,
        ratio = ?report.improvement_ratio,
        "strategy comparison complete"
    );
    print_json(&report)
}

pub fn snapshot(harness: &Harness, recon: bool) -> Result<()> {
    let mut engine = harness.engine(None, None)?;
    let snapshot = engine.step()?;
    if recon {
        print_json(&ReconReport::analyze(&snapshot, engine.session().channels()))?;
    } else {
        print_json(snapshot.as_ref())?;
    }
    engine.finalize()?;
    Ok(())
}

pub fn history(args: HistoryArgs) -> Result<()> {
    let mut results: Vec<AttackResult> = Vec::new();
    let count = replay::<AttackResult, _>(&args.path, |entry| {
        println!(
            "{:>5}  {:<16} {:<18} {:>7.2}  t={:<8.1} {}",
            entry.sequence,
            entry.record.technique,
            entry.record.outcome_label(),
            entry.record.impact_score,
            entry.record.simulation_time.as_secs(),
            entry.record.timestamp.to_rfc3339(),
        );
        results.push(entry.record);
        Ok(())
    })
    .with_context(|| format!("failed to replay {}", args.path.display()))?;
    info!(path = %args.path.display(), records = count, "history replayed");

    if let Some(out) = args.csv {
        let rows = export_csv(&out, results.iter().map(AttackSummaryRow::from))
            .with_context(|| format!("failed to export {}", out.display()))?;
        info!(path = %out.display(), rows, "history exported");
    }
    Ok(())
}
