//! ---
//! gs_section: "05-networking-external-interfaces"
//! gs_subsection: "binary"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Wires configuration, loopback peer, cache, engine and metrics together."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use gridstrike_attack::{AttackEngine, AttackResult};
use gridstrike_campaign::{
    CampaignController, CampaignSummary, CancelToken, DecisionFunction, HeuristicStrategy,
    RandomStrategy,
};
use gridstrike_common::{AppConfig, CampaignConfig};
use gridstrike_federation::{FederationClient, LoopbackBus};
use gridstrike_metrics::{AttackMetrics, CampaignMetrics, FederationMetrics, SharedRegistry};
use gridstrike_monitor::GridStateCache;
use gridstrike_persistence::RecordLogWriter;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    Heuristic,
    Random,
}

impl StrategyKind {
    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::Heuristic => "heuristic",
            StrategyKind::Random => "random",
        }
    }

    pub fn build(self, seed: u64, nominal_voltage: f64) -> Box<dyn DecisionFunction> {
        match self {
            StrategyKind::Heuristic => Box::new(HeuristicStrategy::new(nominal_voltage)),
            StrategyKind::Random => Box::new(RandomStrategy::seeded(seed)),
        }
    }
}

/// Everything needed to stand up independent engines against fresh loopback peers.
#[derive(Debug, Clone)]
pub struct Harness {
    pub config: AppConfig,
    registry: SharedRegistry,
    attack_metrics: AttackMetrics,
    campaign_metrics: CampaignMetrics,
    federation_metrics: FederationMetrics,
}

impl Harness {
    pub fn new(config: AppConfig, registry: SharedRegistry) -> Result<Self> {
        Ok(Self {
            attack_metrics: AttackMetrics::new(registry.clone())?,
            campaign_metrics: CampaignMetrics::new(registry.clone())?,
            federation_metrics: FederationMetrics::new(registry.clone())?,
            registry,
            config,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn campaign_metrics(&self) -> CampaignMetrics {
        self.campaign_metrics.clone()
    }

    pub fn nominal_voltage(&self) -> f64 {
        self.config.threat_model.nominal_voltage
    }

    pub fn campaign_config(&self, duration: Option<f64>) -> CampaignConfig {
        CampaignConfig {
            duration: duration.unwrap_or(self.config.campaign.duration),
            ..self.config.campaign.clone()
        }
    }

    /// Join a new session on its own loopback peer and wrap it in an engine. When
    /// `history_label` is set and history is enabled, results are also appended to a
    /// record log named after the label.
    pub fn engine(&self, seed: Option<u64>, history_label: Option<&str>) -> Result<AttackEngine> {
        let mut loopback = self.config.loopback.clone();
        if let Some(seed) = seed {
            loopback.seed = seed;
        }
        let federation = &self.config.federation;
        let mut session = FederationClient::new(federation, Box::new(LoopbackBus::new(loopback)))
            .with_metrics(self.federation_metrics.clone());
        session
            .join(FederationClient::configured_channels(federation))
            .context("failed to join the federation")?;

        let cache = Arc::new(GridStateCache::new(self.config.monitor.clone()));
        let mut engine = AttackEngine::new(
            session,
            cache,
            self.config.threat_model.clone(),
            self.config.impact.clone(),
        )
        .with_metrics(self.attack_metrics.clone());

        if let (Some(label), true) = (history_label, self.config.history.enabled) {
            let path = self.config.history.directory.join(format!(
                "{label}-{}.jsonl",
                Utc::now().format("%Y%m%dT%H%M%S%.3f")
            ));
            let sink = RecordLogWriter::<AttackResult>::open(&path)
                .with_context(|| format!("failed to open history log {}", path.display()))?;
            info!(path = %path.display(), "recording attack history");
            engine = engine.with_history_sink(Box::new(sink));
        }
        Ok(engine)
    }

    /// One campaign on a private engine, summarised. A federation abort still yields the
    /// summary of the sealed campaign.
    pub fn run_trial(
        &self,
        kind: StrategyKind,
        seed: u64,
        duration: Option<f64>,
        cancel: CancelToken,
    ) -> Result<CampaignSummary> {
        let mut engine = self.engine(Some(seed), None)?;
        let mut controller = CampaignController::new(self.campaign_config(duration))
            .with_cancel_token(cancel)
            .with_metrics(self.campaign_metrics());
        let mut decide = kind.build(seed, self.nominal_voltage());

        let summary = match controller.run(&mut engine, decide.as_mut()) {
            Ok(campaign) => CampaignSummary::from_campaign(&campaign),
            Err(err) => match err.campaign() {
                Some(campaign) => {
                    warn!(strategy = kind.label(), seed, error = %err, "trial aborted");
                    CampaignSummary::from_campaign(campaign)
                }
                None => return Err(err.into()),
            },
        };
        engine.finalize()?;
        Ok(summary)
    }
}
