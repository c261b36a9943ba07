//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Inbound attack service: single attacks, snapshots and background campaigns."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gridstrike_attack::{AttackEngine, AttackError, AttackIntent, AttackResult};
use gridstrike_common::CampaignConfig;
use gridstrike_federation::FederationError;
use gridstrike_metrics::CampaignMetrics;
use gridstrike_monitor::{GridSnapshot, GridStateCache};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::controller::{Campaign, CampaignController, CampaignError, CancelToken};
use crate::decision::DecisionFunction;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a campaign is already running")]
    CampaignInProgress,
    #[error("another request is using the attack engine")]
    EngineBusy,
    #[error(transparent)]
    Attack(#[from] AttackError),
    #[error(transparent)]
    Campaign(#[from] CampaignError),
    #[error(transparent)]
    Federation(#[from] FederationError),
    #[error("campaign thread panicked: {0}")]
    CampaignPanicked(String),
    #[error("failed to spawn campaign thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Entry point used by outer surfaces. One engine, at most one campaign at a time;
/// snapshots are served from the shared cache without touching the engine.
#[derive(Debug)]
pub struct AttackService {
    engine: Arc<Mutex<AttackEngine>>,
    cache: Arc<GridStateCache>,
    campaign: CampaignConfig,
    metrics: Option<CampaignMetrics>,
    running: Arc<AtomicBool>,
}

impl AttackService {
    pub fn new(engine: AttackEngine, campaign: CampaignConfig) -> Self {
        let cache = engine.cache().clone();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            cache,
            campaign,
            metrics: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_metrics(mut self, metrics: CampaignMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one intent outside any campaign. Refused while a campaign holds the engine.
    pub fn execute_single(&self, intent: AttackIntent) -> Result<AttackResult, ServiceError> {
        let mut engine = self.try_engine()?;
        Ok(engine.execute(intent)?)
    }

    fn try_engine(&self) -> Result<MutexGuard<'_, AttackEngine>, ServiceError> {
        let engine = self.engine.try_lock();
        if self.campaign_running() {
            return Err(ServiceError::CampaignInProgress);
        }
        engine.ok_or(ServiceError::EngineBusy)
    }

    pub fn current_snapshot(&self) -> Arc<GridSnapshot> {
        self.cache.snapshot()
    }

    pub fn campaign_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a campaign of `duration` simulation seconds on a background thread.
    pub fn start_campaign(
        &self,
        duration: f64,
        mut decision: Box<dyn DecisionFunction>,
    ) -> Result<CampaignHandle, ServiceError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServiceError::CampaignInProgress);
        }
        let running = RunningGuard(self.running.clone());

        let config = CampaignConfig {
            duration,
            ..self.campaign.clone()
        };
        let mut controller = CampaignController::new(config);
        if let Some(metrics) = &self.metrics {
            controller = controller.with_metrics(metrics.clone());
        }
        let cancel = controller.cancel_token();
        let engine = self.engine.clone();

        info!(duration, strategy = decision.name(), "launching background campaign");
        let thread = thread::Builder::new()
            .name("gridstrike-campaign".into())
            .spawn(move || {
                let _running = running;
                let mut engine = engine.lock();
                controller.run(&mut engine, decision.as_mut())
            })?;
        Ok(CampaignHandle { cancel, thread })
    }

    /// Reconnect after a campaign closed the session.
    pub fn rejoin(&self) -> Result<Uuid, ServiceError> {
        let mut engine = self.try_engine()?;
        Ok(engine.rejoin()?)
    }

    /// Copy of every result produced so far, across single attacks and campaigns.
    pub fn history(&self) -> Vec<AttackResult> {
        self.engine.lock().history().to_vec()
    }

    pub fn finalize(&self) -> Result<(), ServiceError> {
        Ok(self.engine.lock().finalize()?)
    }
}

/// Clears the in-progress flag when the campaign thread exits, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owner's view of a background campaign.
#[derive(Debug)]
pub struct CampaignHandle {
    cancel: CancelToken,
    thread: JoinHandle<Result<Campaign, CampaignError>>,
}

impl CampaignHandle {
    /// Ask the campaign to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the campaign to seal.
    pub fn join(self) -> Result<Campaign, ServiceError> {
        match self.thread.join() {
            Ok(outcome) => Ok(outcome?),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|text| (*text).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                warn!(%message, "campaign thread panicked");
                Err(ServiceError::CampaignPanicked(message))
            }
        }
    }
}
