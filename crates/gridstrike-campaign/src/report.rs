//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Campaign summaries and strategy comparison reports."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use uuid::Uuid;

use crate::controller::Campaign;

/// Mean impact above which a campaign counts as effective.
pub const EFFECTIVE_IMPACT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: Uuid,
    pub strategy: String,
    pub attacks: usize,
    pub successes: usize,
    pub rejected: usize,
    pub total_impact: f64,
    pub mean_impact: f64,
    pub max_impact: f64,
    /// Successful attempts over all attempts, in `[0, 1]`.
    pub success_rate: f64,
    /// Percentage of attempts that landed.
    pub strategic_coherence: f64,
    pub termination: Option<String>,
    pub sim_elapsed: f64,
}

impl CampaignSummary {
    pub fn from_campaign(campaign: &Campaign) -> Self {
        let attacks = campaign.results.len();
        let successes = campaign.results.iter().filter(|r| r.success).count();
        let rejected = campaign.results.iter().filter(|r| r.is_rejected()).count();
        let impacts: Vec<f64> = campaign.results.iter().map(|r| r.impact_score).collect();
        let total_impact = impacts.iter().sum();
        let (mean_impact, max_impact) = if impacts.is_empty() {
            (0.0, 0.0)
        } else {
            (impacts.iter().mean(), Statistics::max(impacts.iter()))
        };
        let success_rate = if attacks == 0 {
            0.0
        } else {
            successes as f64 / attacks as f64
        };

        Self {
            campaign_id: campaign.id,
            strategy: campaign.strategy.clone(),
            attacks,
            successes,
            rejected,
            total_impact,
            mean_impact,
            max_impact,
            success_rate,
            strategic_coherence: success_rate * 100.0,
            termination: campaign.termination.as_ref().map(ToString::to_string),
            sim_elapsed: campaign.sim_elapsed(),
        }
    }

    pub fn is_effective(&self) -> bool {
        self.mean_impact > EFFECTIVE_IMPACT
    }
}

/// Aggregate over several campaigns of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: String,
    pub campaigns: usize,
    /// Mean over campaigns of the per-campaign mean impact.
    pub mean_impact: f64,
    pub max_impact: f64,
    /// Share of campaigns whose mean impact exceeds [`EFFECTIVE_IMPACT`].
    pub effective_share: f64,
}

impl StrategyStats {
    pub fn over(strategy: &str, summaries: &[CampaignSummary]) -> Self {
        if summaries.is_empty() {
            return Self {
                strategy: strategy.to_owned(),
                campaigns: 0,
                mean_impact: 0.0,
                max_impact: 0.0,
                effective_share: 0.0,
            };
        }
        let effective = summaries.iter().filter(|s| s.is_effective()).count();
        Self {
            strategy: strategy.to_owned(),
            campaigns: summaries.len(),
            mean_impact: summaries.iter().map(|s| s.mean_impact).mean(),
            max_impact: Statistics::max(summaries.iter().map(|s| s.max_impact)),
            effective_share: effective as f64 / summaries.len() as f64,
        }
    }
}

/// Side-by-side comparison of a candidate strategy against a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub candidate: StrategyStats,
    pub baseline: StrategyStats,
    /// Candidate mean impact over baseline mean impact; absent when the baseline mean is
    /// zero.
    pub improvement_ratio: Option<f64>,
}

impl ComparisonReport {
    pub fn compare(
        candidate: (&str, &[CampaignSummary]),
        baseline: (&str, &[CampaignSummary]),
    ) -> Self {
        let candidate = StrategyStats::over(candidate.0, candidate.1);
        let baseline = StrategyStats::over(baseline.0, baseline.1);
        let improvement_ratio =
            (baseline.mean_impact > 0.0).then(|| candidate.mean_impact / baseline.mean_impact);
        Self {
            candidate,
            baseline,
            improvement_ratio,
        }
    }
}
