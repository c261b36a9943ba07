//! ---
//! gs_section: "03-persistence-logging"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Metrics collection and export utilities."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Per-attack counters and impact distribution recorded by the attack engine.
#[derive(Clone, Debug)]
pub struct AttackMetrics {
    registry: SharedRegistry,
    attacks_total: IntCounterVec,
    impact_score: Histogram,
}

impl AttackMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let attacks_total = IntCounterVec::new(
            Opts::new(
                "gridstrike_attacks_total",
                "Attack executions by technique and outcome",
            ),
            &["technique", "outcome"],
        )?;
        registry.register(Box::new(attacks_total.clone()))?;

        let buckets = prometheus::linear_buckets(0.0, 10.0, 11)
            .context("failed to construct impact histogram buckets")?;
        let impact_score = Histogram::with_opts(
            HistogramOpts::new(
                "gridstrike_impact_score",
                "Impact score of successful attacks",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(impact_score.clone()))?;

        Ok(Self {
            registry,
            attacks_total,
            impact_score,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_attack(&self, technique: &str, outcome: &str) {
        self.attacks_total
            .with_label_values(&[technique, outcome])
            .inc();
    }

    pub fn observe_impact(&self, score: f64) {
        self.impact_score.observe(score);
    }
}

/// Campaign-level counters recorded by the campaign controller.
#[derive(Clone, Debug)]
pub struct CampaignMetrics {
    registry: SharedRegistry,
    campaigns_total: IntCounterVec,
    attacks_per_campaign: Histogram,
}

impl CampaignMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let campaigns_total = IntCounterVec::new(
            Opts::new(
                "gridstrike_campaigns_total",
                "Sealed campaigns by termination reason",
            ),
            &["termination"],
        )?;
        registry.register(Box::new(campaigns_total.clone()))?;

        let buckets = prometheus::exponential_buckets(1.0, 2.0, 10)
            .context("failed to construct campaign histogram buckets")?;
        let attacks_per_campaign = Histogram::with_opts(
            HistogramOpts::new(
                "gridstrike_campaign_attacks",
                "Number of attack results recorded per sealed campaign",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(attacks_per_campaign.clone()))?;

        Ok(Self {
            registry,
            campaigns_total,
            attacks_per_campaign,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_sealed(&self, termination: &str, attacks: usize) {
        self.campaigns_total.with_label_values(&[termination]).inc();
        self.attacks_per_campaign.observe(attacks as f64);
    }
}

/// Time-synchronisation counters recorded by the federation client.
#[derive(Clone, Debug)]
pub struct FederationMetrics {
    registry: SharedRegistry,
    advances_total: IntCounter,
    timeouts_total: IntCounter,
    granted_time: Gauge,
}

impl FederationMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let advances_total = IntCounter::with_opts(Opts::new(
            "gridstrike_federation_advances_total",
            "Granted time advances",
        ))?;
        registry.register(Box::new(advances_total.clone()))?;

        let timeouts_total = IntCounter::with_opts(Opts::new(
            "gridstrike_federation_timeouts_total",
            "Time requests that were not granted within the wait budget",
        ))?;
        registry.register(Box::new(timeouts_total.clone()))?;

        let granted_time = Gauge::with_opts(Opts::new(
            "gridstrike_federation_granted_time_seconds",
            "Most recently granted simulation time",
        ))?;
        registry.register(Box::new(granted_time.clone()))?;

        Ok(Self {
            registry,
            advances_total,
            timeouts_total,
            granted_time,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_grant(&self, granted: f64) {
        self.advances_total.inc();
        self.granted_time.set(granted);
    }

    pub fn record_timeout(&self) {
        self.timeouts_total.inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_value(registry: &Registry, name: &str) -> Option<f64> {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .and_then(|family| {
                family.get_metric().first().map(|metric| {
                    if metric.has_counter() {
                        metric.get_counter().get_value()
                    } else if metric.has_gauge() {
                        metric.get_gauge().get_value()
                    } else {
                        metric.get_histogram().get_sample_count() as f64
                    }
                })
            })
    }

    #[test]
    fn attack_metrics_count_by_outcome() {
        let registry = new_registry();
        let metrics = AttackMetrics::new(registry.clone()).unwrap();
        metrics.record_attack("inject_load", "success");
        metrics.record_attack("inject_load", "success");
        metrics.observe_impact(42.0);
        assert_eq!(
            sample_value(&registry, "gridstrike_attacks_total"),
            Some(2.0)
        );
        assert_eq!(sample_value(&registry, "gridstrike_impact_score"), Some(1.0));
    }

    #[test]
    fn federation_metrics_track_latest_grant() {
        let registry = new_registry();
        let metrics = FederationMetrics::new(registry.clone()).unwrap();
        metrics.record_grant(3.0);
        metrics.record_grant(4.0);
        metrics.record_timeout();
        assert_eq!(
            sample_value(&registry, "gridstrike_federation_granted_time_seconds"),
            Some(4.0)
        );
        assert_eq!(
            sample_value(&registry, "gridstrike_federation_advances_total"),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn scrape_is_served_as_prometheus_text() {
        let registry = new_registry();
        let metrics = AttackMetrics::new(registry.clone()).unwrap();
        metrics.record_attack("spoof_data", "rejected");

        let response = metrics_handler(registry).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static(prometheus::TEXT_FORMAT))
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gridstrike_attacks_total"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        CampaignMetrics::new(registry.clone()).unwrap();
        assert!(CampaignMetrics::new(registry).is_err());
    }
}
