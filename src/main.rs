use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use policygate::api::{create_router, AppState};
use policygate::audit::AuditChain;
use policygate::config::{Cli, Settings};
use policygate::engine::DecisionEngine;
use policygate::gateway::{spawn_reload_auditor, Gateway, GatewayLimits};
use policygate::observability::{init_tracing, MetricsRegistry};
use policygate::policy::{PolicyLoader, PolicyWatcher};
use policygate::resilience::{
    CircuitBreakerManager, DeadLetterStore, FileDeadLetterStore, MemoryDeadLetterStore,
    ResilientSink, RetryPolicy,
};
use policygate::rules::Redactor;
use policygate::sinks::{EventSink, FileSink, HttpCollectorSink, SearchIndexSink, WebhookSink};
use policygate::telemetry::{AlertDispatcher, TelemetryAggregator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting policygate"
    );

    // Missing sink credentials fail here, before anything is opened
    let settings = Settings::load(cli.config.as_deref())?;
    let metrics = Arc::new(MetricsRegistry::new());

    let loader = PolicyLoader::new(settings.policy.path.to_string_lossy());
    let watcher = PolicyWatcher::new(loader, Duration::from_secs(settings.policy.reload_secs))
        .with_metrics(metrics.clone());
    let (ruleset_rx, policy_handle) = watcher.start()?;

    let audit = Arc::new(AuditChain::open(&settings.audit.path)?);
    let report = audit.verify()?;
    if report.valid {
        info!(path = %audit.path().display(), records = report.total, "Audit chain verified");
    } else {
        // Never repaired automatically; the operator decides
        warn!(
            path = %audit.path().display(),
            break_point = ?report.break_point,
            error = ?report.error,
            "Audit chain failed verification"
        );
    }
    let reload_auditor = spawn_reload_auditor(ruleset_rx.clone(), audit.clone());

    let redactor = Arc::new(Redactor::new(&settings.redaction)?);

    let breakers = Arc::new(CircuitBreakerManager::new(settings.breaker.to_config()));
    let dead_letters: Arc<dyn DeadLetterStore> = match &settings.dead_letter.dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Dead-letter store enabled");
            Arc::new(FileDeadLetterStore::open(dir)?)
        }
        None => {
            warn!("No dead-letter directory configured, undeliverable batches are kept in memory");
            Arc::new(MemoryDeadLetterStore::new())
        }
    };
    let retry = settings.retry.to_policy();

    let sinks = build_sinks(&settings)?
        .into_iter()
        .map(|sink| resilient(sink, &breakers, &retry, &dead_letters, &metrics))
        .collect::<Vec<_>>();
    info!(sinks = sinks.len(), "Telemetry sinks configured");

    let alerts = match settings.alerts.webhook_url.as_deref() {
        Some(url) if settings.alerts.enabled => {
            let webhook = WebhookSink::new(
                "alert-webhook",
                url,
                Duration::from_millis(settings.breaker.call_timeout_ms),
            )?;
            let sink = resilient(Arc::new(webhook), &breakers, &retry, &dead_letters, &metrics);
            AlertDispatcher::spawn(&settings.alerts, sink)
        }
        _ => AlertDispatcher::disabled(),
    };

    let telemetry = Arc::new(TelemetryAggregator::new(sinks, alerts));
    let telemetry_handle = telemetry.clone().start(settings.telemetry.flush_interval());

    let gateway = Gateway::new(
        DecisionEngine::new(ruleset_rx, settings.shadow.to_policy()),
        audit,
        telemetry,
        redactor,
        settings.api.api_key.clone(),
        GatewayLimits {
            max_text_bytes: settings.api.max_text_bytes,
            excerpt_chars: settings.audit.excerpt_chars,
        },
        metrics,
    );

    let state = Arc::new(AppState {
        gateway: Arc::new(gateway),
        breakers,
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let app = create_router(state);

    let addr: SocketAddr = cli.listen_addr.parse()?;
    info!(addr = %addr, shadow_mode = settings.shadow.enabled, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    policy_handle.abort();
    reload_auditor.abort();

    // Remaining events are flushed before exit
    if tokio::time::timeout(cli.shutdown_timeout(), telemetry_handle.shutdown())
        .await
        .is_err()
    {
        error!(
            timeout_secs = cli.shutdown_timeout_secs,
            "Telemetry drain timed out, pending events may be lost"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

fn build_sinks(settings: &Settings) -> anyhow::Result<Vec<Arc<dyn EventSink>>> {
    let telemetry = &settings.telemetry;
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();

    if telemetry.file.enabled {
        if let Some(path) = &telemetry.file.path {
            sinks.push(Arc::new(FileSink::new("file", path)?));
        }
    }
    if telemetry.collector.enabled {
        sinks.push(Arc::new(HttpCollectorSink::new("collector", &telemetry.collector)?));
    }
    if telemetry.search.enabled {
        sinks.push(Arc::new(SearchIndexSink::new("search", &telemetry.search)?));
    }

    Ok(sinks)
}

fn resilient(
    sink: Arc<dyn EventSink>,
    breakers: &CircuitBreakerManager,
    retry: &RetryPolicy,
    dead_letters: &Arc<dyn DeadLetterStore>,
    metrics: &Arc<MetricsRegistry>,
) -> Arc<ResilientSink> {
    let breaker = breakers.get_or_create(sink.name());
    Arc::new(
        ResilientSink::new(sink, breaker, *retry, dead_letters.clone())
            .with_metrics(metrics.clone()),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
