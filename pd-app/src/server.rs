//! Pindrop server. Wires the stores, decision engine, activity monitor,
//! and learner together and mounts the HTTP surface on top.

use crate::config::PindropConfig;
use crate::context::{ContextAssembler, ContextConfig};
use crate::engine::{DecisionEngine, EngineConfig};
use crate::feedback::FeedbackService;
use crate::learner::ProfileLearner;
use crate::model::DecisionModel;
use crate::monitor::{ActivityMonitor, Delivery, MonitorConfig};
use crate::routes;
use crate::store::SqliteStore;
use anyhow::Result;
use axum::Extension;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use pd_core::{DecisionLog, MemoryStore, PreferencesStore};
use pd_llm::LlmClient;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const DELIVERY_BUFFER: usize = 256;

pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub preferences: Arc<dyn PreferencesStore>,
    pub decisions: Arc<dyn DecisionLog>,
    pub engine: Arc<DecisionEngine>,
    pub monitor: ActivityMonitor,
    pub feedback: Arc<FeedbackService>,
    pub deliveries: Mutex<VecDeque<Delivery>>,
}

impl AppState {
    pub fn push_delivery(&self, delivery: Delivery) {
        if let Ok(mut buffer) = self.deliveries.lock() {
            if buffer.len() == DELIVERY_BUFFER {
                buffer.pop_front();
            }
            buffer.push_back(delivery);
        }
    }
}

/// Config sanity check without starting the server.
pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PindropConfig::load(config_path).await?;
    tracing::info!(
        model = %cfg.general.model,
        has_api_key = cfg.api_key_for_model().is_some(),
        db_path = %cfg.db_path().display(),
        port = cfg.server.port,
        learner_enabled = cfg.learner.enabled,
        "config ok"
    );
    Ok(())
}

/// One synchronous learner pass, then exit.
pub async fn learn_once(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PindropConfig::load(config_path).await?;
    let sqlite = open_store(&cfg)?;
    let store = Arc::new(MemoryStore::new());
    let learner = ProfileLearner::new(store, sqlite.clone(), sqlite);
    let written = learner.run_once().await?;
    tracing::info!(profiles = written, "learner pass finished");
    Ok(())
}

fn open_store(cfg: &PindropConfig) -> Result<Arc<SqliteStore>> {
    let path = cfg.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("create data dir {}: {e}", parent.display()))?;
    }
    Ok(Arc::new(SqliteStore::open(&path)?))
}

fn build_model(cfg: &PindropConfig) -> Option<Arc<dyn DecisionModel>> {
    match cfg.api_key_for_model() {
        Some(key) => Some(Arc::new(LlmClient::new(&key, &cfg.general.model))),
        None => {
            tracing::warn!(
                model = %cfg.general.model,
                "no API key for configured model; decisions fall back to heuristics"
            );
            None
        }
    }
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PindropConfig::load(config_path).await?;
    let shutdown = CancellationToken::new();

    let store = Arc::new(MemoryStore::new());
    let sqlite = open_store(&cfg)?;
    let model = build_model(&cfg);

    let assembler = Arc::new(ContextAssembler::new(
        store.clone(),
        store.clone(),
        sqlite.clone(),
        sqlite.clone(),
        store.clone(),
        model.clone(),
        ContextConfig {
            window_days: cfg.context.window_days,
            max_messages: cfg.context.max_messages,
            semantic_top_k: cfg.context.semantic_top_k,
            context_ttl: Duration::from_secs(cfg.context.context_ttl_seconds),
            embedding_max_age_days: cfg.context.embedding_max_age_days,
        },
    ));

    let engine = Arc::new(DecisionEngine::new(
        model,
        store.clone(),
        store.clone(),
        sqlite.clone(),
        sqlite.clone(),
        assembler,
        Arc::new(DashMap::new()),
        EngineConfig {
            cache_ttl: Duration::from_secs(cfg.engine.cache_ttl_seconds),
            model_timeout: Duration::from_secs(cfg.engine.model_timeout_seconds),
        },
    ));

    let (delivery_tx, mut delivery_rx) = mpsc::channel::<Delivery>(DELIVERY_BUFFER);
    let monitor = ActivityMonitor::new(
        engine.clone(),
        sqlite.clone(),
        delivery_tx,
        MonitorConfig {
            window_seconds: cfg.monitor.window_seconds,
            message_threshold_count: cfg.monitor.message_threshold_count,
            debounce_window_seconds: cfg.monitor.debounce_window_seconds,
        },
    );

    let feedback = Arc::new(FeedbackService::new(
        store.clone(),
        sqlite.clone(),
        sqlite.clone(),
    ));

    let state = Arc::new(AppState {
        store: store.clone(),
        preferences: sqlite.clone(),
        decisions: sqlite.clone(),
        engine,
        monitor: monitor.clone(),
        feedback,
        deliveries: Mutex::new(VecDeque::new()),
    });

    let drain_state = state.clone();
    let drain_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = drain_shutdown.cancelled() => return,
                delivery = delivery_rx.recv() => {
                    let Some(delivery) = delivery else { return };
                    tracing::info!(
                        user_id = %delivery.user_id,
                        should_notify = delivery.outcome.decision.should_notify,
                        priority = delivery.outcome.decision.priority.as_str(),
                        "notification decision delivered"
                    );
                    drain_state.push_delivery(delivery);
                }
            }
        }
    });

    if cfg.learner.enabled {
        let learner = Arc::new(ProfileLearner::new(
            store.clone(),
            sqlite.clone(),
            sqlite.clone(),
        ));
        let schedule = cfg.learner.schedule.clone();
        let learner_shutdown = shutdown.clone();
        tokio::spawn(async move {
            learner.run_scheduled(&schedule, learner_shutdown).await;
        });
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.max_concurrency))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.request_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;

    tracing::info!(%addr, "pindrop serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    monitor.shutdown();
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
