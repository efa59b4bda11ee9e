//! Bagtoss Back binary entrypoint wiring the capture device, classifier,
//! stats backend and the REST/SSE layers.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bagtoss_back::{
    capture::{CaptureSession, SyntheticCamera},
    config::{self, AppConfig, StorageKind, StorageSettings},
    dao::{
        kv_store::{FileKvStore, KeyValueStore, MemoryKvStore},
        stats::StatsStore,
    },
    inference::{HttpClassifier, ScoreClassifier, ScoreInferenceClient, SimulatedClassifier},
    routes,
    services::announcer::LogAnnouncer,
    state::{Engine, EngineSettings, SharedEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();

    let mut camera = SyntheticCamera::new(
        config.capture.segment_interval(),
        config.capture.segment_size,
    );
    if let Some(failure) = config.capture.simulate_failure {
        warn!(?failure, "capture device configured to fail");
        camera = camera.failing(failure);
    }
    let capture = CaptureSession::new(Arc::new(camera), config.capture.constraints());

    let classifier = build_classifier(&config);
    info!(
        classifier = classifier.name(),
        timeout_ms = config.classifier.timeout_ms,
        max_retries = config.classifier.max_retries,
        "classifier ready"
    );
    let inference = ScoreInferenceClient::new(classifier, config.classifier.policy());

    let backend = build_kv_store(&config.storage).await;
    let stats = StatsStore::load(backend).await;

    let engine = Engine::new(
        capture,
        inference,
        stats,
        Arc::new(LogAnnouncer),
        EngineSettings {
            tie_policy: config.game.tie_policy,
            max_score: config.game.max_score,
            transition_timeout: Some(config.capture.transition_timeout()),
        },
    )
    .await;

    if let Err(err) = engine.acquire().await {
        warn!(error = %err, "camera not available at startup; retry with POST /device/acquire");
    }

    let app = build_router(engine.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config::server_port()));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    engine.shutdown().await;
    Ok(())
}

/// Remote classifier when a URL is configured, random scores otherwise.
fn build_classifier(config: &AppConfig) -> Arc<dyn ScoreClassifier> {
    if let Some(url) = config.classifier.url.as_deref() {
        match HttpClassifier::new(url) {
            Ok(classifier) => return Arc::new(classifier),
            Err(err) => warn!(%url, error = %err, "failed to build HTTP classifier; using simulated scores"),
        }
    }
    Arc::new(SimulatedClassifier::new(config.classifier.simulated_delay()))
}

/// Pick the stats backend, falling back to the JSON file when CouchDB is unreachable.
async fn build_kv_store(settings: &StorageSettings) -> Arc<dyn KeyValueStore> {
    match settings.kind {
        StorageKind::File => Arc::new(FileKvStore::new(settings.path.clone())),
        StorageKind::Memory => Arc::new(MemoryKvStore::new()),
        StorageKind::Couch => {
            #[cfg(feature = "couch-store")]
            {
                use bagtoss_back::dao::kv_store::couchdb::{CouchConfig, CouchKvStore};

                let connected = match CouchConfig::from_env_or(
                    settings.couch_url.as_deref(),
                    settings.couch_database.as_deref(),
                ) {
                    Ok(couch) => {
                        tokio::time::timeout(Duration::from_secs(10), CouchKvStore::connect(couch))
                            .await
                            .map_err(|_| "connection timed out".to_string())
                            .and_then(|result| result.map_err(|err| err.to_string()))
                    }
                    Err(err) => Err(err.to_string()),
                };
                match connected {
                    Ok(store) => return Arc::new(store),
                    Err(err) => warn!(error = %err, "CouchDB unavailable; using the JSON file store"),
                }
            }
            #[cfg(not(feature = "couch-store"))]
            warn!("built without CouchDB support; using the JSON file store");

            Arc::new(FileKvStore::new(settings.path.clone()))
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(engine: SharedEngine) -> Router<()> {
    routes::router(engine)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
