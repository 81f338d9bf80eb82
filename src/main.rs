//! protolensd: the explainable-classification HTTP service.
//!
//! Endpoints:
//!
//! - `POST /upload` — multipart image upload. Runs the pipeline and responds
//!   with predictions plus locators for the original, the rescaled canonical
//!   image, and the k activation renderings (rank-ordered), along with
//!   structured `(session_id, index, url)` artifact references.
//! - `POST /heatmap_picker` — `{ "images": [..] }`, a subset of previously
//!   issued activation locators; persists the selection and returns the
//!   recovered indices.
//! - `GET  /health` — server status.
//!
//! In local export mode the storage root is additionally served under the
//! configured public prefix so the issued locators resolve.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use protolens::config::{ExportConfig, ServiceConfig};
use protolens::error::{PipelineError, ProtoError, SelectError};
use protolens::export::{Exporter, HttpBlobStore};
use protolens::model::fixture::{FixtureGate, FixtureModel};
use protolens::model::{DomainGate, Model, PredictionResult};
use protolens::paths::StoragePaths;
use protolens::pipeline::Pipeline;
use protolens::select::{Reconciler, Selection};
use protolens::session::{RetentionMode, SessionStore};

// ── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "protolensd", version, about = "Explainable prototype-classifier service")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(long)]
    bind: Option<String>,

    /// Listen port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Storage root for session trees (overrides config).
    #[arg(long)]
    storage_root: Option<PathBuf>,
}

// ── Server state ──────────────────────────────────────────────────────────

struct ServerState {
    pipeline: Pipeline,
    store: Arc<SessionStore>,
    exporter: Arc<Exporter>,
    reconciler: Reconciler,
    retention: RetentionMode,
    /// Bounded admission to the shared classifier; backends are not assumed
    /// reentrant.
    inference: Semaphore,
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct UploadResponse {
    predictions: PredictionResult,
    original_img_url: String,
    scaled_img_url: String,
    activation_urls: Vec<String>,
    /// Structured identities so clients need not re-derive them from URL
    /// structure.
    artifacts: Vec<ArtifactRef>,
}

#[derive(Serialize, Clone)]
struct ArtifactRef {
    session_id: String,
    index: usize,
    url: String,
}

#[derive(Deserialize)]
struct PickerRequest {
    images: Vec<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PickerResponse {
    Selected {
        #[serde(rename = "Selected numbers")]
        selected: Vec<usize>,
    },
    Notice {
        message: String,
    },
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    live_sessions: usize,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        live_sessions: state.store.live_sessions(),
    })
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("invalid multipart body: {e}"),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "no image file provided".to_string(),
            )
        })?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("failed to read uploaded file: {e}"),
            )
        })?
        .to_vec();

    let _permit = state
        .inference
        .acquire()
        .await
        .map_err(|_| internal("inference queue closed"))?;

    let worker_state = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || run_upload(&worker_state, &bytes))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "upload worker panicked");
            internal("upload worker failed")
        })?;

    result.map(Json).map_err(error_response)
}

/// Pipeline + export + retention, as one synchronous unit of work on the
/// blocking pool.
fn run_upload(state: &ServerState, bytes: &[u8]) -> Result<UploadResponse, ProtoError> {
    let artifacts = state.pipeline.process(bytes, state.retention)?;
    let session = state.store.paths().session(&artifacts.session_id);

    let original_img_url = state.exporter.resolve(&session, &artifacts.original)?;
    let scaled_img_url = state.exporter.resolve(&session, &artifacts.scaled)?;

    let mut activation_urls = Vec::with_capacity(artifacts.activations.len());
    let mut refs = Vec::with_capacity(artifacts.activations.len());
    for (index, rel) in artifacts.activations.iter().enumerate() {
        let url = state.exporter.resolve(&session, rel)?;
        refs.push(ArtifactRef {
            session_id: artifacts.session_id.clone(),
            index,
            url: url.clone(),
        });
        activation_urls.push(url);
    }

    // Ephemeral sessions are done once every locator is durable.
    if state.retention == RetentionMode::Ephemeral {
        state.store.destroy(&artifacts.session_id)?;
    }

    Ok(UploadResponse {
        predictions: artifacts.predictions,
        original_img_url,
        scaled_img_url,
        activation_urls,
        artifacts: refs,
    })
}

async fn heatmap_picker(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PickerRequest>,
) -> Result<Json<PickerResponse>, (StatusCode, String)> {
    let worker_state = Arc::clone(&state);
    let images = request.images;
    let result = tokio::task::spawn_blocking(move || worker_state.reconciler.select(&images))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "selection worker panicked");
            internal("selection worker failed")
        })?;

    match result {
        Ok(Selection::Empty) => Ok(Json(PickerResponse::Notice {
            message: "No images provided".to_string(),
        })),
        Ok(Selection::Selected { indices }) => Ok(Json(PickerResponse::Selected {
            selected: indices,
        })),
        Err(e) => Err(error_response(ProtoError::Select(e))),
    }
}

/// Map service errors onto HTTP statuses: client-caused failures become
/// 4xx with the diagnostic message; everything else is logged and hidden
/// behind a generic 500.
fn error_response(err: ProtoError) -> (StatusCode, String) {
    match &err {
        ProtoError::Pipeline(PipelineError::ImageNotFound { .. }) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        ProtoError::Pipeline(PipelineError::DomainRejected { .. }) => {
            (StatusCode::FORBIDDEN, err.to_string())
        }
        ProtoError::Select(
            SelectError::MalformedLocator { .. }
            | SelectError::ArtifactNotFound { .. }
            | SelectError::SessionNotFound { .. },
        ) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            tracing::error!(error = %err, "internal failure");
            internal("internal error")
        }
    }
}

fn internal(message: &str) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}

// ── Main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }),
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let storage = StoragePaths::new(&config.storage_root);
    if let Err(e) = storage.ensure_dirs() {
        tracing::error!(error = %e, "failed to create storage root");
        std::process::exit(1);
    }

    let store = Arc::new(SessionStore::new(storage));
    let exporter = Arc::new(match &config.export {
        ExportConfig::Local { public_prefix } => Exporter::local(public_prefix),
        ExportConfig::Remote {
            endpoint,
            public_base,
            access_token,
        } => Exporter::remote(Arc::new(HttpBlobStore::new(
            endpoint,
            public_base,
            access_token.clone(),
        ))),
    });
    let retention = config.retention_or(exporter.default_retention());

    // Classifier backends implement `model::Model` and are wired here; the
    // bundled fixture backend serves local development.
    let model: Arc<dyn Model> = Arc::new(FixtureModel::default());
    let gate: Arc<dyn DomainGate> = Arc::new(FixtureGate {
        min_edge: config.gate_min_edge,
    });

    let pipeline = Pipeline::new(
        Arc::clone(&store),
        model,
        gate,
        config.prototype_count,
    );
    let reconciler = Reconciler::new(Arc::clone(&store));

    let state = Arc::new(ServerState {
        pipeline,
        store,
        exporter,
        reconciler,
        retention,
        inference: Semaphore::new(config.inference_permits),
    });

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/heatmap_picker", post(heatmap_picker));

    // Local export mode serves the storage root itself.
    if let ExportConfig::Local { public_prefix } = &config.export {
        app = app.nest_service(public_prefix.as_str(), ServeDir::new(&config.storage_root));
    }

    let app = app
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.bind, config.port);
    tracing::info!(
        addr = %addr,
        storage = %config.storage_root.display(),
        ?retention,
        "protolensd listening"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
