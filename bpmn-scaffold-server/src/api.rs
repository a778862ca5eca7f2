//! HTTP facade over the generation pipeline.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use bpmn_scaffold_core::manifest::{Drift, Manifest};
use bpmn_scaffold_core::{
    DeployOutcome, GenerationReport, Pipeline, ProcessMetadata, Resource, ScaffoldError,
};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub resources_dir: PathBuf,
}

// ── Request / response types ──

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub resource_name: String,
    #[serde(default)]
    pub form_resources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrudRequest {
    pub process_name: String,
    pub resource_name: String,
    pub version: i32,
    pub process_definition_key: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub processes: Vec<ProcessMetadata>,
}

#[derive(Debug, Serialize)]
pub struct DriftResponse {
    pub clean: bool,
    pub drift: Vec<Drift>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    completed: Vec<String>,
}

// ── Errors ──

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Scaffold(ScaffoldError),
}

impl From<ScaffoldError> for ApiError {
    fn from(e: ScaffoldError) -> Self {
        ApiError::Scaffold(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scaffold(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            ApiError::Scaffold(e) => match e.root_cause() {
                ScaffoldError::Deployment(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::BadRequest(message) => ErrorBody {
                error: message,
                completed: Vec::new(),
            },
            ApiError::Scaffold(e) => {
                let completed = match &e {
                    ScaffoldError::Aborted { completed, .. } => completed.clone(),
                    _ => Vec::new(),
                };
                ErrorBody {
                    error: e.to_string(),
                    completed,
                }
            }
        };

        if status.is_server_error() {
            error!(status = %status, error = %body.error, "Request failed");
        } else {
            warn!(status = %status, error = %body.error, "Request rejected");
        }
        (status, Json(body)).into_response()
    }
}

// ── Router ──

pub fn create_router(state: AppState) -> Router {
    let camunda = Router::new()
        .route("/deploy", post(deploy))
        .route("/deploy-crud", post(deploy_crud))
        .route("/crud", post(crud))
        .route("/manifest", get(manifest))
        .route("/manifest/drift", get(drift));

    let v1 = Router::new()
        .route("/health", get(health_check))
        .nest("/camunda", camunda);

    Router::new()
        .nest("/v1", v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

// ── Handlers ──

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /v1/camunda/deploy
async fn deploy(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let (resource, forms) = load_resources(&state, &req)?;
    let processes = state.pipeline.deploy(&resource, &forms).await?;
    Ok(Json(DeployResponse { processes }))
}

/// POST /v1/camunda/deploy-crud
async fn deploy_crud(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeployOutcome>, ApiError> {
    let (resource, forms) = load_resources(&state, &req)?;
    let outcome = state.pipeline.deploy_and_generate(resource, forms).await?;
    info!(
        resource = %req.resource_name,
        entities = outcome.report.entities.len(),
        "Deployed and generated"
    );
    Ok(Json(outcome))
}

/// POST /v1/camunda/crud
async fn crud(
    State(state): State<AppState>,
    Json(req): Json<CrudRequest>,
) -> Result<Json<GenerationReport>, ApiError> {
    if req.process_name.trim().is_empty() {
        return Err(ApiError::BadRequest("process_name must not be empty".to_string()));
    }
    let metadata = ProcessMetadata {
        bpmn_process_id: req.process_name,
        version: req.version,
        process_definition_key: req.process_definition_key,
        resource_name: req.resource_name,
    };
    let report = state.pipeline.generate_process(metadata).await?;
    Ok(Json(report))
}

/// GET /v1/camunda/manifest
async fn manifest(State(state): State<AppState>) -> Result<Json<Manifest>, ApiError> {
    Ok(Json(state.pipeline.manifest().await?))
}

/// GET /v1/camunda/manifest/drift
async fn drift(State(state): State<AppState>) -> Result<Json<DriftResponse>, ApiError> {
    let drift = state.pipeline.verify().await?;
    Ok(Json(DriftResponse {
        clean: drift.is_empty(),
        drift,
    }))
}

/// Read the model and its forms from the resources directory. A name that
/// does not resolve to a file is the caller's mistake.
fn load_resources(state: &AppState, req: &DeployRequest) -> Result<(Resource, Vec<Resource>), ApiError> {
    let load = |name: &str| {
        Resource::from_dir(&state.resources_dir, name).map_err(|e| match e {
            ScaffoldError::FileIo { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ApiError::BadRequest(format!("resource '{}' not found", name))
            }
            other => ApiError::Scaffold(other),
        })
    };

    let resource = load(&req.resource_name)?;
    let forms = req
        .form_resources
        .iter()
        .map(|name| load(name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((resource, forms))
}
