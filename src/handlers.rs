use crate::aggregation::{
    active_filter_count, chart_buckets, compute_stats, filter_facets, filter_leads, top_n,
    DEFAULT_TOP_N,
};
use crate::ai_bridge::{LocalScorer, ModelScorer, Scorer, TextModel};
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::gemini_client::GeminiClient;
use crate::models::*;
use crate::outreach::OutreachService;
use crate::pipeline::{Pipeline, UploadedFile};
use crate::scoring::{ScoringConfig, ScoringEngine};
use crate::store::{BlobKey, HandoffStore};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Upload staging, scoring cycle and handoff store.
    pub pipeline: Pipeline,
    /// Email generation, disabled when no model is configured.
    pub outreach: OutreachService,
}

impl AppState {
    /// Wires the state around an explicit scorer and optional text model.
    pub fn new(config: Config, scorer: Arc<dyn Scorer>, model: Option<Arc<dyn TextModel>>) -> Self {
        let store = HandoffStore::new(config.store_capacity);
        Self {
            pipeline: Pipeline::new(scorer, store.clone()),
            outreach: OutreachService::new(model, store),
            config,
        }
    }

    /// Builds the production state: Gemini when an API key is configured,
    /// the local scoring engine otherwise.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        match GeminiClient::from_config(&config)? {
            Some(client) => {
                let model: Arc<dyn TextModel> = Arc::new(client);
                let scorer = Arc::new(ModelScorer::new(model.clone()));
                tracing::info!("✓ Scoring with Gemini model {}", config.gemini_model);
                Ok(Self::new(config, scorer, Some(model)))
            }
            None => {
                let scoring_config = config
                    .scoring_config_path
                    .as_deref()
                    .map(ScoringConfig::load)
                    .transpose()
                    .context("Loading scoring config")?
                    .unwrap_or_default();
                let scorer = Arc::new(LocalScorer::new(ScoringEngine::new(scoring_config)));
                tracing::info!("✓ Scoring with the local engine");
                Ok(Self::new(config, scorer, None))
            }
        }
    }
}

/// API routes with the upload size limit applied.
pub fn api_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/uploads", post(upload_files))
        .route("/api/v1/uploads/status", get(upload_status))
        .route("/api/v1/session", delete(reset_session))
        .route("/api/v1/leads", get(list_leads))
        .route("/api/v1/leads/stats", get(lead_stats))
        .route("/api/v1/leads/top", get(top_leads))
        .route("/api/v1/leads/chart", get(chart_data))
        .route("/api/v1/leads/facets", get(lead_facets))
        .route("/api/v1/ai/raw", get(ai_output))
        .route(
            "/api/v1/leads/:lead_id/email",
            post(generate_email).get(last_email),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}

/// Complete application without rate limiting.
pub fn router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .merge(api_routes(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-score-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/uploads
///
/// Accepts role files as multipart parts. Files are staged until leads,
/// services, pre-accounts and running accounts are all present; the request
/// that completes the set runs the scoring cycle.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `multipart` - Multipart body; every part with a filename is a file.
///
/// # Returns
///
/// * `Result<Json<UploadResponse>, AppError>` - Per-file outcome and, when
///   scoring ran, its summary.
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Unable to read {}: {}", file_name, e)))?;
        files.push(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(AppError::BadRequest(
            "No files in upload request".to_string(),
        ));
    }

    tracing::info!("POST /uploads - {} file(s)", files.len());
    let response = state.pipeline.accept_upload(files).await?;
    Ok(Json(response))
}

/// GET /api/v1/uploads/status
pub async fn upload_status(State(state): State<Arc<AppState>>) -> Json<UploadStatus> {
    Json(state.pipeline.status().await)
}

/// DELETE /api/v1/session
///
/// Drops staged files, merged leads, AI output and remembered emails.
pub async fn reset_session(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.reset().await;
    StatusCode::NO_CONTENT
}

/// GET /api/v1/leads
///
/// # Arguments
///
/// * `state` - The application state.
/// * `filter` - Search text, comma separated facet values, score and date range.
///
/// # Returns
///
/// * `Json<LeadListResponse>` - Matching leads in dataset order.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<LeadListResponse>, AppError> {
    if let (Some(min), Some(max)) = (filter.min_score, filter.max_score) {
        if min > max {
            return Err(AppError::BadRequest(
                "min_score cannot exceed max_score".to_string(),
            ));
        }
    }

    let leads = state.pipeline.merged_leads().await;
    let matching = filter_leads(&leads, &filter);
    tracing::debug!("GET /leads - {}/{} match", matching.len(), leads.len());

    Ok(Json(LeadListResponse {
        showing: matching.len(),
        total: leads.len(),
        active_filters: active_filter_count(&filter),
        leads: matching,
    }))
}

/// GET /api/v1/leads/stats
pub async fn lead_stats(State(state): State<Arc<AppState>>) -> Json<AggregateStats> {
    let leads = state.pipeline.merged_leads().await;
    Json(compute_stats(&leads))
}

/// GET /api/v1/leads/top?limit=N
pub async fn top_leads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopLeadsQuery>,
) -> Json<Vec<EnrichedLead>> {
    let leads = state.pipeline.merged_leads().await;
    Json(top_n(&leads, query.limit.unwrap_or(DEFAULT_TOP_N)))
}

/// GET /api/v1/leads/chart
pub async fn chart_data(State(state): State<Arc<AppState>>) -> Json<Vec<ChartBucket>> {
    let leads = state.pipeline.merged_leads().await;
    Json(chart_buckets(&compute_stats(&leads)))
}

/// GET /api/v1/leads/facets
pub async fn lead_facets(State(state): State<Arc<AppState>>) -> Json<FilterFacets> {
    let leads = state.pipeline.merged_leads().await;
    Json(filter_facets(&leads))
}

/// GET /api/v1/ai/raw
///
/// Raw scorer reply and its cleaned form from the last cycle, for debugging.
pub async fn ai_output(State(state): State<Arc<AppState>>) -> Json<AiOutputResponse> {
    let store = state.pipeline.store();
    Json(AiOutputResponse {
        raw: store.read(&BlobKey::RawAiOutput).await,
        cleaned: store.read_json(&BlobKey::CleanedAiOutput).await,
    })
}

/// POST /api/v1/leads/:lead_id/email
///
/// Generates an engagement email for one lead of the current dataset.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `lead_id` - `Lead_ID` of the lead.
///
/// # Returns
///
/// * `Result<Json<EmailResponse>, AppError>` - The rendered email.
pub async fn generate_email(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
) -> Result<Json<EmailResponse>, AppError> {
    let leads = state.pipeline.merged_leads().await;
    let lead = leads
        .iter()
        .find(|lead| lead.lead_id() == lead_id)
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

    let content = state
        .outreach
        .generate_email(lead)
        .await
        .with_context(|| format!("Generating email for lead {}", lead_id))?;

    Ok(Json(EmailResponse {
        lead_id,
        content,
        cached: false,
    }))
}

/// GET /api/v1/leads/:lead_id/email
///
/// Last email generated for the lead, if any.
pub async fn last_email(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
) -> Result<Json<EmailResponse>, AppError> {
    let content = state
        .outreach
        .last_email(&lead_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No email generated for lead {}", lead_id)))?;

    Ok(Json(EmailResponse {
        lead_id,
        content,
        cached: true,
    }))
}
