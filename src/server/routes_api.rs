//! Metadata API routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shiori_common::{
    MediaServerLibraryId, MediaServerSeriesId, MetadataJobId, ProviderSeriesId,
    SeriesSearchResult,
};

use crate::jobs::JobStatus;
use crate::metadata::service::MetadataService;
use crate::providers::CoreProvider;
use crate::server::AppContext;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/search", get(search_series))
        .route("/identify", post(identify_series))
        .route("/match/library/:library_id/series/:series_id", post(match_series))
        .route("/match/library/:library_id", post(match_library))
        .route("/reset/library/:library_id/series/:series_id", post(reset_series))
        .route("/reset/library/:library_id", post(reset_library))
        .route("/jobs/:job_id", get(job_status))
}

// ---------------------------------------------------------------------------
// Error translation
// ---------------------------------------------------------------------------

/// Wrapper translating internal errors into JSON error responses.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<shiori_common::Error>() {
            Some(shiori_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(shiori_common::Error::InvalidConfiguration(_)) => StatusCode::BAD_REQUEST,
            Some(shiori_common::Error::WriteConflict(_)) => StatusCode::CONFLICT,
            Some(shiori_common::Error::UpstreamUnavailable(_)) => StatusCode::BAD_GATEWAY,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": format!("{:#}", self.0) }));
        (status, body).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersParams {
    #[serde(default)]
    pub library_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub name: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub library_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub library_id: Option<String>,
    pub series_id: String,
    pub provider: String,
    pub provider_series_id: String,
    #[serde(default)]
    pub edition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetParams {
    #[serde(default)]
    pub remove_cover: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: MetadataJobId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: MetadataJobId,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn service_for(ctx: &AppContext, library_id: Option<&str>) -> Arc<MetadataService> {
    match library_id {
        Some(id) => ctx
            .registry
            .for_library(&MediaServerLibraryId::new(id))
            .clone(),
        None => ctx.registry.default_service().clone(),
    }
}

async fn list_providers(
    State(ctx): State<AppContext>,
    Query(params): Query<ProvidersParams>,
) -> Json<Vec<String>> {
    let service = service_for(&ctx, params.library_id.as_deref());
    Json(service.provider_names())
}

const DEFAULT_SEARCH_LIMIT: usize = 20;

async fn search_series(
    State(ctx): State<AppContext>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<SeriesSearchResult>> {
    let service = service_for(&ctx, params.library_id.as_deref());
    let results = service
        .search_series_metadata(&params.name, params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await;
    Json(results)
}

async fn identify_series(
    State(ctx): State<AppContext>,
    Json(request): Json<IdentifyRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let provider = CoreProvider::parse(&request.provider)?;
    let service = service_for(&ctx, request.library_id.as_deref());

    let series_id = MediaServerSeriesId::new(request.series_id.clone());
    let provider_series_id = ProviderSeriesId::new(request.provider_series_id);
    let edition = request.edition;
    let job_id = ctx.jobs.submit(
        format!("identify series {}", request.series_id),
        move |events| async move {
            service
                .set_series_metadata(
                    &series_id,
                    provider,
                    &provider_series_id,
                    edition.as_deref(),
                    &events,
                )
                .await
        },
    );
    Ok(Json(JobResponse { job_id }))
}

async fn match_series(
    State(ctx): State<AppContext>,
    Path((library_id, series_id)): Path<(String, String)>,
) -> Json<JobResponse> {
    let service = service_for(&ctx, Some(&library_id));
    let series_id = MediaServerSeriesId::new(series_id.clone());
    let description = format!("match series {series_id}");
    let job_id = ctx.jobs.submit(description, move |events| async move {
        service.match_series_metadata(&series_id, &events).await
    });
    Json(JobResponse { job_id })
}

async fn match_library(
    State(ctx): State<AppContext>,
    Path(library_id): Path<String>,
) -> Json<JobResponse> {
    let service = service_for(&ctx, Some(&library_id));
    let library_id = MediaServerLibraryId::new(library_id);
    let description = format!("match library {library_id}");
    let job_id = ctx.jobs.submit(description, move |events| async move {
        service.match_library_metadata(&library_id, &events).await
    });
    Json(JobResponse { job_id })
}

async fn reset_series(
    State(ctx): State<AppContext>,
    Path((library_id, series_id)): Path<(String, String)>,
    Query(params): Query<ResetParams>,
) -> Json<JobResponse> {
    let service = service_for(&ctx, Some(&library_id));
    let series_id = MediaServerSeriesId::new(series_id);
    let description = format!("reset series {series_id}");
    let job_id = ctx.jobs.submit(description, move |_events| async move {
        service
            .reset_series_metadata(&series_id, params.remove_cover)
            .await
    });
    Json(JobResponse { job_id })
}

async fn reset_library(
    State(ctx): State<AppContext>,
    Path(library_id): Path<String>,
    Query(params): Query<ResetParams>,
) -> Json<JobResponse> {
    let service = service_for(&ctx, Some(&library_id));
    let library_id = MediaServerLibraryId::new(library_id);
    let description = format!("reset library {library_id}");
    let job_id = ctx.jobs.submit(description, move |_events| async move {
        service
            .reset_library_metadata(&library_id, params.remove_cover)
            .await
    });
    Json(JobResponse { job_id })
}

async fn job_status(
    State(ctx): State<AppContext>,
    Path(job_id): Path<MetadataJobId>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let status = ctx
        .jobs
        .status(&job_id)
        .ok_or_else(|| shiori_common::Error::not_found("job"))?;
    Ok(Json(JobStatusResponse { job_id, status }))
}
