//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use declarant_core::domain::{
    ConfidenceThresholds, ConfidenceTier, PersistedResult, Session, UserStatus, UserStatusCounts,
};
use declarant_core::ports::PortError;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::error::ApiError;
use crate::export::{results_to_csv, EXPORT_FILENAME_PREFIX};
use crate::ingestion::{parse_csv, ColumnMapping};
use crate::processing::process_upload;
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        process_upload_handler,
        list_sessions_handler,
        get_session_handler,
        session_results_handler,
        update_review_handler,
        delete_session_handler,
        export_session_handler,
        statistics_handler,
    ),
    components(
        schemas(
            ProcessUploadResponse,
            SessionSummary,
            SessionDetailResponse,
            ResultPayload,
            ResultsPage,
            ReviewUpdateRequest,
            UserStatusCountsPayload,
            StatisticsResponse,
        )
    ),
    tags(
        (name = "AI DECLARANT API", description = "Automatic ТН ВЭД code classification for customs brokers.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The response payload sent after an upload has been fully processed.
#[derive(Serialize, ToSchema)]
pub struct ProcessUploadResponse {
    pub session_id: i64,
    pub filename: String,
    pub total_items: u32,
    pub processed_items: u32,
    pub successful_items: u32,
    pub high_confidence_items: u32,
    pub medium_confidence_items: u32,
    pub low_confidence_items: u32,
    pub average_confidence: f64,
    pub errors: Vec<String>,
    pub processing_time_seconds: f64,
}

#[derive(Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
    pub total_items: u32,
    pub processed_items: u32,
    pub high_confidence_items: u32,
    pub medium_confidence_items: u32,
    pub low_confidence_items: u32,
    pub status: String,
    pub processing_time_seconds: f64,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            filename: session.filename,
            upload_timestamp: session.upload_timestamp,
            total_items: session.total_items,
            processed_items: session.processed_items,
            high_confidence_items: session.high_confidence_items,
            medium_confidence_items: session.medium_confidence_items,
            low_confidence_items: session.low_confidence_items,
            status: session.status.as_str().to_string(),
            processing_time_seconds: session.processing_time_seconds,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UserStatusCountsPayload {
    pub pending: u32,
    pub confirmed: u32,
    pub needs_review: u32,
    pub rejected: u32,
}

impl From<UserStatusCounts> for UserStatusCountsPayload {
    fn from(counts: UserStatusCounts) -> Self {
        Self {
            pending: counts.pending,
            confirmed: counts.confirmed,
            needs_review: counts.needs_review,
            rejected: counts.rejected,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionDetailResponse {
    pub session: SessionSummary,
    pub review: UserStatusCountsPayload,
}

#[derive(Serialize, ToSchema)]
pub struct ResultPayload {
    pub id: i64,
    pub row_index: u32,
    pub product_name: String,
    pub original_description: String,
    pub category: String,
    pub brand: String,
    pub additional_info: String,
    pub hs_code: String,
    pub confidence: u8,
    pub confidence_tier: String,
    pub tnved_description: String,
    pub ai_reasoning: String,
    pub alternative_codes: Vec<String>,
    pub user_status: String,
    pub user_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResultPayload {
    fn from_domain(result: PersistedResult, thresholds: ConfidenceThresholds) -> Self {
        let tier = match thresholds.tier(result.confidence) {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        };
        Self {
            id: result.id,
            row_index: result.row_index,
            product_name: result.product_name,
            original_description: result.original_description,
            category: result.category,
            brand: result.brand,
            additional_info: result.additional_info,
            hs_code: result.hs_code,
            confidence: result.confidence,
            confidence_tier: tier.to_string(),
            tnved_description: result.tnved_description,
            ai_reasoning: result.ai_reasoning,
            alternative_codes: result.alternative_codes,
            user_status: result.user_status.as_str().to_string(),
            user_notes: result.user_notes,
            created_at: result.created_at,
            updated_at: result.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ResultsPage {
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub items: Vec<ResultPayload>,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviewUpdateRequest {
    /// One of: pending, confirmed, needs_review, rejected.
    pub user_status: String,
    pub user_notes: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct StatisticsResponse {
    pub total_sessions: u32,
    pub total_items_processed: u64,
    pub total_high_confidence: u64,
    pub total_medium_confidence: u64,
    pub total_low_confidence: u64,
    pub avg_processing_time_seconds: f64,
    pub user_actions: UserStatusCountsPayload,
}

#[derive(Deserialize, IntoParams)]
pub struct ListSessionsQuery {
    /// Maximum number of sessions to return, newest first.
    pub limit: Option<u32>,
}

#[derive(Default, Deserialize, IntoParams)]
pub struct ResultsQuery {
    /// Filter by review status.
    pub status: Option<String>,
    /// Filter by confidence tier: high, medium or low.
    pub tier: Option<String>,
    pub min_confidence: Option<u8>,
    pub max_confidence: Option<u8>,
    /// Case-insensitive substring search over the text columns.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn port_error_response(e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::InvalidArgument(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        PortError::Unexpected(msg) => {
            error!("port failure: {msg}");
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

fn api_error_response(e: ApiError) -> (StatusCode, String) {
    match e {
        ApiError::InvalidUpload(msg) => (StatusCode::BAD_REQUEST, msg),
        ApiError::EmptyInput(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        ApiError::Port(port) => port_error_response(port),
        other => {
            error!("request failed: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

//=========================================================================================
// Result Filtering (presentation-layer, applied over the stored rows)
//=========================================================================================

struct ResultsFilter {
    status: Option<UserStatus>,
    tier: Option<ConfidenceTier>,
    min_confidence: Option<u8>,
    max_confidence: Option<u8>,
    search: Option<String>,
}

impl ResultsFilter {
    fn from_query(query: &ResultsQuery) -> Result<Self, (StatusCode, String)> {
        let status = query
            .status
            .as_deref()
            .map(UserStatus::from_str)
            .transpose()
            .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
        let tier = query
            .tier
            .as_deref()
            .map(|raw| match raw {
                "high" => Ok(ConfidenceTier::High),
                "medium" => Ok(ConfidenceTier::Medium),
                "low" => Ok(ConfidenceTier::Low),
                other => Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("invalid tier '{other}', expected high, medium or low"),
                )),
            })
            .transpose()?;
        Ok(Self {
            status,
            tier,
            min_confidence: query.min_confidence,
            max_confidence: query.max_confidence,
            search: query
                .search
                .as_deref()
                .map(str::to_lowercase)
                .filter(|s| !s.is_empty()),
        })
    }

    fn matches(&self, result: &PersistedResult, thresholds: ConfidenceThresholds) -> bool {
        if let Some(status) = self.status {
            if result.user_status != status {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if thresholds.tier(result.confidence) != tier {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if result.confidence < min {
                return false;
            }
        }
        if let Some(max) = self.max_confidence {
            if result.confidence > max {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let haystacks = [
                &result.product_name,
                &result.original_description,
                &result.tnved_description,
                &result.ai_reasoning,
                &result.hs_code,
            ];
            if !haystacks
                .iter()
                .any(|text| text.to_lowercase().contains(needle))
            {
                return false;
            }
        }
        true
    }
}

fn page_bounds(total: usize, page: usize, per_page: usize) -> (usize, usize) {
    let start = (page - 1).saturating_mul(per_page).min(total);
    let end = start.saturating_add(per_page).min(total);
    (start, end)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Upload a tabular file and classify every row.
///
/// Accepts a multipart/form-data request with a `file` part (CSV) and a
/// `mapping` part: a JSON object assigning source columns to semantic roles,
/// e.g. `{"product_name": "Товар", "brand": "Бренд"}`.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(content_type = "multipart/form-data", description = "The file to classify plus the column mapping."),
    responses(
        (status = 201, description = "Upload processed", body = ProcessUploadResponse),
        (status = 400, description = "Bad request (missing part, unparseable file)"),
        (status = 422, description = "No classifiable rows in the file"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn process_upload_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut mapping: Option<ColumnMapping> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        match field.name().unwrap_or_default().to_string().as_str() {
            "file" => {
                let name = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read file bytes: {}", e),
                    )
                })?;
                file = Some((name, data.to_vec()));
            }
            "mapping" => {
                let raw = field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read mapping part: {}", e),
                    )
                })?;
                let parsed: ColumnMapping = serde_json::from_str(&raw).map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Invalid column mapping: {}", e),
                    )
                })?;
                mapping = Some(parsed);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or((
        StatusCode::BAD_REQUEST,
        "Multipart form must include a 'file' part".to_string(),
    ))?;
    let mapping = mapping.ok_or((
        StatusCode::BAD_REQUEST,
        "Multipart form must include a 'mapping' part".to_string(),
    ))?;

    let config = &app_state.config;
    if bytes.len() > config.max_upload_bytes {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "file is {} bytes, the limit is {}",
                bytes.len(),
                config.max_upload_bytes
            ),
        ));
    }

    let table = parse_csv(&bytes, config.max_rows_per_file).map_err(api_error_response)?;

    let outcome = process_upload(
        app_state.store.as_ref(),
        &app_state.orchestrator,
        &table,
        &mapping,
        &filename,
        config.batch_size,
        config.thresholds(),
    )
    .await
    .map_err(api_error_response)?;

    let response = ProcessUploadResponse {
        session_id: outcome.session_id,
        filename,
        total_items: table.row_count() as u32,
        processed_items: outcome.run.results.len() as u32,
        successful_items: outcome.run.stats.successful as u32,
        high_confidence_items: outcome.tier_counts.high,
        medium_confidence_items: outcome.tier_counts.medium,
        low_confidence_items: outcome.tier_counts.low,
        average_confidence: outcome.run.stats.average_confidence,
        errors: outcome.run.errors,
        processing_time_seconds: outcome.processing_time_seconds,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List recent processing sessions, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    params(ListSessionsQuery),
    responses(
        (status = 200, description = "Recent sessions", body = [SessionSummary]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sessions = app_state
        .store
        .recent_sessions(query.limit.unwrap_or(5))
        .await
        .map_err(port_error_response)?;
    let payload: Vec<SessionSummary> = sessions.into_iter().map(SessionSummary::from).collect();
    Ok(Json(payload))
}

/// Fetch one session with its review-status counts.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session detail", body = SessionDetailResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = app_state
        .store
        .get_session(id)
        .await
        .map_err(port_error_response)?;
    let review = app_state
        .store
        .user_status_counts(Some(id))
        .await
        .map_err(port_error_response)?;
    Ok(Json(SessionDetailResponse {
        session: session.into(),
        review: review.into(),
    }))
}

/// Fetch a session's results with filtering and paging.
#[utoipa::path(
    get,
    path = "/sessions/{id}/results",
    params(("id" = i64, Path, description = "Session identifier"), ResultsQuery),
    responses(
        (status = 200, description = "One page of results", body = ResultsPage),
        (status = 404, description = "Session not found"),
        (status = 422, description = "Invalid filter value")
    )
)]
pub async fn session_results_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 404 on an unknown session rather than an empty page.
    app_state
        .store
        .get_session(id)
        .await
        .map_err(port_error_response)?;

    let filter = ResultsFilter::from_query(&query)?;
    let thresholds = app_state.config.thresholds();

    let results = app_state
        .store
        .results_for_session(id)
        .await
        .map_err(port_error_response)?;
    let filtered: Vec<PersistedResult> = results
        .into_iter()
        .filter(|r| filter.matches(r, thresholds))
        .collect();

    let total = filtered.len();
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(10).clamp(1, 100);
    let (start, end) = page_bounds(total, page, per_page);

    let items = filtered[start..end]
        .iter()
        .cloned()
        .map(|r| ResultPayload::from_domain(r, thresholds))
        .collect();

    Ok(Json(ResultsPage {
        total,
        page,
        per_page,
        items,
    }))
}

/// Update the review status and notes of one result.
#[utoipa::path(
    patch,
    path = "/results/{id}",
    params(("id" = i64, Path, description = "Result identifier")),
    request_body = ReviewUpdateRequest,
    responses(
        (status = 200, description = "Updated result", body = ResultPayload),
        (status = 404, description = "Result not found"),
        (status = 422, description = "Invalid user status")
    )
)]
pub async fn update_review_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<ReviewUpdateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Validate before any write; an unknown status never reaches the store.
    let user_status = UserStatus::from_str(&request.user_status)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    app_state
        .store
        .update_user_review(id, user_status, request.user_notes.as_deref())
        .await
        .map_err(port_error_response)?;

    let updated = app_state
        .store
        .get_result(id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ResultPayload::from_domain(
        updated,
        app_state.config.thresholds(),
    )))
}

/// Delete a session together with all its results.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .store
        .delete_session(id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Download a session's results as CSV (UTF-8 with BOM).
#[utoipa::path(
    get,
    path = "/sessions/{id}/export",
    params(("id" = i64, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "CSV attachment", body = String, content_type = "text/csv"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn export_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .store
        .get_session(id)
        .await
        .map_err(port_error_response)?;
    let results = app_state
        .store
        .results_for_session(id)
        .await
        .map_err(port_error_response)?;

    let body = results_to_csv(&results, app_state.config.thresholds())
        .map_err(api_error_response)?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{EXPORT_FILENAME_PREFIX}_{id}.csv\""),
        ),
    ];
    Ok((headers, body))
}

/// Aggregate statistics over all completed sessions.
#[utoipa::path(
    get,
    path = "/statistics",
    responses(
        (status = 200, description = "Overall statistics", body = StatisticsResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn statistics_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stats = app_state
        .store
        .overall_statistics()
        .await
        .map_err(port_error_response)?;
    let user_actions = app_state
        .store
        .user_status_counts(None)
        .await
        .map_err(port_error_response)?;

    Ok(Json(StatisticsResponse {
        total_sessions: stats.total_sessions,
        total_items_processed: stats.total_items_processed,
        total_high_confidence: stats.total_high_confidence,
        total_medium_confidence: stats.total_medium_confidence,
        total_low_confidence: stats.total_low_confidence,
        avg_processing_time_seconds: stats.avg_processing_time_seconds,
        user_actions: user_actions.into(),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn result(confidence: u8, user_status: UserStatus, product_name: &str) -> PersistedResult {
        let now = Utc::now();
        PersistedResult {
            id: 1,
            session_id: 1,
            row_index: 0,
            product_name: product_name.to_string(),
            original_description: String::new(),
            category: String::new(),
            brand: String::new(),
            additional_info: String::new(),
            hs_code: "8517.12.000".to_string(),
            confidence,
            tnved_description: "Телефоны сотовой связи".to_string(),
            ai_reasoning: String::new(),
            alternative_codes: Vec::new(),
            user_status,
            user_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn filter(query: ResultsQuery) -> ResultsFilter {
        ResultsFilter::from_query(&query).expect("valid filter")
    }

    #[test]
    fn filter_by_tier_and_status() {
        let thresholds = ConfidenceThresholds::default();
        let high = result(92, UserStatus::Pending, "Смартфон");
        let medium = result(55, UserStatus::Confirmed, "Кофе");

        let tier_filter = filter(ResultsQuery {
            tier: Some("high".to_string()),
            ..ResultsQuery::default()
        });
        assert!(tier_filter.matches(&high, thresholds));
        assert!(!tier_filter.matches(&medium, thresholds));

        let status_filter = filter(ResultsQuery {
            status: Some("confirmed".to_string()),
            ..ResultsQuery::default()
        });
        assert!(!status_filter.matches(&high, thresholds));
        assert!(status_filter.matches(&medium, thresholds));
    }

    #[test]
    fn filter_by_confidence_range_and_search() {
        let thresholds = ConfidenceThresholds::default();
        let smartphone = result(92, UserStatus::Pending, "Смартфон Apple iPhone");
        let coffee = result(45, UserStatus::Pending, "Кофе в зернах");

        let range = filter(ResultsQuery {
            min_confidence: Some(40),
            max_confidence: Some(60),
            ..ResultsQuery::default()
        });
        assert!(!range.matches(&smartphone, thresholds));
        assert!(range.matches(&coffee, thresholds));

        // Search is case-insensitive and reaches the tariff description too.
        let search = filter(ResultsQuery {
            search: Some("APPLE".to_string()),
            ..ResultsQuery::default()
        });
        assert!(search.matches(&smartphone, thresholds));
        assert!(!search.matches(&coffee, thresholds));

        let by_description = filter(ResultsQuery {
            search: Some("сотовой".to_string()),
            ..ResultsQuery::default()
        });
        assert!(by_description.matches(&coffee, thresholds));
    }

    #[test]
    fn invalid_filter_values_are_rejected() {
        let bad_status = ResultsFilter::from_query(&ResultsQuery {
            status: Some("approved".to_string()),
            ..ResultsQuery::default()
        });
        assert_eq!(bad_status.err().unwrap().0, StatusCode::UNPROCESSABLE_ENTITY);

        let bad_tier = ResultsFilter::from_query(&ResultsQuery {
            tier: Some("great".to_string()),
            ..ResultsQuery::default()
        });
        assert_eq!(bad_tier.err().unwrap().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn page_bounds_clamp_to_the_result_set() {
        assert_eq!(page_bounds(25, 1, 10), (0, 10));
        assert_eq!(page_bounds(25, 3, 10), (20, 25));
        assert_eq!(page_bounds(25, 4, 10), (25, 25));
        assert_eq!(page_bounds(0, 1, 10), (0, 0));
    }
}
