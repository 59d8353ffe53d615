use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use threatline_common::{normalize_cpe_component, ExposureState, TechStackItem};
use threatline_exposure::generate_cpe_pattern;

use crate::auth::AuthUser;
use crate::AppState;

/// Internal failures render as a JSON 500; details stay in the logs.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal error"})),
        )
            .into_response()
    }
}

pub async fn health() -> &'static str {
    "ok"
}

/// Trigger the digest pipeline for the caller. Returns the run outcome.
pub async fn run_digest(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store
        .user_by_id(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown user {user_id}"))?;
    let fut: std::pin::Pin<
        Box<dyn std::future::Future<Output = threatline_common::DigestOutcome> + Send + '_>,
    > = Box::pin(state.pipeline.run_for_user(&user));
    let outcome = fut.await;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BriefsQuery {
    limit: Option<i64>,
}

/// Briefed stories, most severe first.
pub async fn feed_briefs(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<BriefsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let briefs = state.store.briefs_for_user(user_id, limit).await?;
    Ok(Json(briefs))
}

/// The caller's exposure ledger, newest detections first.
pub async fn exposure_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let exposures = state.store.exposures_for_user(user_id).await?;
    Ok(Json(exposures))
}

pub async fn exposure_metrics(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = state.exposure.remediation_metrics(user_id).await?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
pub struct ExposureUpdate {
    exposure_state: ExposureState,
    patched_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

/// Manual exposure override. The row becomes user-owned: scheduled and
/// retroactive auto-classification will never touch it again.
pub async fn update_exposure(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(cve_id): Path<String>,
    Json(update): Json<ExposureUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let cve_id = cve_id.to_uppercase();
    state
        .store
        .set_exposure_manual(
            user_id,
            &cve_id,
            update.exposure_state,
            update.patched_at,
            update.notes.as_deref(),
        )
        .await?;
    let exposure = state.store.exposure_for(user_id, &cve_id).await?;
    Ok(Json(exposure))
}

#[derive(Debug, Deserialize)]
pub struct NewStackItem {
    vendor: String,
    product: String,
    version: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StackItemCreated {
    item: TechStackItem,
    retroactive_matches: usize,
}

/// Declare a technology. Names are normalized, a CPE pattern is derived,
/// and historical CVEs are re-matched against the new item.
pub async fn create_stack_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(new): Json<NewStackItem>,
) -> Result<impl IntoResponse, ApiError> {
    let vendor = normalize_cpe_component(&new.vendor);
    let product = normalize_cpe_component(&new.product);
    if vendor.is_empty() || product.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "vendor and product are required"})),
        )
            .into_response());
    }

    let item = state
        .store
        .create_tech_stack_item(&TechStackItem {
            id: Uuid::new_v4(),
            user_id,
            cpe_pattern: generate_cpe_pattern(&vendor, &product),
            vendor,
            product,
            version: new.version.filter(|v| !v.trim().is_empty()),
            category: new.category.unwrap_or_else(|| "other".to_string()),
            active: true,
        })
        .await?;

    let retroactive_matches = state.exposure.retroactive_match(user_id, &item).await?;

    Ok(Json(StackItemCreated {
        item,
        retroactive_matches,
    })
    .into_response())
}

pub async fn delete_stack_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_tech_stack_item(user_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn period_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(period): Path<String>,
) -> Result<Response, ApiError> {
    let Ok(period) = period.parse::<threatline_common::ReportPeriod>() else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "period must be 1d, 7d, or 30d"})),
        )
            .into_response());
    };
    let report = state.store.period_report(user_id, period).await?;
    match report {
        Some(report) => Ok(Json(json!({
            "userId": report.user_id,
            "period": report.period,
            "fromDate": report.from_date,
            "toDate": report.to_date,
            "summary": report.summary,
            "stats": report.stats,
            "generatedAt": report.generated_at,
        }))
        .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}
