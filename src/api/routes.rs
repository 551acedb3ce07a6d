use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::config::STANDINGS_PROXY_PATH;
use crate::db::models::StandingsRun;
use crate::error::{AppError, Result};
use crate::fetch::{HtmlFetcher, ProxyRequest};
use crate::parse::standings::StandingsFormat;
use crate::types::{Caller, MultiTabResult, RunAction, StandingRow};
use crate::workflow::{StandingsPreview, StandingsWorkflow};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TEAM_ID_HEADER: &str = "x-team-id";

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub workflow: Arc<StandingsWorkflow>,
    /// Direct fetcher behind the standings proxy endpoint.
    pub fetcher: Arc<HtmlFetcher>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    /// Server-wide token; each request works on a child of it.
    pub shutdown: CancellationToken,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(STANDINGS_PROXY_PATH, post(proxy_standings))
        .route("/api/tournaments/:id/link", post(link_tournament))
        .route("/api/tournaments/:id/standings", get(get_standings))
        .route("/api/tournaments/:id/standings/preview", post(preview_standings))
        .route("/api/tournaments/:id/standings/runs", get(get_runs))
        .route("/api/tournaments/:id/matches/import", post(import_matches))
        .route("/api/standings/previews/:preview_id/apply", post(apply_preview))
        .route("/api/standings/runs/:run_id/rows", get(get_run_rows))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

/// Caller identity as forwarded by the auth provider.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let user_id = header(USER_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized(format!("{USER_ID_HEADER} header required")))?;
    let team_id = header(TEAM_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized(format!("{TEAM_ID_HEADER} header required")))?
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized(format!("{TEAM_ID_HEADER} must be numeric")))?;
    Ok(Caller {
        user_id: user_id.to_string(),
        team_id,
    })
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub action: RunAction,
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    /// `v9ky`, `join_football` or `generic`; defaults to the URL's host.
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub tournament_id: i64,
    pub team_id: i64,
    pub created: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub uptime_secs: i64,
    pub pending_previews: usize,
    pub imports_in_flight: u64,
    pub last_import_at: Option<i64>,
    pub fetch_failures: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Same-origin scrape proxy: 200 with the raw page, or the failure as plain text.
async fn proxy_standings(
    State(state): State<ApiState>,
    Json(req): Json<ProxyRequest>,
) -> std::result::Result<String, (StatusCode, String)> {
    let url = req.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err((StatusCode::BAD_REQUEST, format!("unsupported url: {url}")));
    }
    let cancel = state.shutdown.child_token();
    state.fetcher.fetch_html(url, &cancel).await.map_err(|e| {
        state.health.inc_fetch_failures();
        let status = match &e {
            AppError::HttpStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, e.to_string())
    })
}

async fn link_tournament(
    State(state): State<ApiState>,
    Path(tournament_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<LinkResponse>> {
    let caller = caller_from_headers(&headers)?;
    let created = state.workflow.link_tournament(&caller, tournament_id).await?;
    Ok(Json(LinkResponse {
        tournament_id,
        team_id: caller.team_id,
        created,
    }))
}

async fn get_standings(
    State(state): State<ApiState>,
    Path(tournament_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<StandingRow>>> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.current_standings(&caller, tournament_id).await?))
}

async fn preview_standings(
    State(state): State<ApiState>,
    Path(tournament_id): Path<i64>,
    Query(params): Query<PreviewQuery>,
    headers: HeaderMap,
) -> Result<Json<StandingsPreview>> {
    let caller = caller_from_headers(&headers)?;
    let format = match params.format.as_deref() {
        Some(hint) => Some(
            StandingsFormat::from_hint(hint)
                .ok_or_else(|| AppError::BadRequest(format!("unknown standings format: {hint}")))?,
        ),
        None => None,
    };
    let cancel = state.shutdown.child_token();
    let preview = state
        .workflow
        .preview(&caller, tournament_id, format, &cancel)
        .await
        .inspect_err(|e| {
            if matches!(e, AppError::Http(_) | AppError::HttpStatus { .. } | AppError::Proxy(_)) {
                state.health.inc_fetch_failures();
            }
        })?;
    Ok(Json(preview))
}

async fn apply_preview(
    State(state): State<ApiState>,
    Path(preview_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<StandingsRun>> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.apply(&caller, &preview_id, req.action).await?))
}

async fn get_runs(
    State(state): State<ApiState>,
    Path(tournament_id): Path<i64>,
    Query(params): Query<RunsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<StandingsRun>>> {
    let caller = caller_from_headers(&headers)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.workflow.list_runs(&caller, tournament_id, limit).await?))
}

async fn get_run_rows(
    State(state): State<ApiState>,
    Path(run_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<StandingRow>>> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.run_rows(&caller, run_id).await?))
}

async fn import_matches(
    State(state): State<ApiState>,
    Path(tournament_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<MultiTabResult>> {
    let caller = caller_from_headers(&headers)?;
    let cancel = state.shutdown.child_token();
    state.health.import_started();
    let res = state.workflow.import_matches(&caller, tournament_id, &cancel).await;
    state.health.import_finished(Utc::now().timestamp());
    match res {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            warn!(tournament_id, error = %e, "match import failed");
            state.health.inc_fetch_failures();
            Err(e)
        }
    }
}

async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let last_import_at = Some(state.health.last_import_at()).filter(|&t| t > 0);
    let body = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        db_ok,
        uptime_secs: Utc::now().timestamp() - state.health.started_at(),
        pending_previews: state.workflow.pending_previews(),
        imports_in_flight: state.health.imports_in_flight(),
        last_import_at,
        fetch_failures: state.health.fetch_failures(),
    };
    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    if !db_ok {
        info!("health check: database unreachable");
    }
    (status, Json(body))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_requires_both_headers() {
        let mut headers = HeaderMap::new();
        assert!(matches!(caller_from_headers(&headers), Err(AppError::Unauthorized(_))));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        assert!(matches!(caller_from_headers(&headers), Err(AppError::Unauthorized(_))));

        headers.insert(TEAM_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(matches!(caller_from_headers(&headers), Err(AppError::Unauthorized(_))));

        headers.insert(TEAM_ID_HEADER, HeaderValue::from_static(" 7 "));
        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller, Caller { user_id: "u1".into(), team_id: 7 });
    }

    #[test]
    fn apply_body_accepts_lowercase_actions() {
        let req: ApplyRequest = serde_json::from_str(r#"{"action":"skipped"}"#).unwrap();
        assert_eq!(req.action, RunAction::Skipped);
        assert!(serde_json::from_str::<ApplyRequest>(r#"{"action":"maybe"}"#).is_err());
    }
}
