//! HTTP request handlers for the Attendance Point Engine API.
//!
//! This module contains the handler functions for all API endpoints.
//! Every handler resolves the acting user from the `X-Actor-Id` and
//! `X-Actor-Role` headers; capability checks themselves live in the
//! engine services, so a handler only decides scoping (which user's
//! data a non-privileged caller may see).

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{CreationOutcome, ManualPointPayload, ManualPointUpdate, SkipReason};
use crate::models::{AttendanceOutcome, AttendancePoint, Capabilities, VecAttendanceSource};
use crate::store::PointFilter;

use super::request::{ExcuseRequest, ExpireRequest, RegenerateRequest, ResetRequest};
use super::response::{ApiError, ApiErrorResponse};
use super::state::AppState;

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/points", post(create_point).get(list_points))
        .route("/points/:id", put(update_point).delete(delete_point))
        .route("/points/:id/excuse", post(excuse_point))
        .route("/points/:id/unexcuse", post(unexcuse_point))
        .route("/attendance/points", post(create_from_attendance))
        .route("/stats", get(stats))
        .route("/users/:id/stats", get(user_stats))
        .route("/users/:id/gbro", get(user_gbro))
        .route("/maintenance/dedupe", post(maintenance_dedupe))
        .route("/maintenance/expire", post(maintenance_expire))
        .route("/maintenance/backfill", post(maintenance_backfill))
        .route("/maintenance/repair", post(maintenance_repair))
        .route("/maintenance/reset", post(maintenance_reset))
        .route("/maintenance/regenerate", post(maintenance_regenerate))
        .route("/maintenance/cleanup", post(maintenance_cleanup))
        .route("/maintenance/stats", get(maintenance_stats))
        .with_state(state)
}

/// The authenticated caller, resolved from request headers.
struct Actor {
    id: i64,
    caps: Capabilities,
}

fn resolve_actor(headers: &HeaderMap) -> Result<Actor, ApiErrorResponse> {
    let id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ApiErrorResponse {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::bad_actor_header("X-Actor-Id header must be a numeric user id"),
        })?;
    let role = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("employee");
    Ok(Actor {
        id,
        caps: Capabilities::from_role(role),
    })
}

fn parse_json<T>(
    payload: Result<Json<T>, JsonRejection>,
    correlation_id: Uuid,
) -> Result<T, ApiErrorResponse> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            let error = match rejection {
                JsonRejection::JsonDataError(err) => {
                    let body_text = err.body_text();
                    warn!(correlation_id = %correlation_id, error = %body_text, "JSON data error");
                    if body_text.contains("missing field") {
                        ApiError::new("VALIDATION_ERROR", body_text)
                    } else {
                        ApiError::malformed_json(body_text)
                    }
                }
                JsonRejection::JsonSyntaxError(err) => {
                    warn!(correlation_id = %correlation_id, error = %err, "JSON syntax error");
                    ApiError::malformed_json(format!("Invalid JSON syntax: {}", err))
                }
                JsonRejection::MissingJsonContentType(_) => {
                    ApiError::new("MISSING_CONTENT_TYPE", "Content-Type must be application/json")
                }
                _ => ApiError::malformed_json("Failed to parse request body"),
            };
            Err(ApiErrorResponse {
                status: StatusCode::BAD_REQUEST,
                error,
            })
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Handler for POST /points.
async fn create_point(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ManualPointPayload>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let payload = parse_json(payload, correlation_id)?;
    info!(
        correlation_id = %correlation_id,
        user_id = payload.user_id,
        "Processing manual point creation"
    );

    let point = state
        .creation()
        .create_manual(&payload, actor.id, &actor.caps, today())?;
    Ok((StatusCode::CREATED, Json(point)).into_response())
}

/// Handler for PUT /points/{id}.
async fn update_point(
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    headers: HeaderMap,
    payload: Result<Json<ManualPointUpdate>, JsonRejection>,
) -> Result<Json<AttendancePoint>, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let update = parse_json(payload, correlation_id)?;
    info!(correlation_id = %correlation_id, point_id, "Processing point update");

    let point = state
        .creation()
        .update_manual(point_id, &update, &actor.caps, today())?;
    Ok(Json(point))
}

/// Handler for DELETE /points/{id}.
async fn delete_point(
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    state.creation().delete_manual(point_id, &actor.caps, today())?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /points/{id}/excuse.
async fn excuse_point(
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    headers: HeaderMap,
    payload: Result<Json<ExcuseRequest>, JsonRejection>,
) -> Result<Json<AttendancePoint>, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let request = parse_json(payload, correlation_id)?;
    info!(correlation_id = %correlation_id, point_id, "Processing excuse");

    let point = state
        .creation()
        .excuse(point_id, actor.id, request.reason, &actor.caps, today())?;
    Ok(Json(point))
}

/// Handler for POST /points/{id}/unexcuse.
async fn unexcuse_point(
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<AttendancePoint>, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let point = state.creation().unexcuse(point_id, &actor.caps, today())?;
    Ok(Json(point))
}

/// Response body for POST /attendance/points.
#[derive(Debug, Serialize)]
struct AttendanceCreateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<AttendancePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<SkipReason>,
}

/// Handler for POST /attendance/points.
///
/// Derives a point from one verified attendance record. Responds 201
/// when a point was created and 200 when the record was skipped.
async fn create_from_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AttendanceOutcome>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    Capabilities::require(actor.caps.manage_points, "derive points from attendance")?;
    let outcome = parse_json(payload, correlation_id)?;
    info!(
        correlation_id = %correlation_id,
        attendance_id = outcome.id,
        user_id = outcome.user_id,
        "Processing attendance-derived point"
    );

    match state.creation().create_from_attendance(&outcome, today())? {
        CreationOutcome::Created(point) => Ok((
            StatusCode::CREATED,
            Json(AttendanceCreateResponse {
                created: Some(point),
                skipped: None,
            }),
        )
            .into_response()),
        CreationOutcome::Skipped(reason) => Ok((
            StatusCode::OK,
            Json(AttendanceCreateResponse {
                created: None,
                skipped: Some(reason),
            }),
        )
            .into_response()),
    }
}

/// Handler for GET /points.
async fn list_points(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<PointFilter>,
) -> Result<Json<Vec<AttendancePoint>>, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let scope = (!actor.caps.view_all).then_some(actor.id);
    let points = state.stats().list_points(&filter, scope)?;
    Ok(Json(points))
}

/// Handler for GET /stats.
async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<PointFilter>,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let scope = (!actor.caps.view_all).then_some(actor.id);
    let stats = state.stats().calculate_stats(&filter, scope)?;
    Ok(Json(stats).into_response())
}

fn require_self_or_privileged(actor: &Actor, user_id: i64) -> Result<(), ApiErrorResponse> {
    if actor.caps.view_all || actor.id == user_id {
        Ok(())
    } else {
        Err(ApiErrorResponse {
            status: StatusCode::FORBIDDEN,
            error: ApiError::new("NOT_AUTHORIZED", "Not authorized to view other users' points"),
        })
    }
}

/// Handler for GET /users/{id}/stats.
async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    require_self_or_privileged(&actor, user_id)?;
    let stats = state.stats().user_statistics(user_id)?;
    Ok(Json(stats).into_response())
}

/// Handler for GET /users/{id}/gbro.
async fn user_gbro(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    require_self_or_privileged(&actor, user_id)?;
    let stats = state.expiration().gbro_stats(user_id, today())?;
    Ok(Json(stats).into_response())
}

#[derive(Debug, Serialize)]
struct RowCountResponse {
    rows_written: usize,
}

#[derive(Debug, Serialize)]
struct ExpiredCountResponse {
    expired: usize,
}

#[derive(Debug, Serialize)]
struct ResetCountResponse {
    reset: usize,
}

/// Handler for POST /maintenance/dedupe.
async fn maintenance_dedupe(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let report = state.maintenance().remove_duplicates(&actor.caps, today())?;
    Ok(Json(report).into_response())
}

/// Handler for POST /maintenance/expire.
async fn maintenance_expire(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ExpireRequest>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let request = parse_json(payload, correlation_id)?;
    let expired = state
        .maintenance()
        .expire_all_pending(request.scope, &actor.caps, today())?;
    Ok(Json(ExpiredCountResponse { expired }).into_response())
}

/// Handler for POST /maintenance/backfill.
async fn maintenance_backfill(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let rows_written = state
        .maintenance()
        .initialize_gbro_dates(&actor.caps, today())?;
    Ok(Json(RowCountResponse { rows_written }).into_response())
}

/// Handler for POST /maintenance/repair.
async fn maintenance_repair(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let rows_written = state.maintenance().fix_gbro_dates(&actor.caps, today())?;
    Ok(Json(RowCountResponse { rows_written }).into_response())
}

/// Handler for POST /maintenance/reset.
async fn maintenance_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let request = parse_json(payload, correlation_id)?;
    let reset = state.maintenance().reset_expired(
        request.user_ids.as_deref(),
        &actor.caps,
        today(),
    )?;
    Ok(Json(ResetCountResponse { reset }).into_response())
}

/// Handler for POST /maintenance/regenerate.
async fn maintenance_regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RegenerateRequest>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let correlation_id = Uuid::new_v4();
    let actor = resolve_actor(&headers)?;
    let request = parse_json(payload, correlation_id)?;
    info!(
        correlation_id = %correlation_id,
        records = request.records.len(),
        "Processing point regeneration"
    );

    let source = VecAttendanceSource::new(request.records);
    let report = state.maintenance().regenerate_points(
        state.creation(),
        &source,
        request.date_from,
        request.date_to,
        request.user_id,
        &actor.caps,
        today(),
    )?;
    Ok(Json(report).into_response())
}

/// Handler for POST /maintenance/cleanup.
async fn maintenance_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let report = state.maintenance().cleanup(&actor.caps, today())?;
    Ok(Json(report).into_response())
}

/// Handler for GET /maintenance/stats.
async fn maintenance_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiErrorResponse> {
    let actor = resolve_actor(&headers)?;
    let counts = state.maintenance().management_stats(&actor.caps)?;
    Ok(Json(counts).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::engine::NullNotifier;
    use crate::store::PointStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let store = Arc::new(PointStore::open_in_memory().expect("in-memory store"));
        AppState::new(store, PolicyConfig::default(), Arc::new(NullNotifier))
    }

    fn post_json(uri: &str, role: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("X-Actor-Id", "1")
            .header("X-Actor-Role", role)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const MANUAL_POINT: &str = r#"{
        "user_id": 10,
        "shift_date": "2024-01-05",
        "point_type": "tardy",
        "status": "tardy",
        "tardy_minutes": 12
    }"#;

    #[tokio::test]
    async fn test_create_point_returns_201() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(post_json("/points", "admin", MANUAL_POINT))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let point: AttendancePoint = serde_json::from_slice(&body).unwrap();
        assert_eq!(point.user_id, 10);
        assert!(point.is_manual);
        assert_eq!(point.created_by, Some(1));
    }

    #[tokio::test]
    async fn test_create_point_as_employee_returns_403() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(post_json("/points", "employee", MANUAL_POINT))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "NOT_AUTHORIZED");
    }

    #[tokio::test]
    async fn test_create_point_malformed_json_returns_400() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(post_json("/points", "admin", "{invalid json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "MALFORMED_JSON");
    }

    #[tokio::test]
    async fn test_create_point_missing_field_returns_400() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(post_json(
                "/points",
                "admin",
                r#"{"shift_date": "2024-01-05", "point_type": "tardy", "status": "tardy"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        assert!(
            error.message.contains("missing field"),
            "expected a missing field message, got: {}",
            error.message
        );
    }

    #[tokio::test]
    async fn test_missing_actor_header_returns_400() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/points")
                    .header("Content-Type", "application/json")
                    .body(Body::from(MANUAL_POINT))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "BAD_ACTOR_HEADER");
    }

    #[tokio::test]
    async fn test_update_system_point_returns_409() {
        let state = create_test_state();
        let router = create_router(state.clone());

        // Seed a system-generated point through the attendance endpoint.
        let response = router
            .clone()
            .oneshot(post_json(
                "/attendance/points",
                "admin",
                r#"{
                    "id": 301,
                    "user_id": 10,
                    "shift_date": "2024-01-05",
                    "status": "tardy",
                    "tardy_minutes": 9,
                    "admin_verified": true
                }"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/points/1")
                    .header("Content-Type", "application/json")
                    .header("X-Actor-Id", "1")
                    .header("X-Actor-Role", "admin")
                    .body(Body::from(r#"{"notes": "edited"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_attendance_duplicate_returns_skipped() {
        let router = create_router(create_test_state());
        let record = r#"{
            "id": 77,
            "user_id": 10,
            "shift_date": "2024-01-05",
            "status": "tardy",
            "tardy_minutes": 9,
            "admin_verified": true
        }"#;

        let response = router
            .clone()
            .oneshot(post_json("/attendance/points", "admin", record))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(post_json("/attendance/points", "admin", record))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["skipped"], "already_ported");
    }

    #[tokio::test]
    async fn test_employee_list_is_scoped_to_self() {
        let state = create_test_state();
        let router = create_router(state.clone());

        for (user, shift) in [(10, "2024-01-05"), (11, "2024-01-06")] {
            let body = format!(
                r#"{{"user_id": {user}, "shift_date": "{shift}", "point_type": "tardy", "status": "tardy"}}"#
            );
            let response = router
                .clone()
                .oneshot(post_json("/points", "admin", &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        // User 10 asks for everything but only sees their own point.
        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/points")
                    .header("X-Actor-Id", "10")
                    .header("X-Actor-Role", "employee")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let points: Vec<AttendancePoint> = serde_json::from_slice(&body).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].user_id, 10);
    }

    #[tokio::test]
    async fn test_employee_cannot_view_other_users_gbro() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/users/11/gbro")
                    .header("X-Actor-Id", "10")
                    .header("X-Actor-Role", "employee")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_maintenance_requires_admin_role() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(post_json("/maintenance/dedupe", "hr", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
