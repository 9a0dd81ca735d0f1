use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Broadcast a change event to a page or account room
#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body = BroadcastRequest,
    params(
        ("x-socket-id" = Option<String>, Header, description = "Session id of the originating tab, skipped by the fan-out")
    ),
    responses(
        (status = 200, description = "Event fanned out", body = BroadcastResponse),
        (status = 400, description = "Unknown event type or no target room", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Account room not accessible", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn broadcast_event_doc() {}

/// Current editors of a page
#[utoipa::path(
    get,
    path = "/api/v1/pages/{page}/editors",
    params(
        ("page" = String, Path, description = "Page identifier")
    ),
    responses(
        (status = 200, description = "Presence snapshot", body = EditorsSnapshot),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn page_editors_doc() {}

/// Hub and process diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 403, description = "Super admin access required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        broadcast_event_doc,
        page_editors_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            BroadcastRequest,
            BroadcastResponse,
            ChangeKind,
            EditorsSnapshot,
            EditingClaim,
            EditorUser,
            DiagnosticsResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "api", description = "Presence and change-notification endpoints")
    )
)]
pub struct ApiDoc;
