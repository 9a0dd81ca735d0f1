use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{debug, error, warn};

use crate::auth::auth::{authenticate, AuthError};
use crate::models::ErrorResponse;
use crate::AppState;

pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    // 1. Resolve the principal from header, cookie or query token
    let user = match authenticate(app_state.validator.as_ref(), req.headers(), req.uri().query()) {
        Ok(user) => user,
        Err(AuthError::NotConfigured) => {
            error!("JWT secret not configured, refusing authenticated request");
            return Err(ErrorResponse::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication is not configured",
            ));
        }
        Err(e) => {
            warn!("Authentication failed: {}", e);
            return Err(ErrorResponse::reply(StatusCode::UNAUTHORIZED, e.to_string()));
        }
    };
    debug!("Request authenticated for {}", user.display_name);

    // 2. Hand the principal to downstream handlers
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
