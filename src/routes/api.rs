use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{broadcast_event, diagnostics, health_check, page_editors, ready_check, SOCKET_ID_HEADER};
use crate::routes::auth_middleware::auth_middleware;
use crate::websocket::websocket_handler;
use crate::AppState;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::<Arc<AppState>>::new()
        .route("/v1/events", post(broadcast_event))
        .route("/v1/pages/:page/editors", get(page_editors))
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(app_state, auth_middleware)); // Applies to all routes added above

    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
}

/// The full application: websocket endpoint, REST API, Swagger UI, CORS and tracing.
pub fn create_app(app_state: Arc<AppState>) -> Router {
    let extra_origins = app_state.config.extra_cors_origins();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| is_allowed_origin(o, &extra_origins))
                .unwrap_or(false)
        }))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(SOCKET_ID_HEADER),
        ]);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api", create_api_routes(app_state.clone()))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Local development hosts, ngrok tunnels, private LAN addresses and configured extras.
pub fn is_allowed_origin(origin: &str, extra: &[String]) -> bool {
    if extra.iter().any(|o| o == origin) {
        return true;
    }
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    match host {
        "localhost" | "127.0.0.1" => true,
        h if h.ends_with("ngrok.io") || h.ends_with("ngrok-free.app") => true,
        h if url.scheme() == "http" && h.starts_with("192.168.") => true,
        _ => false,
    }
}
