use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use presence_hub::auth::auth::SessionUser;
use presence_hub::config::Config;
use presence_hub::models::{EditingTarget, RecordId};
use presence_hub::routes::create_app;
use presence_hub::ws::RoomKey;
use presence_hub::AppState;

const SECRET: &str = "api-secret";

fn token(id: i64, account_type: &str) -> String {
    let claims = json!({
        "accountId": id,
        "username": format!("user{id}"),
        "accountType": account_type,
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Config {
        jwt_secret: Some(SECRET.to_string()),
        ..Config::default()
    }));
    (create_app(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_event(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post("/api/v1/events").header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_and_ready_are_public() {
    let (app, _) = app();
    let response = app.clone().oneshot(Request::get("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], json!("ok"));

    let response = app.oneshot(Request::get("/api/ready").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sessions"], json!(0));
}

#[tokio::test]
async fn events_require_a_token() {
    let (app, _) = app();
    let response = app
        .oneshot(post_event(None, json!({"eventType": "sites:changed", "page": "sites"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn events_validate_type_and_target() {
    let (app, _) = app();
    let t = token(1, "user");

    let unknown = app
        .clone()
        .oneshot(post_event(Some(&t), json!({"eventType": "audit:changed", "page": "sites"})))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let untargeted = app
        .clone()
        .oneshot(post_event(Some(&t), json!({"eventType": "sites:changed"})))
        .await
        .unwrap();
    assert_eq!(untargeted.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(untargeted).await["code"], json!(400));

    let foreign = app
        .oneshot(post_event(Some(&t), json!({"eventType": "sites:changed", "accountId": 2})))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn events_reach_page_members_except_the_origin() {
    let (app, state) = app();
    let user = |id: &str| SessionUser {
        id: id.into(),
        display_name: format!("user{id}"),
        account_type: None,
        office_id: None,
    };
    let origin = state.hub.connect(user("1")).await;
    let peer = state.hub.connect(user("2")).await;
    let _origin_feed = state.hub.join_page(origin.id, "sites").await.unwrap();
    let mut peer_feed = state.hub.join_page(peer.id, "sites").await.unwrap();

    let request = {
        let mut r = post_event(Some(&token(1, "user")), json!({"eventType": "sites:changed", "page": "sites", "hints": {"id": 3}}));
        r.headers_mut().insert("x-socket-id", origin.id.to_string().parse().unwrap());
        r
    };
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delivered"], json!(2));

    let frame = peer_feed.receiver.try_recv().unwrap();
    assert!(frame.is_for(peer.id));
    assert!(!frame.is_for(origin.id));
}

#[tokio::test]
async fn page_editors_lists_current_claims() {
    let (app, state) = app();
    let session = state
        .hub
        .connect(SessionUser {
            id: "4".into(),
            display_name: "Dami".into(),
            account_type: None,
            office_id: None,
        })
        .await;
    let _feed = state.hub.join_page(session.id, "finish").await.unwrap();
    state
        .hub
        .start_editing(
            session.id,
            EditingTarget {
                page: "finish".into(),
                section: "row".into(),
                record_id: Some(RecordId::Number(8.into())),
            },
        )
        .await
        .unwrap();
    assert_eq!(state.hub.member_count(&RoomKey::Page("finish".into())).await, 1);

    let request = Request::get("/api/v1/pages/finish/editors")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(1, "user")))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["page"], json!("finish"));
    assert_eq!(body["editors"][0]["recordId"], json!(8));
    assert_eq!(body["editors"][0]["user"]["displayName"], json!("Dami"));
}

#[tokio::test]
async fn diagnostics_are_for_super_admins() {
    let (app, _) = app();
    let get = |t: String| {
        Request::get("/api/v1/diagnostics")
            .header(header::AUTHORIZATION, format!("Bearer {t}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(get(token(1, "user"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.oneshot(get(token(1, "super_admin"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["n_sessions"], json!(0));
}

#[tokio::test]
async fn cookie_tokens_are_accepted() {
    let (app, _) = app();
    let request = Request::get("/api/v1/pages/sites/editors")
        .header(header::COOKIE, format!("theme=dark; auth_token={}", token(1, "user")))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
