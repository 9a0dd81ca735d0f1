use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::models::{EditorsSnapshot, ErrorResponse};
use crate::AppState;

/// Current editing claims on a page
pub async fn page_editors(
    State(app_state): State<Arc<AppState>>,
    Path(page): Path<String>,
) -> Result<(StatusCode, Json<EditorsSnapshot>), (StatusCode, Json<ErrorResponse>)> {
    let editors = app_state.hub.editors(&page).await;
    Ok((StatusCode::OK, Json(EditorsSnapshot { page, editors })))
}
