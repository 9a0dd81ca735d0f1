use std::sync::{Arc, Mutex, OnceLock};

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use sysinfo::System;
use tracing::info;

use crate::auth::auth::{self, SessionUser};
use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Hub counters plus process-wide CPU and memory
pub async fn diagnostics(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_super_admin(&user)?;

    let stats = app_state.hub.stats().await;

    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Sessions: {}, Page rooms: {}, Claims: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.sessions,
        stats.page_rooms,
        stats.claims
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_sessions: stats.sessions as u32,
            n_page_rooms: stats.page_rooms as u32,
            n_account_rooms: stats.account_rooms as u32,
            n_claims: stats.claims as u32,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
