use tracing::{debug, warn};

use crate::models::EditingTarget;
use crate::websocket::connctx::ConnCtx;
use crate::ws::presence::ClaimOutcome;

/// Handle `editing:start`
pub async fn handle_editing_start(ctx: &mut ConnCtx, target: EditingTarget) {
    let page = target.page.clone();
    match ctx.state.hub.start_editing(ctx.session.id, target).await {
        Ok(ClaimOutcome::Replaced(previous)) => {
            debug!("Session {} took over a claim on {} from session {}", ctx.session.id, page, previous);
        }
        Ok(outcome) => debug!("Session {} claim on {}: {:?}", ctx.session.id, page, outcome),
        Err(e) => warn!("editing:start on {} failed: {}", page, e),
    }
}

/// Handle `editing:end`. Ending a claim that does not exist is a no-op.
pub async fn handle_editing_end(ctx: &mut ConnCtx, target: EditingTarget) {
    let page = target.page.clone();
    match ctx.state.hub.end_editing(ctx.session.id, target).await {
        Ok(true) => debug!("Session {} released a claim on {}", ctx.session.id, page),
        Ok(false) => debug!("Session {} ended an unknown claim on {}", ctx.session.id, page),
        Err(e) => warn!("editing:end on {} failed: {}", page, e),
    }
}
