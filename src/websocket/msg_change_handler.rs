use tracing::{debug, warn};

use crate::models::ChangeNotice;
use crate::websocket::connctx::ConnCtx;

/// Handle `change:notify`: fan a typed change out to the page, skipping the sender.
pub async fn handle_change_notify(ctx: &mut ConnCtx, notice: ChangeNotice) {
    let (page, kind) = (notice.page.clone(), notice.event_type);
    match ctx.state.hub.notify_change(ctx.session.id, notice).await {
        Ok(delivered) => debug!("{} on {} from session {} reached {} receiver(s)", kind, page, ctx.session.id, delivered),
        Err(e) => warn!("change:notify on {} failed: {}", page, e),
    }
}
