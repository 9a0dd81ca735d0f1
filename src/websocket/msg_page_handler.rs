use tracing::{info, warn};

use crate::models::{RecordId, ServerMessage};
use crate::websocket::connctx::ConnCtx;

/// Handle `join:page`: swap the page feed and send the joiner its snapshot.
pub async fn handle_join_page(ctx: &mut ConnCtx, page: String) -> bool {
    let joined = match ctx.state.hub.join_page(ctx.session.id, &page).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!("join:page {} failed: {}", page, e);
            return true;
        }
    };
    info!("Session {} ({}) joined page {}", ctx.session.id, ctx.session.user.display_name, page);
    ctx.page = Some((page, joined.receiver));
    ctx.send(&ServerMessage::EditorsList(joined.snapshot)).await
}

/// Handle `leave:page`
pub async fn handle_leave_page(ctx: &mut ConnCtx, page: String) {
    if let Err(e) = ctx.state.hub.leave_page(ctx.session.id, &page).await {
        warn!("leave:page {} failed: {}", page, e);
        return;
    }
    if ctx.page.as_ref().is_some_and(|(current, _)| *current == page) {
        ctx.page = None;
    }
    info!("Session {} left page {}", ctx.session.id, page);
}

/// Accept both `7` and `account:7`.
fn account_key(account_id: RecordId) -> String {
    let raw = account_id.to_string();
    match raw.strip_prefix("account:") {
        Some(id) => id.to_string(),
        None => raw,
    }
}

/// Handle `join:account`. Requests for someone else's account are dropped unless super admin.
pub async fn handle_join_account(ctx: &mut ConnCtx, account_id: RecordId) {
    let account_id = account_key(account_id);
    match ctx.state.hub.join_account(ctx.session.id, &account_id).await {
        Ok(receiver) => {
            info!("Session {} watching account {}", ctx.session.id, account_id);
            ctx.account = Some((account_id, receiver));
        }
        Err(e) => warn!("join:account {} refused: {}", account_id, e),
    }
}

/// Handle `leave:account`
pub async fn handle_leave_account(ctx: &mut ConnCtx, account_id: RecordId) {
    let account_id = account_key(account_id);
    if let Err(e) = ctx.state.hub.leave_account(ctx.session.id, &account_id).await {
        warn!("leave:account {} failed: {}", account_id, e);
        return;
    }
    if ctx.account.as_ref().is_some_and(|(current, _)| *current == account_id) {
        ctx.account = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_ids_accept_the_room_prefix() {
        assert_eq!(account_key(RecordId::Number(7.into())), "7");
        assert_eq!(account_key(RecordId::Text("account:7".into())), "7");
        assert_eq!(account_key(RecordId::Text("abc".into())), "abc");
    }
}
