use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::auth::auth::{may_watch_account, SessionUser};
use crate::models::{
    strip_reserved_hints, ChangeEvent, ChangeKind, ChangeNotice, EditingClaim, EditingDelta, EditingTarget,
    EditorsSnapshot, ServerMessage,
};
use crate::ws::presence::{ClaimOutcome, PresenceTracker, ReleasedClaim};
use crate::ws::rooms::{RoomFrame, RoomKey, RoomRegistry};
use crate::ws::session::{Session, SessionId};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("user {user} may not watch account {account}")]
    AccountForbidden { user: String, account: String },
}

/// Result of joining a page: the presence snapshot for the joiner and its room feed.
pub struct JoinedPage {
    pub snapshot: EditorsSnapshot,
    pub receiver: broadcast::Receiver<RoomFrame>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    pub page_rooms: usize,
    pub account_rooms: usize,
    pub claims: usize,
}

struct HubState {
    sessions: HashMap<SessionId, Session>,
    rooms: RoomRegistry,
    presence: PresenceTracker,
}

/// Process-wide realtime state: sessions, rooms and editing claims.
///
/// All mutation goes through the operations below; nothing is persisted.
pub struct Hub {
    state: RwLock<HubState>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl HubState {
    fn session(&self, session_id: SessionId) -> Result<&Session, HubError> {
        self.sessions
            .get(&session_id)
            .ok_or(HubError::UnknownSession(session_id))
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Session, HubError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(HubError::UnknownSession(session_id))
    }

    fn publish_ended(&self, released: Vec<ReleasedClaim>, exclude: Option<SessionId>) {
        for ReleasedClaim { page, claim } in released {
            let delta = EditingDelta {
                page: page.clone(),
                section: claim.section,
                record_id: claim.record_id,
                user: claim.user,
            };
            self.rooms.publish(
                &RoomKey::Page(page),
                RoomFrame {
                    exclude,
                    message: Arc::new(ServerMessage::EditingEnded(delta)),
                },
            );
        }
    }

    /// Leave `page`, sweeping this session's claims there.
    fn leave_page(&mut self, session_id: SessionId, page: &str) -> bool {
        let key = RoomKey::Page(page.to_string());
        let was_member = self.rooms.leave(&key, session_id);
        let released = self.presence.sweep(session_id, Some(page));
        if !released.is_empty() {
            debug!("Swept {} claim(s) of session {} on page {}", released.len(), session_id, page);
        }
        self.publish_ended(released, Some(session_id));
        if let Ok(session) = self.session_mut(session_id) {
            if session.current_page.as_deref() == Some(page) {
                session.current_page = None;
            }
        }
        was_member
    }

    fn leave_account(&mut self, session_id: SessionId, account_id: &str) -> bool {
        let was_member = self
            .rooms
            .leave(&RoomKey::Account(account_id.to_string()), session_id);
        if let Ok(session) = self.session_mut(session_id) {
            if session.current_account.as_deref() == Some(account_id) {
                session.current_account = None;
            }
        }
        was_member
    }
}

impl Hub {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            state: RwLock::new(HubState {
                sessions: HashMap::new(),
                rooms: RoomRegistry::new(broadcast_capacity),
                presence: PresenceTracker::new(),
            }),
        }
    }

    /// Register a freshly authenticated connection.
    pub async fn connect(&self, user: SessionUser) -> Session {
        let session = Session::new(user);
        let mut state = self.state.write().await;
        state.sessions.insert(session.id, session.clone());
        info!("Session {} connected for {}", session.id, session.user.display_name);
        session
    }

    /// Enter a page room, leaving any other page first.
    ///
    /// Joining the page the session is already in only refreshes its feed.
    pub async fn join_page(&self, session_id: SessionId, page: &str) -> Result<JoinedPage, HubError> {
        let mut state = self.state.write().await;
        let previous = state.session(session_id)?.current_page.clone();
        if let Some(prev) = previous.filter(|p| p != page) {
            state.leave_page(session_id, &prev);
        }

        let receiver = state.rooms.join(RoomKey::Page(page.to_string()), session_id);
        state.session_mut(session_id)?.current_page = Some(page.to_string());
        let snapshot = EditorsSnapshot {
            page: page.to_string(),
            editors: state.presence.snapshot(page),
        };
        debug!("Session {} joined page {} ({} editor(s))", session_id, page, snapshot.editors.len());
        Ok(JoinedPage { snapshot, receiver })
    }

    /// Returns whether the session was in the room.
    pub async fn leave_page(&self, session_id: SessionId, page: &str) -> Result<bool, HubError> {
        let mut state = self.state.write().await;
        state.session(session_id)?;
        let was_member = state.leave_page(session_id, page);
        debug!("Session {} left page {}", session_id, page);
        Ok(was_member)
    }

    /// Enter an account room, leaving any other account room first.
    pub async fn join_account(
        &self,
        session_id: SessionId,
        account_id: &str,
    ) -> Result<broadcast::Receiver<RoomFrame>, HubError> {
        let mut state = self.state.write().await;
        let session = state.session(session_id)?;
        if !may_watch_account(&session.user, account_id) {
            return Err(HubError::AccountForbidden {
                user: session.user.id.clone(),
                account: account_id.to_string(),
            });
        }
        if let Some(prev) = session.current_account.clone().filter(|a| a != account_id) {
            state.leave_account(session_id, &prev);
        }
        let receiver = state
            .rooms
            .join(RoomKey::Account(account_id.to_string()), session_id);
        state.session_mut(session_id)?.current_account = Some(account_id.to_string());
        Ok(receiver)
    }

    pub async fn leave_account(&self, session_id: SessionId, account_id: &str) -> Result<bool, HubError> {
        let mut state = self.state.write().await;
        state.session(session_id)?;
        Ok(state.leave_account(session_id, account_id))
    }

    /// Record an advisory claim and tell the rest of the page.
    pub async fn start_editing(
        &self,
        session_id: SessionId,
        target: EditingTarget,
    ) -> Result<ClaimOutcome, HubError> {
        let mut state = self.state.write().await;
        let user = state.session(session_id)?.user.editor();
        let outcome = state.presence.start(
            session_id,
            user.clone(),
            &target.page,
            &target.section,
            target.record_id.clone(),
            now_ms(),
        );
        let delta = EditingDelta {
            page: target.page.clone(),
            section: target.section,
            record_id: target.record_id,
            user,
        };
        state.rooms.publish(
            &RoomKey::Page(target.page),
            RoomFrame {
                exclude: Some(session_id),
                message: Arc::new(ServerMessage::EditingStarted(delta)),
            },
        );
        Ok(outcome)
    }

    /// Release a claim. Returns whether one existed.
    pub async fn end_editing(&self, session_id: SessionId, target: EditingTarget) -> Result<bool, HubError> {
        let mut state = self.state.write().await;
        let user_id = state.session(session_id)?.user.id.clone();
        let released = state
            .presence
            .end(&user_id, &target.page, &target.section, target.record_id);
        let existed = released.is_some();
        state.publish_ended(released.into_iter().collect(), Some(session_id));
        Ok(existed)
    }

    /// Fan a client-originated change notice out to its page, skipping the origin.
    pub async fn notify_change(&self, session_id: SessionId, notice: ChangeNotice) -> Result<usize, HubError> {
        let user = {
            let state = self.state.read().await;
            state.session(session_id)?.user.display_name.clone()
        };
        Ok(self
            .broadcast(
                RoomKey::Page(notice.page),
                notice.event_type,
                user,
                notice.hints,
                Some(session_id),
            )
            .await)
    }

    /// Deliver a change event to every member of `room`, except `origin` when given.
    ///
    /// Returns the number of receivers the frame reached, origin included.
    pub async fn broadcast(
        &self,
        room: RoomKey,
        kind: ChangeKind,
        user: String,
        mut hints: Map<String, Value>,
        origin: Option<SessionId>,
    ) -> usize {
        strip_reserved_hints(&mut hints);
        let page = match &room {
            RoomKey::Page(page) => Some(page.clone()),
            RoomKey::Account(_) => None,
        };
        let event = ChangeEvent {
            kind,
            page,
            user,
            hints,
            emitted_at: now_ms(),
        };
        let state = self.state.read().await;
        let delivered = state.rooms.publish(
            &room,
            RoomFrame {
                exclude: origin,
                message: Arc::new(ServerMessage::Changed(event)),
            },
        );
        debug!("Broadcast {} to {} reached {} receiver(s)", kind, room, delivered);
        delivered
    }

    /// Drop the session, leave its rooms and sweep every claim it held.
    ///
    /// Returns the number of claims swept.
    pub async fn disconnect(&self, session_id: SessionId) -> usize {
        let mut state = self.state.write().await;
        let Some(session) = state.sessions.get(&session_id).cloned() else {
            return 0;
        };
        let before = state.presence.held_by(session_id);
        if let Some(page) = &session.current_page {
            state.leave_page(session_id, page);
        }
        if let Some(account) = &session.current_account {
            state.leave_account(session_id, account);
        }
        let remaining = state.presence.sweep(session_id, None);
        state.publish_ended(remaining, Some(session_id));
        state.sessions.remove(&session_id);
        info!("Session {} disconnected, swept {} claim(s)", session_id, before);
        before
    }

    pub async fn editors(&self, page: &str) -> Vec<EditingClaim> {
        self.state.read().await.presence.snapshot(page)
    }

    /// Remove claims older than `max_age`, announcing each as ended.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let cutoff = now_ms() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let mut state = self.state.write().await;
        let reaped = state.presence.reap_older_than(cutoff);
        let count = reaped.len();
        if count > 0 {
            warn!("Reaped {} stale editing claim(s)", count);
        }
        state.publish_ended(reaped, None);
        count
    }

    pub async fn member_count(&self, room: &RoomKey) -> usize {
        self.state.read().await.rooms.member_count(room)
    }

    pub async fn session(&self, session_id: SessionId) -> Option<Session> {
        self.state.read().await.sessions.get(&session_id).cloned()
    }

    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;
        let (page_rooms, account_rooms) = state.rooms.room_counts();
        HubStats {
            sessions: state.sessions.len(),
            page_rooms,
            account_rooms,
            claims: state.presence.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use tokio::sync::broadcast::error::TryRecvError;

    fn user(id: &str, name: &str) -> SessionUser {
        SessionUser {
            id: id.into(),
            display_name: name.into(),
            account_type: None,
            office_id: None,
        }
    }

    fn target(page: &str, section: &str, record: i64) -> EditingTarget {
        EditingTarget {
            page: page.into(),
            section: section.into(),
            record_id: Some(RecordId::Number(record.into())),
        }
    }

    /// Next frame addressed to `me`, skipping frames that exclude it.
    fn next_for(rx: &mut broadcast::Receiver<RoomFrame>, me: SessionId) -> Option<ServerMessage> {
        loop {
            match rx.try_recv() {
                Ok(frame) if frame.is_for(me) => return Some((*frame.message).clone()),
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn join_and_leave_restore_member_count() {
        let hub = Hub::new(16);
        let room = RoomKey::Page("sites".into());
        let a = hub.connect(user("1", "A")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        let before = hub.member_count(&room).await;

        let b = hub.connect(user("2", "B")).await;
        let _jb = hub.join_page(b.id, "sites").await.unwrap();
        assert_eq!(hub.member_count(&room).await, before + 1);
        assert!(hub.leave_page(b.id, "sites").await.unwrap());
        assert_eq!(hub.member_count(&room).await, before);
    }

    #[tokio::test]
    async fn joining_another_page_leaves_the_first() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let _j1 = hub.join_page(a.id, "sites").await.unwrap();
        let _j2 = hub.join_page(a.id, "drbet").await.unwrap();
        assert_eq!(hub.member_count(&RoomKey::Page("sites".into())).await, 0);
        assert_eq!(hub.member_count(&RoomKey::Page("drbet".into())).await, 1);
        assert_eq!(hub.session(a.id).await.unwrap().current_page.as_deref(), Some("drbet"));
    }

    #[tokio::test]
    async fn peer_sees_claim_and_its_sweep_on_disconnect() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let b = hub.connect(user("2", "B")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        let mut jb = hub.join_page(b.id, "sites").await.unwrap();

        hub.start_editing(a.id, target("sites", "row", 42)).await.unwrap();
        match next_for(&mut jb.receiver, b.id) {
            Some(ServerMessage::EditingStarted(delta)) => {
                assert_eq!(delta.section, "row");
                assert_eq!(delta.record_id, Some(RecordId::Number(42.into())));
                assert_eq!(delta.user.id, "1");
            }
            other => panic!("expected editing:started, got {other:?}"),
        }

        assert_eq!(hub.disconnect(a.id).await, 1);
        match next_for(&mut jb.receiver, b.id) {
            Some(ServerMessage::EditingEnded(delta)) => assert_eq!(delta.user.id, "1"),
            other => panic!("expected editing:ended, got {other:?}"),
        }
        assert!(hub.editors("sites").await.is_empty());
        assert_eq!(hub.stats().await.sessions, 1);
    }

    #[tokio::test]
    async fn sender_does_not_receive_its_own_delta() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let mut ja = hub.join_page(a.id, "sites").await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 1)).await.unwrap();
        assert!(next_for(&mut ja.receiver, a.id).is_none());
    }

    #[tokio::test]
    async fn repeated_start_keeps_a_single_claim() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 7)).await.unwrap();
        let second = hub.start_editing(a.id, target("sites", "row", 7)).await.unwrap();
        assert_eq!(second, ClaimOutcome::Refreshed);
        assert_eq!(hub.editors("sites").await.len(), 1);
    }

    #[tokio::test]
    async fn late_joiner_gets_the_current_snapshot() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 1)).await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 2)).await.unwrap();
        hub.end_editing(a.id, target("sites", "row", 1)).await.unwrap();

        let c = hub.connect(user("3", "C")).await;
        let jc = hub.join_page(c.id, "sites").await.unwrap();
        assert_eq!(jc.snapshot.editors, hub.editors("sites").await);
        assert_eq!(jc.snapshot.editors.len(), 1);
        assert_eq!(jc.snapshot.editors[0].record_id, Some(RecordId::Number(2.into())));
    }

    #[tokio::test]
    async fn change_events_stay_in_their_room_and_skip_the_origin() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let b = hub.connect(user("2", "B")).await;
        let outsider = hub.connect(user("3", "C")).await;
        let mut ja = hub.join_page(a.id, "sites").await.unwrap();
        let mut jb = hub.join_page(b.id, "sites").await.unwrap();
        let mut jo = hub.join_page(outsider.id, "settlements").await.unwrap();

        let notice = ChangeNotice {
            page: "sites".into(),
            event_type: ChangeKind::Sites,
            hints: Map::new(),
        };
        assert_eq!(hub.notify_change(a.id, notice).await.unwrap(), 2);

        assert!(next_for(&mut ja.receiver, a.id).is_none());
        match next_for(&mut jb.receiver, b.id) {
            Some(ServerMessage::Changed(event)) => {
                assert_eq!(event.kind, ChangeKind::Sites);
                assert_eq!(event.user, "A");
                assert_eq!(event.page.as_deref(), Some("sites"));
            }
            other => panic!("expected sites:changed, got {other:?}"),
        }
        assert!(next_for(&mut jo.receiver, outsider.id).is_none());
    }

    #[tokio::test]
    async fn hints_cannot_override_the_stamped_user() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "Alice")).await;
        let b = hub.connect(user("2", "Bo")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        let mut jb = hub.join_page(b.id, "sites").await.unwrap();

        let hints = serde_json::json!({"user": "Mallory", "emittedAt": 0, "page": "drbet", "id": 9});
        let notice = ChangeNotice {
            page: "sites".into(),
            event_type: ChangeKind::Sites,
            hints: hints.as_object().cloned().unwrap(),
        };
        hub.notify_change(a.id, notice).await.unwrap();

        let frame = next_for(&mut jb.receiver, b.id).unwrap();
        let wire = ServerMessage::decode(&frame.encode().unwrap()).unwrap();
        match wire {
            ServerMessage::Changed(event) => {
                assert_eq!(event.user, "Alice");
                assert_eq!(event.page.as_deref(), Some("sites"));
                assert_ne!(event.emitted_at, 0);
                assert_eq!(event.hints.get("id"), Some(&Value::from(9)));
                assert!(!event.hints.contains_key("user"));
            }
            other => panic!("expected sites:changed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_of_one_type_arrive_in_emission_order() {
        let hub = Hub::new(64);
        let b = hub.connect(user("2", "B")).await;
        let mut jb = hub.join_page(b.id, "finish").await.unwrap();
        for n in 0..10 {
            let mut hints = Map::new();
            hints.insert("seq".into(), Value::from(n));
            hub.broadcast(RoomKey::Page("finish".into()), ChangeKind::Finish, "api".into(), hints, None)
                .await;
        }
        for n in 0..10 {
            match next_for(&mut jb.receiver, b.id) {
                Some(ServerMessage::Changed(event)) => assert_eq!(event.hints["seq"], Value::from(n)),
                other => panic!("expected change #{n}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn leaving_a_page_sweeps_claims_there() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let b = hub.connect(user("2", "B")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        let mut jb = hub.join_page(b.id, "sites").await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 5)).await.unwrap();
        let _ = next_for(&mut jb.receiver, b.id);

        hub.leave_page(a.id, "sites").await.unwrap();
        assert!(matches!(next_for(&mut jb.receiver, b.id), Some(ServerMessage::EditingEnded(_))));
        assert!(hub.editors("sites").await.is_empty());
    }

    #[tokio::test]
    async fn account_rooms_are_restricted_to_their_owner() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        assert!(hub.join_account(a.id, "1").await.is_ok());
        assert!(matches!(
            hub.join_account(a.id, "2").await,
            Err(HubError::AccountForbidden { .. })
        ));

        let admin = hub
            .connect(SessionUser {
                account_type: Some("super_admin".into()),
                ..user("9", "Admin")
            })
            .await;
        let _r1 = hub.join_account(admin.id, "1").await.unwrap();
        let _r2 = hub.join_account(admin.id, "2").await.unwrap();
        assert_eq!(hub.member_count(&RoomKey::Account("1".into())).await, 1);
        assert_eq!(hub.member_count(&RoomKey::Account("2".into())).await, 1);
    }

    #[tokio::test]
    async fn reaper_ends_old_claims() {
        let hub = Hub::new(16);
        let a = hub.connect(user("1", "A")).await;
        let _ja = hub.join_page(a.id, "sites").await.unwrap();
        hub.start_editing(a.id, target("sites", "row", 1)).await.unwrap();
        assert_eq!(hub.reap_stale(Duration::from_secs(600)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(hub.reap_stale(Duration::from_millis(1)).await, 1);
        assert_eq!(hub.stats().await.claims, 0);
    }

    #[tokio::test]
    async fn operations_on_unknown_sessions_fail_softly() {
        let hub = Hub::new(16);
        let ghost = SessionId::new();
        assert!(matches!(hub.join_page(ghost, "sites").await, Err(HubError::UnknownSession(_))));
        assert_eq!(hub.disconnect(ghost).await, 0);
    }
}
