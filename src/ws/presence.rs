use std::collections::HashMap;

use crate::models::{EditingClaim, EditorUser, RecordId};
use crate::ws::session::SessionId;

/// Claims are keyed per user: two users on the same record coexist, one user holds at most one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ClaimKey {
    page: String,
    section: String,
    record_id: Option<RecordId>,
    user_id: String,
}

#[derive(Clone, Debug)]
struct ClaimEntry {
    session_id: SessionId,
    user: EditorUser,
    started_at: i64,
}

/// What `start` did to the claim table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Created,
    /// Same user and session re-claimed; only `started_at` moved
    Refreshed,
    /// Same user claimed from another session; the old session's claim is gone
    Replaced(SessionId),
}

/// A claim removed from the table, with the page it lived on.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleasedClaim {
    pub page: String,
    pub claim: EditingClaim,
}

/// In-memory advisory editing claims. Never blocks a write.
#[derive(Default)]
pub struct PresenceTracker {
    claims: HashMap<ClaimKey, ClaimEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        session_id: SessionId,
        user: EditorUser,
        page: &str,
        section: &str,
        record_id: Option<RecordId>,
        now_ms: i64,
    ) -> ClaimOutcome {
        let key = ClaimKey {
            page: page.to_string(),
            section: section.to_string(),
            record_id,
            user_id: user.id.clone(),
        };
        let entry = ClaimEntry { session_id, user, started_at: now_ms };
        match self.claims.insert(key, entry) {
            None => ClaimOutcome::Created,
            Some(prev) if prev.session_id == session_id => ClaimOutcome::Refreshed,
            Some(prev) => ClaimOutcome::Replaced(prev.session_id),
        }
    }

    pub fn end(
        &mut self,
        user_id: &str,
        page: &str,
        section: &str,
        record_id: Option<RecordId>,
    ) -> Option<ReleasedClaim> {
        let key = ClaimKey {
            page: page.to_string(),
            section: section.to_string(),
            record_id,
            user_id: user_id.to_string(),
        };
        self.claims.remove_entry(&key).map(|(key, entry)| release(key, entry))
    }

    /// Remove every claim held by `session_id`, optionally only on `page`.
    pub fn sweep(&mut self, session_id: SessionId, page: Option<&str>) -> Vec<ReleasedClaim> {
        self.drain_where(|key, entry| {
            entry.session_id == session_id && page.map_or(true, |p| key.page == p)
        })
    }

    /// Remove claims started before `cutoff_ms`.
    pub fn reap_older_than(&mut self, cutoff_ms: i64) -> Vec<ReleasedClaim> {
        self.drain_where(|_, entry| entry.started_at < cutoff_ms)
    }

    /// Current claims on `page`, oldest first.
    pub fn snapshot(&self, page: &str) -> Vec<EditingClaim> {
        let mut claims: Vec<EditingClaim> = self
            .claims
            .iter()
            .filter(|(key, _)| key.page == page)
            .map(|(key, entry)| to_claim(key, entry))
            .collect();
        claims.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.user.id.cmp(&b.user.id))
        });
        claims
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn held_by(&self, session_id: SessionId) -> usize {
        self.claims.values().filter(|e| e.session_id == session_id).count()
    }

    fn drain_where<F>(&mut self, mut pred: F) -> Vec<ReleasedClaim>
    where
        F: FnMut(&ClaimKey, &ClaimEntry) -> bool,
    {
        let keys: Vec<ClaimKey> = self
            .claims
            .iter()
            .filter(|(key, entry)| pred(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        let mut released: Vec<ReleasedClaim> = keys
            .into_iter()
            .filter_map(|key| self.claims.remove_entry(&key))
            .map(|(key, entry)| release(key, entry))
            .collect();
        released.sort_by_key(|r| r.claim.started_at);
        released
    }
}

fn to_claim(key: &ClaimKey, entry: &ClaimEntry) -> EditingClaim {
    EditingClaim {
        section: key.section.clone(),
        record_id: key.record_id.clone(),
        user: entry.user.clone(),
        started_at: entry.started_at,
    }
}

fn release(key: ClaimKey, entry: ClaimEntry) -> ReleasedClaim {
    let claim = to_claim(&key, &entry);
    ReleasedClaim { page: key.page, claim }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> EditorUser {
        EditorUser { id: id.into(), display_name: format!("user-{id}") }
    }

    #[test]
    fn restarting_the_same_claim_keeps_one_entry() {
        let mut tracker = PresenceTracker::new();
        let s = SessionId::new();
        let rid = Some(RecordId::Number(42.into()));
        assert_eq!(tracker.start(s, user("a"), "sites", "row", rid.clone(), 10), ClaimOutcome::Created);
        assert_eq!(tracker.start(s, user("a"), "sites", "row", rid, 20), ClaimOutcome::Refreshed);

        let snapshot = tracker.snapshot("sites");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].started_at, 20);
    }

    #[test]
    fn different_users_coexist_on_one_record() {
        let mut tracker = PresenceTracker::new();
        tracker.start(SessionId::new(), user("a"), "sites", "row", Some(RecordId::Number(1.into())), 1);
        tracker.start(SessionId::new(), user("b"), "sites", "row", Some(RecordId::Number(1.into())), 2);
        let snapshot = tracker.snapshot("sites");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user.id, "a");
        assert_eq!(snapshot[1].user.id, "b");
    }

    #[test]
    fn a_second_tab_of_the_same_user_replaces_the_claim() {
        let mut tracker = PresenceTracker::new();
        let (tab1, tab2) = (SessionId::new(), SessionId::new());
        tracker.start(tab1, user("a"), "drbet", "cell", None, 1);
        assert_eq!(tracker.start(tab2, user("a"), "drbet", "cell", None, 2), ClaimOutcome::Replaced(tab1));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.sweep(tab1, None).is_empty());
        assert_eq!(tracker.sweep(tab2, None).len(), 1);
    }

    #[test]
    fn end_removes_only_the_named_claim() {
        let mut tracker = PresenceTracker::new();
        let s = SessionId::new();
        tracker.start(s, user("a"), "sites", "row", Some(RecordId::Number(1.into())), 1);
        tracker.start(s, user("a"), "sites", "row", Some(RecordId::Number(2.into())), 1);
        let released = tracker.end("a", "sites", "row", Some(RecordId::Number(1.into()))).unwrap();
        assert_eq!(released.page, "sites");
        assert_eq!(tracker.len(), 1);
        assert!(tracker.end("a", "sites", "row", Some(RecordId::Number(1.into()))).is_none());
    }

    #[test]
    fn sweep_can_be_limited_to_one_page() {
        let mut tracker = PresenceTracker::new();
        let s = SessionId::new();
        tracker.start(s, user("a"), "sites", "row", None, 1);
        tracker.start(s, user("a"), "finish", "row", None, 2);
        let released = tracker.sweep(s, Some("sites"));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].page, "sites");
        assert_eq!(tracker.held_by(s), 1);
    }

    #[test]
    fn reaping_drops_only_old_claims() {
        let mut tracker = PresenceTracker::new();
        tracker.start(SessionId::new(), user("a"), "sites", "row", None, 100);
        tracker.start(SessionId::new(), user("b"), "sites", "row", None, 900);
        let reaped = tracker.reap_older_than(500);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].claim.user.id, "a");
        assert_eq!(tracker.snapshot("sites").len(), 1);
    }

    #[test]
    fn snapshots_are_scoped_to_their_page() {
        let mut tracker = PresenceTracker::new();
        tracker.start(SessionId::new(), user("a"), "sites", "row", None, 1);
        assert!(tracker.snapshot("settlements").is_empty());
        assert!(!tracker.is_empty());
    }
}
