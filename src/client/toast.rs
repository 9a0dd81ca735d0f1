use std::time::Duration;

use moka::sync::Cache;

use crate::models::ChangeKind;

/// How long a sync toast stays visible.
pub const TOAST_DURATION: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    /// Dedupe key, `sync-<eventType>`
    pub id: String,
    pub message: String,
    pub duration: Duration,
}

/// Whatever renders toasts in the embedding UI.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: &Toast);
}

/// Lets at most one toast per id through while it is still on screen.
pub struct ToastDeduper {
    visible: Cache<String, ()>,
    duration: Duration,
}

impl ToastDeduper {
    pub fn new(duration: Duration) -> Self {
        Self {
            visible: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(duration)
                .build(),
            duration,
        }
    }

    pub fn toast_id(kind: ChangeKind) -> String {
        format!("sync-{kind}")
    }

    /// Show a "data changed" toast for `kind` unless one with the same id is still visible.
    ///
    /// Returns whether the notifier was called.
    pub fn offer(&self, kind: ChangeKind, user: &str, notifier: &dyn Notifier) -> bool {
        let id = Self::toast_id(kind);
        if self.visible.contains_key(&id) {
            return false;
        }
        self.visible.insert(id.clone(), ());
        notifier.notify(&Toast {
            id,
            message: format!("{user} changed the data"),
            duration: self.duration,
        });
        true
    }
}

impl Default for ToastDeduper {
    fn default() -> Self {
        Self::new(TOAST_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Toast>>);

    impl Notifier for Recorder {
        fn notify(&self, toast: &Toast) {
            self.0.lock().unwrap().push(toast.clone());
        }
    }

    #[test]
    fn a_burst_shows_one_toast_per_kind() {
        let deduper = ToastDeduper::default();
        let recorder = Recorder::default();
        for _ in 0..10 {
            deduper.offer(ChangeKind::Sites, "Park", &recorder);
        }
        deduper.offer(ChangeKind::Settlements, "Park", &recorder);

        let shown = recorder.0.lock().unwrap();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].id, "sync-sites:changed");
        assert_eq!(shown[0].message, "Park changed the data");
        assert_eq!(shown[1].id, "sync-settlements:changed");
    }

    #[test]
    fn toasts_reappear_after_they_expire() {
        let deduper = ToastDeduper::new(Duration::from_millis(50));
        let recorder = Recorder::default();
        assert!(deduper.offer(ChangeKind::Drbet, "Lee", &recorder));
        assert!(!deduper.offer(ChangeKind::Drbet, "Lee", &recorder));
        std::thread::sleep(Duration::from_millis(120));
        assert!(deduper.offer(ChangeKind::Drbet, "Lee", &recorder));
    }
}
