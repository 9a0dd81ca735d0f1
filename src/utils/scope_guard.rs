/// Runs a closure when dropped, unless defused first.
///
/// Connection tasks hold one so that session cleanup happens even when the
/// task is aborted mid-await.
pub struct ScopeGuard<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(on_drop: F) -> Self {
        Self { on_drop: Some(on_drop) }
    }

    /// Drop the guard without running its closure.
    pub fn defuse(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}
