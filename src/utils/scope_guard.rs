/// Runs a closure when dropped, unless disarmed. Used to reset the sync
/// agent's remote-apply flag even when the apply callback panics.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }

    /// Consume the guard without running its closure.
    pub fn disarm(mut self) {
        self.0.take();
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runs_on_drop() {
        let fired = Cell::new(false);
        {
            let _guard = ScopeGuard::new(|| fired.set(true));
        }
        assert!(fired.get());
    }

    #[test]
    fn disarmed_guard_does_nothing() {
        let fired = Cell::new(false);
        let guard = ScopeGuard::new(|| fired.set(true));
        guard.disarm();
        assert!(!fired.get());
    }
}
