use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation for one running sync unit.
///
/// Checked between pages and before the soft-delete step. Clone is cheap and
/// shares state.
#[derive(Debug, Clone, Default)]
pub struct SyncCancelToken {
    cancelled: Arc<AtomicBool>,
}

impl SyncCancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True when both handles share the same flag.
    pub(crate) fn same_as(&self, other: &SyncCancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = SyncCancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(token.same_as(&clone));
        assert!(!token.same_as(&SyncCancelToken::new()));
    }
}
