//! Per-offset cancellation flags shared between requesting and computing threads

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Maps a tile offset to the token its computations poll
///
/// A cancel issued while no computation is running stays pending until the
/// next computation for that offset observes it.
#[derive(Debug, Default)]
pub struct CancellationTable {
    tokens: Mutex<HashMap<u64, CancellationToken>>,
}

impl CancellationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that computations for `offset` stop
    pub fn cancel(&self, offset: u64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.entry(offset).or_default().cancel();
    }

    /// Token for a computation about to start on `offset`
    pub fn token(&self, offset: u64) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.entry(offset).or_default().clone()
    }

    pub fn is_cancelled(&self, offset: u64) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.get(&offset).is_some_and(CancellationToken::is_cancelled)
    }

    /// Clear an observed cancellation so later requests run normally
    pub fn reset(&self, offset: u64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.get(&offset).is_some_and(CancellationToken::is_cancelled) {
            tokens.remove(&offset);
        }
    }

    /// Drop the entry of a finished computation unless a cancel is pending
    pub fn release(&self, offset: u64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.get(&offset).is_some_and(|t| !t.is_cancelled()) {
            tokens.remove(&offset);
        }
    }

    /// Number of offsets with a live entry
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cancel_reaches_existing_token() {
        let table = CancellationTable::new();
        let token = table.token(3);
        assert!(!token.is_cancelled());
        table.cancel(3);
        assert!(token.is_cancelled());
        assert!(!table.is_cancelled(4));
    }

    #[test]
    fn test_pending_cancel_survives_until_reset() {
        let table = CancellationTable::new();
        table.cancel(1);
        assert!(table.token(1).is_cancelled());
        table.release(1);
        assert!(table.is_cancelled(1));
        table.reset(1);
        assert!(!table.is_cancelled(1));
        assert!(!table.token(1).is_cancelled());
    }

    #[test]
    fn test_release_removes_idle_entry() {
        let table = CancellationTable::new();
        let _ = table.token(9);
        assert_eq!(table.len(), 1);
        table.release(9);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_cancels() {
        let table = Arc::new(CancellationTable::new());
        let handles: Vec<_> = (0..8u64)
            .map(|offset| {
                let table = table.clone();
                thread::spawn(move || {
                    let token = table.token(offset);
                    table.cancel(offset);
                    token.is_cancelled()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(table.len(), 8);
    }
}
