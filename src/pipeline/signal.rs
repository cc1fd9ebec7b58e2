//! Lifecycle signals

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle event propagated from the root to the leaves once rows stop flowing
///
/// Every run ends with [`Signal::EndOfStream`]. A stopped run sends [`Signal::Stop`]
/// first, a cancelled run sends [`Signal::Cancel`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    EndOfStream,
    /// Abandon the run: stateful nodes discard what they hold
    Cancel,
    /// No more rows will be admitted; rows already seen are kept
    Stop,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::EndOfStream => "END_OF_STREAM",
            Signal::Cancel => "CANCEL",
            Signal::Stop => "STOP",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Cooperative cancellation flag shared between a caller and a running executor
///
/// Executors check it between rows; a row already in flight completes first.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
