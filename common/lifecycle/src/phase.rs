use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Uninitialized => "uninitialized",
            LifecyclePhase::Initializing => "initializing",
            LifecyclePhase::Running => "running",
            LifecyclePhase::ShuttingDown => "shutting_down",
            LifecyclePhase::Terminated => "terminated",
        }
    }

    pub(crate) fn as_gauge(&self) -> f64 {
        *self as u8 as f64
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase, readable from anywhere, that only ever moves forward.
pub(crate) struct PhaseCell {
    tx: watch::Sender<LifecyclePhase>,
}

impl PhaseCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecyclePhase::Uninitialized);
        Self { tx }
    }

    pub fn get(&self) -> LifecyclePhase {
        *self.tx.borrow()
    }

    /// Moves to `to` if it is later than the current phase. Returns the phase left behind.
    pub fn advance(&self, to: LifecyclePhase) -> Option<LifecyclePhase> {
        let mut from = None;
        self.tx.send_if_modified(|current| {
            if to > *current {
                from = Some(*current);
                *current = to;
                true
            } else {
                false
            }
        });
        from
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.tx.subscribe()
    }
}
