//! Session lifecycle: the capture state machine and its controller.

pub mod capture_loop;
pub mod controller;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{debug, info};

pub use capture_loop::RetryPolicy;
pub use controller::SessionController;

/// Lifecycle state of one stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
    Failed(String),
}

impl SessionState {
    /// A new capture loop may only be started from these states.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Failed(_)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Current state plus ordered fan-out to subscribers.
///
/// Every transition is delivered to every subscriber, not just the latest
/// state, so the UI can show "reconnecting" instead of jumping straight from
/// streaming to failed.
pub(crate) struct StateCell {
    current: ArcSwap<SessionState>,
    subscribers: Mutex<Vec<flume::Sender<SessionState>>>,
    /// Bumped on every `start`; publishes from an older capture loop (one
    /// abandoned after a stop-grace timeout) are discarded.
    generation: AtomicU64,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(SessionState::Idle),
            subscribers: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a new publish generation and hand out its publisher.
    pub(crate) fn publisher(self: &Arc<Self>) -> StatePublisher {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        StatePublisher {
            cell: Arc::clone(self),
            generation,
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        self.current.load().as_ref().clone()
    }

    /// Store and fan out a transition. The subscriber lock keeps deliveries
    /// ordered when the loop thread and the controller publish concurrently.
    pub(crate) fn publish(&self, next: SessionState) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        info!("session state: {next}");
        self.current.store(Arc::new(next.clone()));
        subscribers.retain(|tx| tx.send(next.clone()).is_ok());
    }

    pub(crate) fn subscribe(&self) -> flume::Receiver<SessionState> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

/// Publishing handle bound to one capture-loop generation.
pub(crate) struct StatePublisher {
    cell: Arc<StateCell>,
    generation: u64,
}

impl StatePublisher {
    pub(crate) fn publish(&self, next: SessionState) {
        if self.cell.generation.load(Ordering::Acquire) != self.generation {
            debug!("dropping state publish from stale capture loop: {next}");
            return;
        }
        self.cell.publish(next);
    }
}
