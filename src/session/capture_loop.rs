//! The capture loop: connect, stream, reconnect, stop.
//!
//! Runs on its own OS thread so blocking network reads never touch the UI
//! context. All frame handoff goes through the session's [`FrameSlot`]; all
//! state changes go through the session's `StateCell`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pipeline::FrameSlot;
use crate::session::{SessionState, StatePublisher};
use crate::source::{StreamConnector, StreamEndpoint};

/// Bounded retry policy shared between initial connect and reconnects.
///
/// The budget is deliberately not reset after a successful connect: a flapping
/// endpoint runs out of attempts instead of reconnect-storming forever.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total connection attempts before the session fails.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

pub(crate) struct CaptureLoop {
    connector: Box<dyn StreamConnector>,
    endpoint: StreamEndpoint,
    slot: Arc<FrameSlot>,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
    states: StatePublisher,
    /// Dropped when the loop exits; the controller waits on the paired
    /// receiver as the teardown acknowledgment.
    _done: flume::Sender<()>,
}

impl CaptureLoop {
    pub(crate) fn new(
        connector: Box<dyn StreamConnector>,
        endpoint: StreamEndpoint,
        slot: Arc<FrameSlot>,
        retry: RetryPolicy,
        stop: Arc<AtomicBool>,
        states: StatePublisher,
        done: flume::Sender<()>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            slot,
            retry,
            stop,
            states,
            _done: done,
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep out the backoff delay in short slices so a stop request is
    /// honored promptly even mid-backoff.
    fn sleep_backoff(&self) {
        let deadline = Instant::now() + self.retry.backoff;
        loop {
            if self.stop_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Drive the session to one of its terminal states.
    ///
    /// State machine: Connecting -> Streaming <-> Reconnecting -> Stopped,
    /// with any non-terminal state going to Failed once the attempt budget is
    /// exhausted. The stop flag is observed at every iteration boundary and a
    /// single read blocks no longer than the endpoint read timeout.
    pub(crate) fn run(mut self) {
        let mut attempts_left = self.retry.attempts;
        self.states.publish(SessionState::Connecting);

        'session: loop {
            let mut stream = loop {
                if self.stop_requested() {
                    self.states.publish(SessionState::Stopped);
                    return;
                }
                if attempts_left == 0 {
                    self.states
                        .publish(SessionState::Failed("connection attempts exhausted".into()));
                    return;
                }
                attempts_left -= 1;

                match self.connector.connect(&self.endpoint) {
                    Ok(stream) => break stream,
                    Err(e) => {
                        warn!(
                            "connect to {} failed ({} attempts left): {e}",
                            self.endpoint.display_url(),
                            attempts_left
                        );
                        if attempts_left == 0 {
                            self.states.publish(SessionState::Failed(e.to_string()));
                            return;
                        }
                        self.sleep_backoff();
                    }
                }
            };

            self.states.publish(SessionState::Streaming);

            loop {
                if self.stop_requested() {
                    stream.close();
                    self.states.publish(SessionState::Stopped);
                    return;
                }
                match stream.read_frame(self.endpoint.read_timeout) {
                    // Re-check stop before touching the slot, so a stop
                    // requested while we were blocked in the read does not
                    // leak one more frame into the next session.
                    Ok(_) if self.stop_requested() => {
                        stream.close();
                        self.states.publish(SessionState::Stopped);
                        return;
                    }
                    Ok(frame) => {
                        let sequence = self.slot.publish(frame);
                        debug!("published frame #{sequence}");
                    }
                    Err(e) => {
                        warn!("stream read failed: {e}; reconnecting");
                        stream.close();
                        self.states.publish(SessionState::Reconnecting);
                        continue 'session;
                    }
                }
            }
        }
    }
}
