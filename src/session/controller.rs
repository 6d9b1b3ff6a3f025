//! Session controller: the control surface the UI layer drives.
//!
//! Owns the frame slot and the state cell for its whole lifetime and spawns
//! one capture loop per session. All operations are synchronous; failures the
//! capture loop handles itself (connect/read errors) never surface here, only
//! as state transitions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ConnectError, ControlError, SnapshotError};
use crate::pipeline::FrameSlot;
use crate::session::capture_loop::{CaptureLoop, RetryPolicy};
use crate::session::{SessionState, StateCell};
use crate::snapshot::{self, SnapshotFormat};
use crate::source::{self, StreamConnector, StreamEndpoint};

/// Builds a connector for an endpoint. Runs on the capture thread, so a slow
/// transport init never stalls the caller of `start`.
pub type ConnectorFactory =
    Arc<dyn Fn(&StreamEndpoint) -> Result<Box<dyn StreamConnector>, ConnectError> + Send + Sync>;

struct Worker {
    stop: Arc<AtomicBool>,
    done: flume::Receiver<()>,
    handle: thread::JoinHandle<()>,
}

pub struct SessionController {
    slot: Arc<FrameSlot>,
    states: Arc<StateCell>,
    retry: RetryPolicy,
    stop_grace: Duration,
    factory: ConnectorFactory,
    worker: Mutex<Option<Worker>>,
}

impl SessionController {
    pub fn new(retry: RetryPolicy, stop_grace: Duration) -> Self {
        Self::with_connector_factory(retry, stop_grace, Arc::new(source::connector_for))
    }

    /// Seam for tests and alternative transports.
    pub fn with_connector_factory(
        retry: RetryPolicy,
        stop_grace: Duration,
        factory: ConnectorFactory,
    ) -> Self {
        Self {
            slot: Arc::new(FrameSlot::new()),
            states: Arc::new(StateCell::new()),
            retry,
            stop_grace,
            factory,
            worker: Mutex::new(None),
        }
    }

    /// Spawn a capture loop for `endpoint`.
    ///
    /// Fails with `AlreadyRunning` unless the session is idle, stopped, or
    /// failed. A finished previous worker is joined first so endpoint
    /// resources are fully released before the new session begins.
    pub fn start(&self, endpoint: StreamEndpoint) -> Result<(), ControlError> {
        let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(prev) = guard.take() {
            if prev.handle.is_finished() {
                let _ = prev.handle.join();
            } else if !prev.stop.load(Ordering::Acquire) {
                *guard = Some(prev);
                return Err(ControlError::AlreadyRunning);
            } else {
                // Stop was requested and its grace period already elapsed.
                warn!("previous capture loop still winding down; abandoning its handle");
            }
        }

        // Fresh slot contents for the new session; the sequence counter is
        // kept so readers never observe a decreasing sequence.
        self.slot.clear();

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = flume::bounded(1);
        let publisher = self.states.publisher();
        let slot = Arc::clone(&self.slot);
        let retry = self.retry;
        let factory = Arc::clone(&self.factory);

        let handle = thread::Builder::new().name("camview-capture".into()).spawn({
            let stop = Arc::clone(&stop);
            move || match factory(&endpoint) {
                Ok(connector) => {
                    CaptureLoop::new(connector, endpoint, slot, retry, stop, publisher, done_tx)
                        .run()
                }
                Err(e) => publisher.publish(SessionState::Failed(e.to_string())),
            }
        })?;

        *guard = Some(Worker {
            stop,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    /// Signal the active capture loop to stop and wait for its teardown
    /// acknowledgment, bounded by the grace period.
    ///
    /// A loop that does not acknowledge in time is logged and abandoned, and
    /// the session is force-marked stopped; the caller is never blocked
    /// longer than the grace period. Idempotent.
    pub fn stop(&self) {
        let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        let Some(worker) = guard.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        match worker.done.recv_timeout(self.stop_grace) {
            // Either an explicit ack or the loop exiting (dropping its
            // sender) counts as clean teardown.
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!(
                    "capture loop did not acknowledge stop within {:?}; abandoning its handle",
                    self.stop_grace
                );
                // Starting a fresh generation invalidates the abandoned
                // loop's publisher before we force-mark the session stopped.
                self.states.publisher().publish(SessionState::Stopped);
            }
        }
    }

    /// Stop the current session (if any) and start a new one.
    pub fn restart(&self, endpoint: StreamEndpoint) -> Result<(), ControlError> {
        self.stop();
        self.start(endpoint)
    }

    /// Persist the newest frame under `dir`.
    pub fn snapshot(&self, dir: &Path, format: SnapshotFormat) -> Result<PathBuf, SnapshotError> {
        let Some((frame, sequence)) = self.slot.latest() else {
            return Err(SnapshotError::NoFrameAvailable);
        };
        debug!("snapshotting frame #{sequence}");
        snapshot::write_snapshot(&frame, dir, format)
    }

    pub fn current_state(&self) -> SessionState {
        self.states.get()
    }

    /// Receive every state transition from now on, in order.
    pub fn subscribe(&self) -> flume::Receiver<SessionState> {
        self.states.subscribe()
    }

    /// The slot the display pump polls. Valid for the controller's lifetime.
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReadError;
    use crate::source::{Frame, FrameStream, PixelFormat};
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TestStream {
        tag: u8,
        uri: String,
        log: EventLog,
    }

    impl FrameStream for TestStream {
        fn read_frame(&mut self, _timeout: Duration) -> Result<Frame, ReadError> {
            thread::sleep(Duration::from_millis(5));
            Ok(Frame::from_packed(
                Bytes::from(vec![self.tag; 12]),
                2,
                2,
                PixelFormat::Rgb24,
            ))
        }

        fn close(self: Box<Self>) {
            self.log.push(format!("close {}", self.uri));
        }
    }

    struct TestConnector {
        tag: u8,
        log: EventLog,
        open_count: Arc<AtomicUsize>,
    }

    impl StreamConnector for TestConnector {
        fn connect(
            &mut self,
            endpoint: &StreamEndpoint,
        ) -> Result<Box<dyn FrameStream>, ConnectError> {
            self.open_count.fetch_add(1, Ordering::SeqCst);
            self.log.push(format!("connect {}", endpoint.uri()));
            Ok(Box::new(TestStream {
                tag: self.tag,
                uri: endpoint.uri().to_string(),
                log: self.log.clone(),
            }))
        }
    }

    fn controller_with_log(tag: u8) -> (SessionController, EventLog, Arc<AtomicUsize>) {
        let log = EventLog::default();
        let opens = Arc::new(AtomicUsize::new(0));
        let factory: ConnectorFactory = {
            let log = log.clone();
            let opens = Arc::clone(&opens);
            Arc::new(move |_| {
                Ok(Box::new(TestConnector {
                    tag,
                    log: log.clone(),
                    open_count: Arc::clone(&opens),
                }) as Box<dyn StreamConnector>)
            })
        };
        let controller = SessionController::with_connector_factory(
            RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(5),
            },
            Duration::from_secs(2),
            factory,
        );
        (controller, log, opens)
    }

    fn endpoint(raw: &str) -> StreamEndpoint {
        StreamEndpoint::parse(raw, "", "")
            .unwrap()
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
    }

    fn wait_for(rx: &flume::Receiver<SessionState>, wanted: &SessionState) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(state) if state == *wanted => return,
                Ok(_) => continue,
                Err(_) => panic!("never reached state {wanted}"),
            }
        }
    }

    fn wait_for_frame(controller: &SessionController) {
        let slot = controller.frame_slot();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while slot.latest().is_none() {
            assert!(std::time::Instant::now() < deadline, "no frame arrived");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_while_streaming_is_already_running() {
        let (controller, _, opens) = controller_with_log(1);
        let events = controller.subscribe();

        controller.start(endpoint("rtsp://cam-a/")).unwrap();
        wait_for(&events, &SessionState::Streaming);

        let err = controller.start(endpoint("rtsp://cam-b/")).unwrap_err();
        assert!(matches!(err, ControlError::AlreadyRunning));

        controller.stop();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_without_a_frame_fails() {
        let (controller, _, _) = controller_with_log(1);
        let dir = tempfile::tempdir().unwrap();
        let err = controller
            .snapshot(dir.path(), SnapshotFormat::Png)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::NoFrameAvailable));
    }

    #[test]
    fn snapshot_matches_the_last_published_frame() {
        let (controller, _, _) = controller_with_log(7);
        controller.start(endpoint("rtsp://cam-a/")).unwrap();
        wait_for_frame(&controller);
        controller.stop();

        let dir = tempfile::tempdir().unwrap();
        let path = controller
            .snapshot(dir.path(), SnapshotFormat::Png)
            .unwrap();

        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [7, 7, 7]);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let (controller, _, _) = controller_with_log(1);
        controller.stop();
        controller.stop();
        assert_eq!(controller.current_state(), SessionState::Idle);
    }

    #[test]
    fn stop_then_start_releases_the_old_handle_first() {
        let (controller, log, _) = controller_with_log(1);
        let events = controller.subscribe();

        controller.start(endpoint("rtsp://cam-a/")).unwrap();
        wait_for(&events, &SessionState::Streaming);
        controller.stop();
        wait_for(&events, &SessionState::Stopped);

        controller.start(endpoint("rtsp://cam-b/")).unwrap();
        wait_for(&events, &SessionState::Streaming);
        controller.stop();

        let events = log.events();
        let close_a = events
            .iter()
            .position(|e| e == "close rtsp://cam-a/")
            .expect("old handle closed");
        let connect_b = events
            .iter()
            .position(|e| e == "connect rtsp://cam-b/")
            .expect("new endpoint connected");
        assert!(
            close_a < connect_b,
            "new endpoint was opened before the old handle was released: {events:?}"
        );
    }

    #[test]
    fn failed_connector_factory_surfaces_as_failed_state() {
        let factory: ConnectorFactory =
            Arc::new(|_| Err(ConnectError::Unreachable("no transport".into())));
        let controller = SessionController::with_connector_factory(
            RetryPolicy::default(),
            Duration::from_secs(2),
            factory,
        );
        let events = controller.subscribe();

        controller.start(endpoint("rtsp://cam-a/")).unwrap();
        let state = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(state, SessionState::Failed(_)));

        // A failed session may be started again.
        assert!(controller.current_state().can_start());
    }
}
