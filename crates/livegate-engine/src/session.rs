//! The capture session task and its public handle.
//!
//! All session state is owned by a single tokio task; the [`CaptureSession`]
//! handle is a clone-safe channel front end. The task multiplexes three
//! event sources: caller requests, the in-flight analysis completion, and
//! the wall-clock timers. At most one analysis is in flight at a time, and
//! every analysis carries a sequence number so a completion that arrives
//! after a reset is discarded instead of mutating fresh state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use livegate_core::{ActiveLivenessPlan, FaceObservation, FrameMeta, Hint};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::clock::Clock;
use crate::config::{ConfigError, SessionConfig};
use crate::detector::{DetectorError, FaceDetector, QualityScorer};
use crate::frame::{mean_luminance, Frame};
use crate::orchestrator::{CaptureEvent, SessionSnapshot, SessionState};
use crate::persistence::{FramePersistence, PersistenceError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session task exited")]
    ChannelClosed,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Messages sent from the handle to the session task.
enum SessionRequest {
    Feed {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<CaptureEvent>, SessionError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Hint {
        reply: oneshot::Sender<Hint>,
    },
    IsFinished {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Clone-safe handle to a capture session.
#[derive(Clone)]
pub struct CaptureSession {
    tx: mpsc::Sender<SessionRequest>,
}

impl CaptureSession {
    /// Validate the configuration and spawn the session task.
    ///
    /// Must be called from within a tokio runtime. Dropping every handle
    /// ends the task; evidence that was never handed off in a
    /// [`CaptureEvent`] is released on the way out.
    pub fn start<D, P>(
        config: SessionConfig,
        detector: D,
        persistence: P,
        scorer: Option<Arc<dyn QualityScorer>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError>
    where
        D: FaceDetector,
        P: FramePersistence,
    {
        config.validate()?;
        let plan = ActiveLivenessPlan::new(config.require_midpoint_capture, config.liveness);
        let state = SessionState::new(config, plan, Arc::new(persistence), scorer, clock.now());
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(run_session(state, Arc::new(detector), clock, rx));
        Ok(Self { tx })
    }

    /// Submit one frame and await the resulting events. Frames arriving
    /// faster than the admission interval, or while an analysis is still
    /// in flight, come back as `[Ignored]` without touching the detector.
    pub async fn feed(&self, frame: Frame) -> Result<Vec<CaptureEvent>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Feed { frame, reply })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Discard all progress and evidence and start over, counting a retry.
    /// Any in-flight analysis is discarded when it completes.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Reset { reply })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn current_hint(&self) -> Result<Hint, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Hint { reply })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn is_finished(&self) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::IsFinished { reply })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Snapshot { reply })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

type AnalysisOutput = (
    Frame,
    FrameMeta,
    Result<Vec<FaceObservation>, DetectorError>,
);

struct PendingAnalysis {
    seq: u64,
    reply: oneshot::Sender<Result<Vec<CaptureEvent>, SessionError>>,
    fut: Pin<Box<dyn Future<Output = AnalysisOutput> + Send>>,
}

async fn poll_analysis(pending: &mut Option<PendingAnalysis>) -> AnalysisOutput {
    match pending.as_mut() {
        Some(p) => p.fut.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Idle sleep when no deadline is armed.
const IDLE_TICK: Duration = Duration::from_secs(3600);

async fn run_session<D: FaceDetector>(
    mut state: SessionState,
    detector: Arc<D>,
    clock: Arc<dyn Clock>,
    mut rx: mpsc::Receiver<SessionRequest>,
) {
    let mut pending: Option<PendingAnalysis> = None;
    // Monotonic tag for analysis requests; completions that do not match
    // the expected value are stale (a reset happened mid-analysis).
    let mut next_seq: u64 = 0;
    let mut expected_seq: Option<u64> = None;

    loop {
        let sleep_for = state
            .next_deadline()
            .map(|d| d.saturating_sub(clock.now()))
            .unwrap_or(IDLE_TICK);

        tokio::select! {
            maybe_req = rx.recv() => {
                let Some(req) = maybe_req else { break };
                match req {
                    SessionRequest::Feed { frame, reply } => {
                        let now = clock.now();
                        state.check_timers(now);
                        let queued = state.take_queued_events();
                        if !queued.is_empty() {
                            let _ = reply.send(Ok(queued));
                        } else if pending.is_some() || !state.admit(now) {
                            let _ = reply.send(Ok(vec![CaptureEvent::Ignored]));
                        } else {
                            state.record_admitted(now);
                            let meta = FrameMeta {
                                width: frame.width,
                                height: frame.height,
                                rotation_degrees: frame.rotation_degrees,
                                luminance: mean_luminance(&frame),
                            };
                            // Frames that fail the cheap synchronous checks
                            // never reach the detector; the evaluator still
                            // owns the verdict ordering.
                            if !meta.is_portrait() || meta.luminance < state.config().min_luminance
                            {
                                let result = state
                                    .process_frame(&frame, meta, &[], now)
                                    .map_err(SessionError::from);
                                let _ = reply.send(result);
                            } else {
                                next_seq += 1;
                                expected_seq = Some(next_seq);
                                let detector = Arc::clone(&detector);
                                pending = Some(PendingAnalysis {
                                    seq: next_seq,
                                    reply,
                                    fut: Box::pin(async move {
                                        let result = detector.analyze(&frame).await;
                                        (frame, meta, result)
                                    }),
                                });
                            }
                        }
                    }
                    SessionRequest::Reset { reply } => {
                        expected_seq = None;
                        state.retry(clock.now());
                        let _ = reply.send(());
                    }
                    SessionRequest::Hint { reply } => {
                        state.check_timers(clock.now());
                        let _ = reply.send(state.hint());
                    }
                    SessionRequest::IsFinished { reply } => {
                        state.check_timers(clock.now());
                        let _ = reply.send(state.is_finished());
                    }
                    SessionRequest::Snapshot { reply } => {
                        state.check_timers(clock.now());
                        let _ = reply.send(state.snapshot());
                    }
                }
            }
            (frame, meta, result) = poll_analysis(&mut pending), if pending.is_some() => {
                let PendingAnalysis { seq, reply, .. } =
                    pending.take().expect("pending analysis present");
                let now = clock.now();
                state.check_timers(now);
                if expected_seq != Some(seq) {
                    tracing::debug!(session_id = %state.session_id(), seq, "discarding stale analysis completion");
                    let _ = reply.send(Ok(vec![CaptureEvent::Ignored]));
                } else {
                    expected_seq = None;
                    let response = match result {
                        Ok(faces) => state
                            .process_frame(&frame, meta, &faces, now)
                            .map_err(SessionError::from),
                        Err(err) => Ok(state.on_detector_error(err, now)),
                    };
                    let _ = reply.send(response);
                }
            }
            _ = tokio::time::sleep(sleep_for) => {
                state.check_timers(clock.now());
            }
        }
    }

    state.release_if_not_handed_off();
    tracing::info!(session_id = %state.session_id(), "session task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::frame::FrameRole;
    use crate::orchestrator::FailureReason;
    use crate::testutil::{face, frame, MemPersistence};
    use std::sync::Mutex;

    /// Detector stub: returns whatever the test last installed, after an
    /// optional delay, or the installed error.
    #[derive(Clone, Default)]
    struct StubDetector {
        faces: Arc<Mutex<Vec<FaceObservation>>>,
        delay: Option<Duration>,
        fail: Arc<Mutex<bool>>,
    }

    impl StubDetector {
        fn set_faces(&self, faces: Vec<FaceObservation>) {
            *self.faces.lock().unwrap() = faces;
        }
    }

    impl FaceDetector for StubDetector {
        async fn analyze(&self, _frame: &Frame) -> Result<Vec<FaceObservation>, DetectorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if *self.fail.lock().unwrap() {
                return Err(DetectorError("stub detector failure".into()));
            }
            Ok(self.faces.lock().unwrap().clone())
        }
    }

    fn start_session(
        config: SessionConfig,
        detector: StubDetector,
        persistence: Arc<MemPersistence>,
    ) -> CaptureSession {
        CaptureSession::start(
            config,
            detector,
            persistence,
            None,
            Arc::new(MonotonicClock::new()),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn full_capture_driven_by_hints() {
        crate::testutil::init_tracing();
        let detector = StubDetector::default();
        let persistence = Arc::new(MemPersistence::default());
        let session = start_session(SessionConfig::default(), detector.clone(), persistence.clone());

        let mut events = vec![];
        for _ in 0..200 {
            if session.is_finished().await.unwrap() {
                break;
            }
            let obs = match session.current_hint().await.unwrap() {
                Hint::LookLeft => face(45.0, 0.0),
                Hint::LookRight => face(-45.0, 0.0),
                Hint::LookUp => face(0.0, 30.0),
                _ => face(0.0, 0.0),
            };
            detector.set_faces(vec![obs]);
            events.extend(session.feed(frame()).await.unwrap());
            tokio::time::advance(Duration::from_millis(250)).await;
        }

        assert!(session.is_finished().await.unwrap());
        assert_eq!(session.current_hint().await.unwrap(), Hint::Success);
        let selfies = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::Captured { role: FrameRole::Selfie, .. }))
            .count();
        assert_eq!(selfies, 1);
        let complete = events
            .iter()
            .find_map(|e| match e {
                CaptureEvent::SessionComplete { liveness, .. } => Some(liveness.len()),
                _ => None,
            })
            .expect("session should complete");
        assert_eq!(complete, 6);
        // selfie + liveness evidence all still live, handed to the caller
        assert_eq!(persistence.live_handles(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_inside_admission_interval_are_ignored() {
        let detector = StubDetector::default();
        detector.set_faces(vec![face(0.0, 0.0)]);
        let persistence = Arc::new(MemPersistence::default());
        let session = start_session(SessionConfig::default(), detector, persistence);

        let first = session.feed(frame()).await.unwrap();
        assert!(matches!(first[0], CaptureEvent::Captured { .. }));
        // Same instant: inside the 250 ms admission window
        let second = session.feed(frame()).await.unwrap();
        assert_eq!(second, vec![CaptureEvent::Ignored]);
        tokio::time::advance(Duration::from_millis(250)).await;
        let third = session.feed(frame()).await.unwrap();
        // Past the window: the frame is analyzed again (and accumulates
        // nothing, but it is not admission-ignored — the selfie exists, so
        // a frontal face is just an out-of-band liveness frame)
        assert_eq!(third, vec![CaptureEvent::Ignored]);
        assert!(session.snapshot().await.unwrap().selfie_captured);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_frame_is_rejected_while_analysis_in_flight() {
        let detector = StubDetector {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        detector.set_faces(vec![face(0.0, 0.0)]);
        let persistence = Arc::new(MemPersistence::default());
        let config = SessionConfig {
            intra_frame_min_delay_ms: 0,
            ..Default::default()
        };
        let session = start_session(config, detector, persistence);

        let (first, second) = tokio::join!(session.feed(frame()), session.feed(frame()));
        // The second frame arrived while the first was still being
        // analyzed: single-permit admission rejects it outright.
        assert_eq!(second.unwrap(), vec![CaptureEvent::Ignored]);
        assert!(matches!(
            first.unwrap()[0],
            CaptureEvent::Captured { role: FrameRole::Selfie, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_in_flight_completion() {
        let detector = StubDetector {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        detector.set_faces(vec![face(0.0, 0.0)]);
        let persistence = Arc::new(MemPersistence::default());
        let session = start_session(SessionConfig::default(), detector, persistence.clone());

        let feed = session.feed(frame());
        let reset = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.reset().await
        };
        let (fed, reset_result) = tokio::join!(feed, reset);
        reset_result.unwrap();
        // The completion carried a perfectly good face, but it was tagged
        // with a pre-reset sequence number and must not become the anchor.
        assert_eq!(fed.unwrap(), vec![CaptureEvent::Ignored]);
        let snap = session.snapshot().await.unwrap();
        assert!(!snap.selfie_captured);
        assert_eq!(snap.capture_retries, 1);
        assert_eq!(persistence.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_timer_fires_without_further_frames() {
        let detector = StubDetector::default();
        detector.set_faces(vec![face(0.0, 0.0)]);
        let persistence = Arc::new(MemPersistence::default());
        let config = SessionConfig {
            strict_mode_timeout_ms: Some(100),
            ..Default::default()
        };
        let session = start_session(config, detector, persistence.clone());

        let events = session.feed(frame()).await.unwrap();
        assert!(matches!(events[0], CaptureEvent::Captured { .. }));

        // No more frames arrive; the wall-clock budget expires on its own.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(session.is_finished().await.unwrap());
        assert_eq!(session.current_hint().await.unwrap(), Hint::Error);

        // The terminal event is delivered on the next feed, evidence attached.
        let events = session.feed(frame()).await.unwrap();
        match &events[0] {
            CaptureEvent::SessionFailed {
                reason: FailureReason::Timeout { selfie, .. },
            } => assert!(selfie.is_some()),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(persistence.live_handles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn face_loss_timer_resets_without_further_frames() {
        let detector = StubDetector::default();
        detector.set_faces(vec![face(0.0, 0.0)]);
        let persistence = Arc::new(MemPersistence::default());
        let session = start_session(SessionConfig::default(), detector, persistence.clone());

        session.feed(frame()).await.unwrap();
        assert_eq!(persistence.live_handles(), 1);

        // The face never comes back; the 500 ms face-loss timer resets the
        // session and releases the anchor.
        tokio::time::advance(Duration::from_millis(600)).await;
        let snap = session.snapshot().await.unwrap();
        assert!(!snap.selfie_captured);
        assert!(!session.is_finished().await.unwrap());
        assert_eq!(persistence.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detector_error_fails_the_session() {
        let detector = StubDetector::default();
        *detector.fail.lock().unwrap() = true;
        let persistence = Arc::new(MemPersistence::default());
        let session = start_session(SessionConfig::default(), detector, persistence);

        let events = session.feed(frame()).await.unwrap();
        assert!(matches!(
            events[0],
            CaptureEvent::SessionFailed {
                reason: FailureReason::DetectorFailure(_)
            }
        ));
        assert!(session.is_finished().await.unwrap());
        assert_eq!(session.current_hint().await.unwrap(), Hint::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn dark_frames_skip_the_detector() {
        // A detector that panics proves the luminance short-circuit never
        // reaches it.
        struct PanickingDetector;
        impl FaceDetector for PanickingDetector {
            async fn analyze(
                &self,
                _frame: &Frame,
            ) -> Result<Vec<FaceObservation>, DetectorError> {
                panic!("detector must not run for dark frames");
            }
        }

        let persistence = Arc::new(MemPersistence::default());
        let session = CaptureSession::start(
            SessionConfig::default(),
            PanickingDetector,
            persistence,
            None,
            Arc::new(MonotonicClock::new()),
        )
        .unwrap();

        let mut dark = frame();
        dark.pixels.fill(20);
        let events = session.feed(dark).await.unwrap();
        assert_eq!(events, vec![CaptureEvent::Ignored]);
        assert_eq!(session.current_hint().await.unwrap(), Hint::NeedLight);
    }
}
