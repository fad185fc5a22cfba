//! Per-session capture policy.
//!
//! [`SessionState`] is a synchronous state struct: every mutation happens in
//! bounded time from either a frame's analysis result or a timer check. The
//! async plumbing around it (admission of live frames, the in-flight
//! analysis, wall-clock timers) lives in [`crate::session`], which owns one
//! `SessionState` per session task.

use std::sync::Arc;
use std::time::Duration;

use livegate_core::{
    map_hint, ActiveLivenessPlan, ChallengeState, Direction, DirectiveContext, FaceObservation,
    FrameMeta, Hint, QualityEvaluator, QualityVerdict, RejectReason, SessionStage,
};
use serde::Serialize;
use uuid::Uuid;

use crate::admission::FrameAdmission;
use crate::config::SessionConfig;
use crate::detector::{DetectorError, QualityScorer};
use crate::frame::{crop_luma, Frame, FrameHandle, FrameRole};
use crate::persistence::{FramePersistence, PersistenceError};

/// Outcome of feeding one frame. A single frame may produce several events
/// (a capture, the challenge it satisfied, and session completion).
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The frame produced no state change worth reporting.
    Ignored,
    /// A frame was persisted as capture evidence.
    Captured { role: FrameRole, handle: FrameHandle },
    /// The current directional challenge was satisfied.
    ChallengeSatisfied { direction: Direction },
    /// The plan is exhausted and all required evidence is persisted.
    /// Ownership of the handles passes to the caller.
    SessionComplete {
        selfie: FrameHandle,
        liveness: Vec<FrameHandle>,
    },
    /// Terminal failure.
    SessionFailed { reason: FailureReason },
}

/// Why a session failed terminally.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The external detector errored; collected evidence was released.
    DetectorFailure(String),
    /// The strict-mode budget expired before the plan finished. The
    /// evidence captured so far is forwarded so the caller can submit a
    /// flagged, timed-out attempt instead of discarding the work.
    Timeout {
        selfie: Option<FrameHandle>,
        liveness: Vec<FrameHandle>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Analyzing,
    Complete,
    Failed,
}

/// Serializable view of the session for progress UIs and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub is_enrollment: bool,
    pub stage: SessionStage,
    pub hint: Hint,
    pub challenge_state: ChallengeState,
    pub left_progress: f32,
    pub right_progress: f32,
    pub up_progress: f32,
    pub selfie_captured: bool,
    pub liveness_frames_captured: usize,
    pub capture_retries: u32,
}

/// All mutable state of one capture session.
pub struct SessionState {
    session_id: Uuid,
    config: SessionConfig,
    persistence: Arc<dyn FramePersistence>,
    scorer: Option<Arc<dyn QualityScorer>>,
    evaluator: QualityEvaluator,
    plan: ActiveLivenessPlan,
    admission: FrameAdmission,
    phase: Phase,
    selfie: Option<FrameHandle>,
    liveness_frames: Vec<FrameHandle>,
    last_rejection: Option<RejectReason>,
    last_valid_face_at: Option<Duration>,
    forced_failure_deadline: Option<Duration>,
    capture_retries: u32,
    /// Events produced by timer transitions, delivered with the next feed.
    queued_events: Vec<CaptureEvent>,
}

impl SessionState {
    pub fn new(
        config: SessionConfig,
        plan: ActiveLivenessPlan,
        persistence: Arc<dyn FramePersistence>,
        scorer: Option<Arc<dyn QualityScorer>>,
        now: Duration,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let forced_failure_deadline = config
            .strict_mode_timeout_ms
            .map(|ms| now + Duration::from_millis(ms));
        tracing::info!(
            session_id = %session_id,
            is_enrollment = config.is_enrollment,
            challenges = plan.challenges().len(),
            strict_mode = forced_failure_deadline.is_some(),
            "capture session started"
        );
        let admission = FrameAdmission::new(Duration::from_millis(config.intra_frame_min_delay_ms));
        let evaluator = QualityEvaluator::new(
            config.quality_thresholds(),
            config.quality_threshold,
            config.quality_history_len,
        );
        Self {
            session_id,
            config,
            persistence,
            scorer,
            evaluator,
            plan,
            admission,
            phase: Phase::Analyzing,
            selfie: None,
            liveness_frames: Vec::new(),
            last_rejection: None,
            last_valid_face_at: None,
            forced_failure_deadline,
            capture_retries: 0,
            queued_events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.phase != Phase::Analyzing
    }

    /// Whether a frame arriving now may be analyzed (advisory; the caller
    /// also rejects while an analysis is in flight).
    pub fn admit(&self, now: Duration) -> bool {
        self.admission.admit(self.phase == Phase::Analyzing, now)
    }

    pub fn record_admitted(&mut self, now: Duration) {
        self.admission.record_admitted(now);
    }

    /// Apply one frame's analysis result.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        meta: FrameMeta,
        faces: &[FaceObservation],
        now: Duration,
    ) -> Result<Vec<CaptureEvent>, PersistenceError> {
        let mut events = std::mem::take(&mut self.queued_events);
        if self.phase != Phase::Analyzing {
            if events.is_empty() {
                events.push(CaptureEvent::Ignored);
            }
            return Ok(events);
        }

        let pre_selfie = self.selfie.is_none();
        let face = match self.evaluator.evaluate(&meta, faces, pre_selfie) {
            QualityVerdict::Accept(idx) => &faces[idx],
            QualityVerdict::Reject(RejectReason::FaceChanged) => {
                // A different physical face mid-session voids everything
                // collected so far.
                tracing::warn!(session_id = %self.session_id, "face changed; resetting session");
                self.reset_progress();
                self.last_rejection = Some(RejectReason::FaceChanged);
                events.push(CaptureEvent::Ignored);
                return Ok(events);
            }
            QualityVerdict::Reject(reason) => {
                tracing::debug!(session_id = %self.session_id, ?reason, "frame rejected");
                if pre_selfie {
                    self.last_rejection = Some(reason);
                } else {
                    // Mid-liveness the direction hint stays up; the miss
                    // still counts toward decay.
                    self.plan.note_miss();
                }
                events.push(CaptureEvent::Ignored);
                return Ok(events);
            }
        };

        self.last_rejection = None;
        self.last_valid_face_at = Some(now);

        if pre_selfie {
            if let Some(reason) = self.quality_gate(frame, face) {
                self.last_rejection = Some(reason);
                events.push(CaptureEvent::Ignored);
                return Ok(events);
            }
            let handle = self.persistence.store(frame, FrameRole::Selfie)?;
            self.selfie = Some(handle);
            tracing::info!(session_id = %self.session_id, %handle, "selfie anchor captured");
            events.push(CaptureEvent::Captured {
                role: FrameRole::Selfie,
                handle,
            });
            return Ok(events);
        }

        if !self.plan.is_finished() {
            if let Some(challenge) = self.plan.observe(face, now) {
                let handle = self.persistence.store(frame, FrameRole::Liveness)?;
                self.liveness_frames.push(handle);
                tracing::info!(
                    session_id = %self.session_id,
                    direction = ?challenge.direction,
                    stage = ?challenge.stage,
                    %handle,
                    "liveness frame captured"
                );
                events.push(CaptureEvent::Captured {
                    role: FrameRole::Liveness,
                    handle,
                });
                events.push(CaptureEvent::ChallengeSatisfied {
                    direction: challenge.direction,
                });
            }
        } else if self.liveness_frames.len() < self.config.num_liveness_frames {
            // Plan done but evidence short: top up from accepted frames.
            let handle = self.persistence.store(frame, FrameRole::Liveness)?;
            self.liveness_frames.push(handle);
            events.push(CaptureEvent::Captured {
                role: FrameRole::Liveness,
                handle,
            });
        }

        if self.plan.is_finished()
            && self.liveness_frames.len() >= self.config.num_liveness_frames
        {
            if let Some(selfie) = self.selfie {
                self.phase = Phase::Complete;
                tracing::info!(
                    session_id = %self.session_id,
                    liveness_frames = self.liveness_frames.len(),
                    retries = self.capture_retries,
                    "capture session complete"
                );
                events.push(CaptureEvent::SessionComplete {
                    selfie,
                    liveness: self.liveness_frames.clone(),
                });
            }
        }

        if events.is_empty() {
            events.push(CaptureEvent::Ignored);
        }
        Ok(events)
    }

    /// Pre-anchor quality-model gate. `None` means the frame may serve as
    /// the selfie anchor.
    fn quality_gate(&mut self, frame: &Frame, face: &FaceObservation) -> Option<RejectReason> {
        let scorer = self.scorer.as_ref()?;
        let (crop, w, h) = crop_luma(frame, &face.bounding_box)?;
        match self.evaluator.record_score(scorer.score(&crop, w, h)) {
            Ok(_) => None,
            Err(reason) => {
                tracing::debug!(session_id = %self.session_id, "quality below threshold");
                Some(reason)
            }
        }
    }

    /// Terminal failure of the external detector. Evidence is released —
    /// a detector erroring mid-stream leaves its integrity unknown.
    pub fn on_detector_error(&mut self, err: DetectorError, _now: Duration) -> Vec<CaptureEvent> {
        tracing::error!(session_id = %self.session_id, error = %err, "detector failed; ending session");
        self.release_handles();
        self.phase = Phase::Failed;
        let mut events = std::mem::take(&mut self.queued_events);
        events.push(CaptureEvent::SessionFailed {
            reason: FailureReason::DetectorFailure(err.0),
        });
        events
    }

    /// Drain events produced by timer transitions since the last frame.
    pub fn take_queued_events(&mut self) -> Vec<CaptureEvent> {
        std::mem::take(&mut self.queued_events)
    }

    /// Fire any overdue wall-clock transitions. Safe to call often.
    pub fn check_timers(&mut self, now: Duration) {
        if self.phase != Phase::Analyzing {
            return;
        }

        if let Some(deadline) = self.forced_failure_deadline {
            if now >= deadline {
                if self.plan.is_finished() {
                    // The challenge work is done; only evidence top-up
                    // remains, so the budget no longer applies.
                    self.forced_failure_deadline = None;
                } else {
                    tracing::warn!(
                        session_id = %self.session_id,
                        liveness_frames = self.liveness_frames.len(),
                        "strict-mode budget expired; failing session"
                    );
                    self.phase = Phase::Failed;
                    self.queued_events.push(CaptureEvent::SessionFailed {
                        reason: FailureReason::Timeout {
                            selfie: self.selfie,
                            liveness: self.liveness_frames.clone(),
                        },
                    });
                    return;
                }
            }
        }

        if self.selfie.is_some() {
            if let Some(last) = self.last_valid_face_at {
                let limit = Duration::from_millis(self.config.no_face_reset_delay_ms);
                if now.saturating_sub(last) >= limit {
                    tracing::info!(session_id = %self.session_id, "face lost; resetting progress");
                    self.reset_progress();
                    self.last_rejection = Some(RejectReason::NoFace);
                }
            }
        }
    }

    /// Next wall-clock instant at which [`check_timers`](Self::check_timers)
    /// would act, on the injected clock's timeline.
    pub fn next_deadline(&self) -> Option<Duration> {
        if self.phase != Phase::Analyzing {
            return None;
        }
        let mut next: Option<Duration> = None;
        if !self.plan.is_finished() {
            next = self.forced_failure_deadline;
        }
        if self.selfie.is_some() {
            if let Some(last) = self.last_valid_face_at {
                let face_loss = last + Duration::from_millis(self.config.no_face_reset_delay_ms);
                next = Some(next.map_or(face_loss, |d| d.min(face_loss)));
            }
        }
        next
    }

    /// Explicit caller-requested reset: clears progress and evidence,
    /// re-arms the strict-mode budget, and counts a retry.
    pub fn retry(&mut self, now: Duration) {
        self.reset_progress();
        self.queued_events.clear();
        self.phase = Phase::Analyzing;
        self.capture_retries += 1;
        self.last_rejection = None;
        self.forced_failure_deadline = self
            .config
            .strict_mode_timeout_ms
            .map(|ms| now + Duration::from_millis(ms));
        tracing::info!(
            session_id = %self.session_id,
            retries = self.capture_retries,
            "session reset by caller"
        );
    }

    /// Zero capture progress and release all persisted evidence. The
    /// session keeps analyzing afterwards.
    fn reset_progress(&mut self) {
        self.release_handles();
        self.plan.restart();
        self.evaluator.reset();
        self.admission.reset();
        self.last_valid_face_at = None;
        self.last_rejection = None;
    }

    fn release_handles(&mut self) {
        if let Some(handle) = self.selfie.take() {
            if let Err(err) = self.persistence.delete(&handle) {
                tracing::warn!(session_id = %self.session_id, error = %err, "selfie delete failed");
            }
        }
        for handle in self.liveness_frames.drain(..) {
            if let Err(err) = self.persistence.delete(&handle) {
                tracing::warn!(session_id = %self.session_id, error = %err, "liveness delete failed");
            }
        }
    }

    /// Release evidence that was never handed off, for teardown of an
    /// abandoned session.
    pub fn release_if_not_handed_off(&mut self) {
        if self.phase == Phase::Analyzing || !self.queued_events.is_empty() {
            self.release_handles();
        }
    }

    pub fn hint(&self) -> Hint {
        let stage = match self.phase {
            Phase::Analyzing => SessionStage::Analyzing,
            Phase::Complete => SessionStage::Complete,
            Phase::Failed => SessionStage::Failed,
        };
        map_hint(&DirectiveContext {
            stage,
            selfie_captured: self.selfie.is_some(),
            rejection: self.last_rejection,
            current_direction: self.plan.current().map(|c| c.direction),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            is_enrollment: self.config.is_enrollment,
            stage: match self.phase {
                Phase::Analyzing => SessionStage::Analyzing,
                Phase::Complete => SessionStage::Complete,
                Phase::Failed => SessionStage::Failed,
            },
            hint: self.hint(),
            challenge_state: self.plan.challenge_state(),
            left_progress: self.plan.progress(Direction::Left),
            right_progress: self.plan.progress(Direction::Right),
            up_progress: self.plan.progress(Direction::Up),
            selfie_captured: self.selfie.is_some(),
            liveness_frames_captured: self.liveness_frames.len(),
            capture_retries: self.capture_retries,
        }
    }
}
