//! Active-liveness challenge plan: an ordered sequence of directional
//! head-pose tasks with per-direction progress tracking.
//!
//! Raw per-frame angle classification is noisy (head jitter, detector
//! jitter), so in-band frames accumulate progress through exponential
//! smoothing rather than flipping a boolean, and sustained out-of-band
//! streaks decay progress back down. Endpoint captures additionally require
//! the pose to hold for a short stability window so the persisted evidence
//! frame is not motion-blurred; midpoints capture eagerly so a continuous
//! turn is never interrupted.

use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::observation::FaceObservation;

/// Direction the subject is asked to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Left, Direction::Right, Direction::Up];

    fn index(self) -> usize {
        match self {
            Direction::Left => 0,
            Direction::Right => 1,
            Direction::Up => 2,
        }
    }
}

/// Severity stage of a directional challenge. The midpoint is a lenient
/// early checkpoint on the way to the stricter endpoint pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Midpoint,
    Endpoint,
}

/// One directional task in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub direction: Direction,
    pub stage: Stage,
}

/// Observable state of the current challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeState {
    /// No in-band frame seen yet for this challenge.
    AwaitingAngle,
    /// Progress is accumulating toward the target.
    Accumulating,
    /// Progress target reached; the stability window is still running.
    StableAtTarget,
    /// The whole plan is finished.
    Satisfied,
}

/// Tunable parameters of the liveness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessTuning {
    /// Continuous in-band time required before an endpoint may capture.
    pub stability_time_ms: u64,
    /// How far the orthogonal axis may wander while a direction is held
    /// (how much you can look up/down when asked to look left/right).
    pub orthogonal_angle_buffer: f32,
    /// Lower band edges, degrees. Upper edge is `max_angle` for all bands.
    pub midpoint_lr_angle_min: f32,
    pub endpoint_lr_angle_min: f32,
    pub midpoint_up_angle_min: f32,
    pub endpoint_up_angle_min: f32,
    pub max_angle: f32,
    /// Lower band edges are eased by this much to make entry forgiving.
    pub entry_tolerance: f32,
    /// Progress increment at the band minimum / at or beyond the target.
    pub base_increment: f32,
    pub max_increment: f32,
    /// Exponential smoothing factor applied to new progress.
    pub smoothing_alpha: f32,
    /// Progress subtracted per miss once the miss cap is reached.
    pub decay_amount: f32,
    /// Consecutive out-of-band frames before decay starts; also the cap.
    pub max_consecutive_misses: u32,
    /// Progress targets per stage.
    pub midpoint_target: f32,
    pub endpoint_target: f32,
}

impl Default for LivenessTuning {
    fn default() -> Self {
        Self {
            stability_time_ms: 150,
            orthogonal_angle_buffer: 90.0,
            midpoint_lr_angle_min: 9.0,
            endpoint_lr_angle_min: 27.0,
            midpoint_up_angle_min: 7.0,
            endpoint_up_angle_min: 17.0,
            max_angle: 90.0,
            entry_tolerance: 3.0,
            base_increment: 0.06,
            max_increment: 0.18,
            smoothing_alpha: 0.7,
            decay_amount: 0.2,
            max_consecutive_misses: 5,
            midpoint_target: 0.5,
            endpoint_target: 1.0,
        }
    }
}

/// Whether the face is turned left within the angle band, with the
/// orthogonal (vertical) axis inside the buffer.
fn is_looking_left(face: &FaceObservation, min: f32, max: f32, vertical_buffer: f32) -> bool {
    face.yaw >= min && face.yaw <= max && face.pitch.abs() < vertical_buffer
}

fn is_looking_right(face: &FaceObservation, min: f32, max: f32, vertical_buffer: f32) -> bool {
    face.yaw <= -min && face.yaw >= -max && face.pitch.abs() < vertical_buffer
}

fn is_looking_up(face: &FaceObservation, min: f32, max: f32, horizontal_buffer: f32) -> bool {
    face.pitch >= min && face.pitch <= max && face.yaw.abs() < horizontal_buffer
}

#[derive(Debug, Clone, Copy, Default)]
struct DirectionTrack {
    progress: f32,
    last_smoothed: f32,
    misses: u32,
}

/// Ordered plan of directional challenges and their progress state.
///
/// Exactly one challenge is current at a time; the index only moves
/// forward, except on [`restart`](Self::restart). Restart keeps the
/// shuffled direction order so a reset session retraces the same plan.
#[derive(Debug, Clone)]
pub struct ActiveLivenessPlan {
    tuning: LivenessTuning,
    challenges: Vec<Challenge>,
    idx: usize,
    tracks: [DirectionTrack; 3],
    stable_since: Option<Duration>,
}

impl ActiveLivenessPlan {
    /// Build a plan with a randomized direction order.
    pub fn new(require_midpoint_capture: bool, tuning: LivenessTuning) -> Self {
        let mut order = Direction::ALL;
        order.shuffle(&mut rand::thread_rng());
        Self::with_direction_order(order, require_midpoint_capture, tuning)
    }

    /// Build a plan with an explicit direction order. Used by tests and by
    /// [`new`](Self::new) after shuffling.
    pub fn with_direction_order(
        order: [Direction; 3],
        require_midpoint_capture: bool,
        tuning: LivenessTuning,
    ) -> Self {
        let challenges = order
            .iter()
            .flat_map(|&direction| {
                if require_midpoint_capture {
                    vec![
                        Challenge {
                            direction,
                            stage: Stage::Midpoint,
                        },
                        Challenge {
                            direction,
                            stage: Stage::Endpoint,
                        },
                    ]
                } else {
                    vec![Challenge {
                        direction,
                        stage: Stage::Endpoint,
                    }]
                }
            })
            .collect();
        Self {
            tuning,
            challenges,
            idx: 0,
            tracks: [DirectionTrack::default(); 3],
            stable_since: None,
        }
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    pub fn current(&self) -> Option<Challenge> {
        self.challenges.get(self.idx).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.idx >= self.challenges.len()
    }

    /// Smoothed progress of a direction, in `[0.0, 1.0]`.
    pub fn progress(&self, direction: Direction) -> f32 {
        self.tracks[direction.index()].progress
    }

    pub fn challenge_state(&self) -> ChallengeState {
        let Some(ch) = self.current() else {
            return ChallengeState::Satisfied;
        };
        let track = &self.tracks[ch.direction.index()];
        if ch.stage == Stage::Endpoint
            && track.progress >= self.tuning.endpoint_target
            && self.stable_since.is_some()
        {
            ChallengeState::StableAtTarget
        } else if track.progress > 0.0 {
            ChallengeState::Accumulating
        } else {
            ChallengeState::AwaitingAngle
        }
    }

    /// Nominal lower band edge for a challenge, before the entry tolerance.
    fn band_min(&self, ch: Challenge) -> f32 {
        match (ch.direction, ch.stage) {
            (Direction::Up, Stage::Midpoint) => self.tuning.midpoint_up_angle_min,
            (Direction::Up, Stage::Endpoint) => self.tuning.endpoint_up_angle_min,
            (_, Stage::Midpoint) => self.tuning.midpoint_lr_angle_min,
            (_, Stage::Endpoint) => self.tuning.endpoint_lr_angle_min,
        }
    }

    fn in_band(&self, ch: Challenge, face: &FaceObservation) -> bool {
        let min = self.band_min(ch) - self.tuning.entry_tolerance;
        let max = self.tuning.max_angle;
        let buffer = self.tuning.orthogonal_angle_buffer;
        match ch.direction {
            Direction::Left => is_looking_left(face, min, max, buffer),
            Direction::Right => is_looking_right(face, min, max, buffer),
            Direction::Up => is_looking_up(face, min, max, buffer),
        }
    }

    /// Magnitude of the pose angle along the challenge's axis.
    fn angle_toward(ch: Challenge, face: &FaceObservation) -> f32 {
        match ch.direction {
            Direction::Left => face.yaw,
            Direction::Right => -face.yaw,
            Direction::Up => face.pitch,
        }
    }

    /// Feed one accepted observation into the current challenge.
    ///
    /// Returns the challenge that this frame satisfied, if any; the plan has
    /// already advanced past it when this returns `Some`.
    pub fn observe(&mut self, face: &FaceObservation, now: Duration) -> Option<Challenge> {
        let ch = self.current()?;
        if !self.in_band(ch, face) {
            self.note_miss();
            return None;
        }

        let ratio = (Self::angle_toward(ch, face) / self.band_min(ch)).clamp(0.0, 1.0);
        let increment = self.tuning.base_increment
            + ratio * (self.tuning.max_increment - self.tuning.base_increment);
        let track = &mut self.tracks[ch.direction.index()];
        track.misses = 0;

        // Steeper turns progress faster; smoothing damps detector jitter.
        let new_progress = track.progress + increment;
        let alpha = self.tuning.smoothing_alpha;
        let smoothed =
            (new_progress * alpha + track.last_smoothed * (1.0 - alpha)).clamp(0.0, 1.0);
        track.progress = smoothed;
        track.last_smoothed = smoothed;

        if ch.stage == Stage::Endpoint && self.stable_since.is_none() {
            self.stable_since = Some(now);
        }

        let satisfied = match ch.stage {
            Stage::Midpoint => smoothed >= self.tuning.midpoint_target,
            Stage::Endpoint => {
                smoothed >= self.tuning.endpoint_target
                    && self
                        .stable_since
                        .map(|since| now.saturating_sub(since).as_millis() as u64
                            >= self.tuning.stability_time_ms)
                        .unwrap_or(false)
            }
        };
        if !satisfied {
            return None;
        }

        tracing::debug!(direction = ?ch.direction, stage = ?ch.stage, "challenge satisfied");
        if ch.stage == Stage::Endpoint {
            // The direction is done; a satisfied midpoint instead keeps its
            // progress so the endpoint continues accumulating mid-turn.
            self.tracks[ch.direction.index()] = DirectionTrack::default();
        }
        self.stable_since = None;
        self.idx += 1;
        Some(ch)
    }

    /// Record an out-of-band frame (wrong angle, or no qualifying face at
    /// all while the plan is active).
    ///
    /// Misses below the cap only reset the stability clock; at the cap,
    /// each further miss decays progress so an uncooperative subject loses
    /// ground instead of holding it indefinitely.
    pub fn note_miss(&mut self) {
        let Some(ch) = self.current() else {
            return;
        };
        let decay = self.tuning.decay_amount;
        let cap = self.tuning.max_consecutive_misses;
        let track = &mut self.tracks[ch.direction.index()];
        track.misses = (track.misses + 1).min(cap);
        if track.misses >= cap && track.progress > 0.0 {
            track.progress = (track.progress - decay).max(0.0);
            track.last_smoothed = track.progress;
            tracing::debug!(
                direction = ?ch.direction,
                progress = track.progress,
                "progress decayed after sustained misses"
            );
        }
        self.stable_since = None;
    }

    /// Zero all progress and counters and return to the first challenge.
    /// The direction order is preserved.
    pub fn restart(&mut self) {
        self.idx = 0;
        self.tracks = [DirectionTrack::default(); 3];
        self.stable_since = None;
    }
}
