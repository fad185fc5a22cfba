//! Per-frame quality gating: classifies one frame's observations against
//! static and session-relative thresholds.
//!
//! Checks run in a fixed order and the first failure wins — the ordering is
//! load-bearing for hint stability, since the rejection reason is what the
//! presentation layer shows the user.

use serde::{Deserialize, Serialize};

use crate::geometry::{viewfinder, BoundingBox};
use crate::observation::{FaceObservation, FrameMeta};

/// Why a frame was rejected as capture evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    DeviceNotUpright,
    LowLight,
    NoFace,
    MultipleFaces,
    FaceNotFullyVisible,
    TooFar,
    TooClose,
    ExtremePose,
    EyesClosed,
    QualityBelowThreshold,
    FaceChanged,
}

/// Verdict for one frame. `Accept` carries the index of the qualifying face
/// in the observation slice passed to [`QualityEvaluator::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityVerdict {
    Accept(usize),
    Reject(RejectReason),
}

/// Static thresholds for frame quality checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum mean luma (0–255) for a usable frame.
    pub min_luminance: f32,
    /// Preview zoom factor; faces outside the implied central sub-region
    /// are bystanders and ignored.
    pub viewfinder_scale: f32,
    /// Faces with a bounding box below this fraction of frame area are
    /// ignored (crowded-location noise).
    pub min_face_area_fraction: f32,
    /// Fill-ratio band for subject distance.
    pub min_fill_ratio: f32,
    pub max_fill_ratio: f32,
    /// Pose limits applied only while hunting for the selfie anchor.
    pub max_pitch: f32,
    pub max_yaw: f32,
    pub max_roll: f32,
    /// Eye-open probability below which an eye counts as closed.
    pub min_eye_open: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_luminance: 50.0,
            viewfinder_scale: 1.3,
            min_face_area_fraction: 0.03,
            min_fill_ratio: 0.10,
            max_fill_ratio: 0.30,
            max_pitch: 30.0,
            max_yaw: 15.0,
            max_roll: 30.0,
            min_eye_open: 0.3,
        }
    }
}

/// Fixed-capacity ring buffer of per-frame quality scores.
///
/// Smooths a noisy per-frame model score so a single bad frame does not
/// block capture and a single good frame does not unblock it.
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    buf: Vec<f32>,
    write_idx: usize,
    len: usize,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "score history capacity must be nonzero");
        Self {
            buf: vec![0.0; capacity],
            write_idx: 0,
            len: 0,
        }
    }

    /// Record a score, overwriting the oldest entry once full.
    pub fn push(&mut self, score: f32) {
        self.buf[self.write_idx] = score;
        self.write_idx = (self.write_idx + 1) % self.buf.len();
        self.len = (self.len + 1).min(self.buf.len());
    }

    /// Running average over the recorded scores, `None` when empty.
    pub fn average(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        Some(self.buf[..self.len.min(self.buf.len())].iter().sum::<f32>() / self.len as f32)
    }

    pub fn clear(&mut self) {
        self.write_idx = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Stateful per-session frame classifier.
///
/// Holds the rolling quality-score history and the tracking-id binding that
/// detects a different physical face appearing mid-session.
#[derive(Debug, Clone)]
pub struct QualityEvaluator {
    thresholds: QualityThresholds,
    history: ScoreHistory,
    quality_threshold: f32,
    bound_tracking_id: Option<i32>,
}

impl QualityEvaluator {
    pub fn new(thresholds: QualityThresholds, quality_threshold: f32, history_len: usize) -> Self {
        Self {
            thresholds,
            history: ScoreHistory::new(history_len),
            quality_threshold,
            bound_tracking_id: None,
        }
    }

    /// Classify one frame. `pre_selfie` enables the pose and eye checks
    /// that only apply while hunting for the selfie anchor.
    ///
    /// On `Accept`, the first tracking id seen this session is bound; a
    /// later frame carrying a different id yields `Reject(FaceChanged)`,
    /// which callers must treat as a full session reset.
    pub fn evaluate(
        &mut self,
        meta: &FrameMeta,
        faces: &[FaceObservation],
        pre_selfie: bool,
    ) -> QualityVerdict {
        use QualityVerdict::Reject;

        if !meta.is_portrait() {
            return Reject(RejectReason::DeviceNotUpright);
        }

        if meta.luminance < self.thresholds.min_luminance {
            return Reject(RejectReason::LowLight);
        }

        let view = viewfinder(meta.width, meta.height, self.thresholds.viewfinder_scale);
        let frame_area = meta.width as f32 * meta.height as f32;
        let qualifying: Vec<usize> = faces
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                let (cx, cy) = f.bounding_box.center();
                view.contains_point(cx, cy)
                    && f.bounding_box.area() / frame_area > self.thresholds.min_face_area_fraction
            })
            .map(|(i, _)| i)
            .collect();

        let idx = match qualifying.as_slice() {
            [] => return Reject(RejectReason::NoFace),
            [one] => *one,
            _ => return Reject(RejectReason::MultipleFaces),
        };
        let face = &faces[idx];

        // Without a tracking id we cannot tell this face apart from a
        // bystander's on the next frame; treat like an ambiguous scene.
        let Some(tracking_id) = face.tracking_id else {
            return Reject(RejectReason::MultipleFaces);
        };
        if let Some(bound) = self.bound_tracking_id {
            if bound != tracking_id {
                tracing::debug!(bound, observed = tracking_id, "tracking id changed");
                return Reject(RejectReason::FaceChanged);
            }
        }

        let visible_box: &BoundingBox = face.contour_box.as_ref().unwrap_or(&face.bounding_box);
        if !view.contains(visible_box) {
            return Reject(RejectReason::FaceNotFullyVisible);
        }

        let fill = face.fill_ratio(meta.width, meta.height);
        if fill < self.thresholds.min_fill_ratio {
            return Reject(RejectReason::TooFar);
        }
        if fill > self.thresholds.max_fill_ratio {
            return Reject(RejectReason::TooClose);
        }

        if pre_selfie {
            if face.pitch.abs() > self.thresholds.max_pitch
                || face.yaw.abs() > self.thresholds.max_yaw
                || face.roll.abs() > self.thresholds.max_roll
            {
                return Reject(RejectReason::ExtremePose);
            }

            // A missing probability counts as open; && rather than || so a
            // subject wearing e.g. an eyepatch can still pass.
            let left_closed = face.left_eye_open.unwrap_or(1.0) < self.thresholds.min_eye_open;
            let right_closed = face.right_eye_open.unwrap_or(1.0) < self.thresholds.min_eye_open;
            if left_closed && right_closed {
                return Reject(RejectReason::EyesClosed);
            }
        }

        if self.bound_tracking_id.is_none() {
            self.bound_tracking_id = Some(tracking_id);
            tracing::debug!(tracking_id, "bound session to face");
        }
        QualityVerdict::Accept(idx)
    }

    /// Record a per-frame quality-model score and gate on the running
    /// average. Returns `Err(QualityBelowThreshold)` while the average is
    /// still below the configured threshold.
    pub fn record_score(&mut self, score: f32) -> Result<f32, RejectReason> {
        self.history.push(score);
        let avg = self.history.average().unwrap_or(0.0);
        if avg < self.quality_threshold {
            Err(RejectReason::QualityBelowThreshold)
        } else {
            Ok(avg)
        }
    }

    pub fn bound_tracking_id(&self) -> Option<i32> {
        self.bound_tracking_id
    }

    /// Forget the score history and the face binding. Called on session
    /// reset so a returning (possibly different) subject starts clean.
    pub fn reset(&mut self) {
        self.history.clear();
        self.bound_tracking_id = None;
    }
}
