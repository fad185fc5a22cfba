//! Per-frame input contract: what the external face-analysis capability
//! reports for one camera frame.

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One detected face in one frame, as reported by the external detector.
///
/// Euler angle conventions follow the ML detector: positive `yaw` means the
/// head is turned to the subject's left, negative to the right; positive
/// `pitch` means looking up; `roll` is in-plane tilt. All angles in degrees.
///
/// Optional fields are optional at the detector level — classification may
/// be disabled or inconclusive for a given frame. A missing eye-open
/// probability is treated as "open" downstream, a missing tracking id
/// disqualifies the face, and the contour box falls back to the bounding
/// box for visibility checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Face bounding box in frame pixel space.
    pub bounding_box: BoundingBox,
    /// Head rotation about the x-axis (degrees, positive = up).
    pub pitch: f32,
    /// Head rotation about the y-axis (degrees, positive = subject's left).
    pub yaw: f32,
    /// Head rotation about the z-axis (degrees).
    pub roll: f32,
    /// Probability the left eye is open, if classified.
    pub left_eye_open: Option<f32>,
    /// Probability the right eye is open, if classified.
    pub right_eye_open: Option<f32>,
    /// Probability the subject is smiling, if classified.
    pub smile: Option<f32>,
    /// Detector-assigned id, stable across frames for the same physical face.
    pub tracking_id: Option<i32>,
    /// Tight bounds of the landmark contour mesh. Contours can extend past
    /// the bounding box, so "entire face visible" checks prefer this.
    pub contour_box: Option<BoundingBox>,
}

impl FaceObservation {
    /// Fill ratio: fraction of the frame occupied by the bounding box.
    /// Proxy for subject-to-camera distance.
    pub fn fill_ratio(&self, frame_width: u32, frame_height: u32) -> f32 {
        self.bounding_box.area() / (frame_width as f32 * frame_height as f32)
    }
}

/// Frame-level metadata computed once per frame, not per face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    /// Sensor-to-display rotation in degrees. Portrait capture is 270 on
    /// the front camera; anything else means the device is not upright.
    pub rotation_degrees: i32,
    /// Mean of the luma plane, 0–255.
    pub luminance: f32,
}

impl FrameMeta {
    pub fn is_portrait(&self) -> bool {
        self.rotation_degrees == 270
    }
}
