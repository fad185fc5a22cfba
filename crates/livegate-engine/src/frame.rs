//! Camera frame carrier and the helpers that derive per-frame inputs for
//! the decision core.

use livegate_core::BoundingBox;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One camera frame handed to [`feed`](crate::session::CaptureSession::feed).
///
/// `pixels` is the luma (Y) plane in row-major order, one byte per pixel.
/// Handing the frame to the session transfers ownership for the duration of
/// the analysis; the single-permit admission gate models the image source's
/// "signal done exactly once before the next frame" contract.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: i32,
    /// Producer timestamp, milliseconds on the producer's clock.
    pub timestamp_ms: u64,
}

/// Role a persisted frame plays in the capture evidence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRole {
    Selfie,
    Liveness,
}

/// Opaque handle to a persisted frame, assigned by the persistence
/// capability. The session tracks handles so it can release everything it
/// stored on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameHandle(Uuid);

impl FrameHandle {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Mean of the luma plane, 0–255. Computed once per frame, not per face.
pub fn mean_luminance(frame: &Frame) -> f32 {
    if frame.pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.pixels.iter().map(|&p| p as u64).sum();
    sum as f32 / frame.pixels.len() as f32
}

/// Extract the face region of the luma plane for the quality scorer.
/// The box is clamped to the frame bounds; returns the crop and its
/// dimensions, or `None` when the clamped region is empty.
pub fn crop_luma(frame: &Frame, region: &BoundingBox) -> Option<(Vec<u8>, u32, u32)> {
    let left = (region.left.max(0.0) as u32).min(frame.width);
    let top = (region.top.max(0.0) as u32).min(frame.height);
    let right = (region.right().max(0.0) as u32).min(frame.width);
    let bottom = (region.bottom().max(0.0) as u32).min(frame.height);
    if right <= left || bottom <= top {
        return None;
    }
    let (w, h) = (right - left, bottom - top);
    let mut out = Vec::with_capacity((w * h) as usize);
    for row in top..bottom {
        let start = (row * frame.width + left) as usize;
        out.extend_from_slice(&frame.pixels[start..start + w as usize]);
    }
    Some((out, w, h))
}
