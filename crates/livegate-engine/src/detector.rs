//! External analysis capabilities: the asynchronous face detector and the
//! optional quality-scoring model.

use std::future::Future;

use livegate_core::FaceObservation;
use thiserror::Error;

use crate::frame::Frame;

/// Failure of the external face-analysis capability. Any detector error is
/// terminal for the session: a detector erroring mid-stream means the
/// evidence collected around it has unknown integrity.
#[derive(Error, Debug, Clone)]
#[error("face detector failure: {0}")]
pub struct DetectorError(pub String);

/// Face-analysis capability.
///
/// `analyze` may return zero, one, or multiple observations per frame. The
/// returned future is awaited by the session actor while it keeps servicing
/// timers and resets, so completions can be discarded as stale; there is
/// never more than one analysis in flight per session.
pub trait FaceDetector: Send + Sync + 'static {
    fn analyze(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send;
}

/// Optional ML capability scoring a cropped face for selfie-anchor
/// suitability. Scores are in `[0, 1]`; the session averages them over a
/// rolling window before gating.
pub trait QualityScorer: Send + Sync + 'static {
    fn score(&self, face_crop: &[u8], width: u32, height: u32) -> f32;
}
