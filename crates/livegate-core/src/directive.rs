//! Mapping from internal session state to the user-facing hint.
//!
//! The hint is a closed enumeration decoupled from locale and rendering;
//! the presentation layer owns the actual strings. Consumers are expected
//! to sample hints at a human-readable rate (~4 Hz) — this mapper does not
//! debounce.

use serde::{Deserialize, Serialize};

use crate::liveness::Direction;
use crate::quality::RejectReason;

/// Feedback directive surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hint {
    NeedLight,
    SearchingForFace,
    MultipleFaces,
    MoveCloser,
    MoveBack,
    EnsureEntireFaceVisible,
    EnsureDeviceUpright,
    LookLeft,
    LookRight,
    LookUp,
    LookStraight,
    Processing,
    Success,
    Error,
}

/// Coarse lifecycle stage used for hint selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStage {
    /// Frames are being analyzed.
    Analyzing,
    /// Capture finished; results are being assembled or handed off.
    Processing,
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Failed,
}

/// Everything the hint decision needs, captured by value so the mapping
/// stays a pure function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectiveContext {
    pub stage: SessionStage,
    /// Whether the selfie anchor frame has been captured.
    pub selfie_captured: bool,
    /// Most recent rejection, if the last frame was rejected.
    pub rejection: Option<RejectReason>,
    /// Direction of the current liveness challenge, if the plan is active.
    pub current_direction: Option<Direction>,
}

fn rejection_hint(reason: RejectReason) -> Hint {
    match reason {
        RejectReason::LowLight => Hint::NeedLight,
        RejectReason::NoFace => Hint::SearchingForFace,
        RejectReason::MultipleFaces => Hint::MultipleFaces,
        RejectReason::FaceNotFullyVisible => Hint::EnsureEntireFaceVisible,
        RejectReason::TooFar => Hint::MoveCloser,
        RejectReason::TooClose => Hint::MoveBack,
        RejectReason::ExtremePose => Hint::LookStraight,
        RejectReason::EyesClosed => Hint::LookStraight,
        RejectReason::QualityBelowThreshold => Hint::NeedLight,
        RejectReason::DeviceNotUpright => Hint::EnsureDeviceUpright,
        RejectReason::FaceChanged => Hint::SearchingForFace,
    }
}

fn direction_hint(direction: Direction) -> Hint {
    match direction {
        Direction::Left => Hint::LookLeft,
        Direction::Right => Hint::LookRight,
        Direction::Up => Hint::LookUp,
    }
}

/// Map session state to a hint.
///
/// Before the selfie anchor exists, every rejection maps directly to its
/// hint. Once the anchor is captured, the current challenge's direction
/// wins over transient rejections so the user is not flooded with
/// conflicting feedback mid-turn.
pub fn map_hint(ctx: &DirectiveContext) -> Hint {
    match ctx.stage {
        SessionStage::Processing => Hint::Processing,
        SessionStage::Complete => Hint::Success,
        SessionStage::Failed => Hint::Error,
        SessionStage::Analyzing => {
            if ctx.selfie_captured {
                match ctx.current_direction {
                    Some(direction) => direction_hint(direction),
                    None => Hint::Processing,
                }
            } else {
                ctx.rejection
                    .map(rejection_hint)
                    .unwrap_or(Hint::SearchingForFace)
            }
        }
    }
}
