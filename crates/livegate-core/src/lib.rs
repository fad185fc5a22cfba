//! Pure decision logic for frame-gated selfie and active-liveness capture.
//!
//! This crate holds everything that can be computed synchronously from one
//! frame's observations and the session's accumulated state: quality
//! classification, the directional-challenge state machine, and the mapping
//! to user-facing hints. It performs no IO and owns no clocks — callers
//! pass monotonic timestamps in, which keeps every decision replayable.
//!
//! The session layer (admission, capture policy, timers, the async detector
//! integration) lives in the companion `livegate-engine` crate.

pub mod directive;
pub mod geometry;
pub mod liveness;
pub mod observation;
pub mod quality;

pub use directive::{map_hint, DirectiveContext, Hint, SessionStage};
pub use geometry::{viewfinder, BoundingBox};
pub use liveness::{
    ActiveLivenessPlan, Challenge, ChallengeState, Direction, LivenessTuning, Stage,
};
pub use observation::{FaceObservation, FrameMeta};
pub use quality::{
    QualityEvaluator, QualityThresholds, QualityVerdict, RejectReason, ScoreHistory,
};
