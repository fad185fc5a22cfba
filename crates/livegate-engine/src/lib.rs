//! Capture session orchestration around the `livegate-core` decision logic.
//!
//! The engine owns everything time- and IO-shaped: frame admission, the
//! asynchronous face-detector integration, capture-evidence persistence,
//! wall-clock timeouts, and the per-session actor task. External concerns
//! (the ML model, the camera, storage, the clock) are injected as
//! capabilities so the whole engine runs deterministically under test.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use livegate_engine::{CaptureSession, SessionConfig, MonotonicClock};
//! # async fn example(detector: impl livegate_engine::FaceDetector,
//! #                  persistence: impl livegate_engine::FramePersistence,
//! #                  frame: livegate_engine::Frame,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let session = CaptureSession::start(
//!     SessionConfig::default(),
//!     detector,
//!     persistence,
//!     None,
//!     Arc::new(MonotonicClock::new()),
//! )?;
//! let events = session.feed(frame).await?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod clock;
pub mod config;
pub mod detector;
pub mod frame;
pub mod orchestrator;
pub mod persistence;
pub mod session;

#[cfg(test)]
mod testutil;

// The core types that appear in this crate's public signatures.
pub use livegate_core::{BoundingBox, Direction, FaceObservation, FrameMeta, Hint};

pub use clock::{Clock, MonotonicClock};
pub use config::{ConfigError, SessionConfig};
pub use detector::{DetectorError, FaceDetector, QualityScorer};
pub use frame::{Frame, FrameHandle, FrameRole};
pub use orchestrator::{CaptureEvent, FailureReason, SessionSnapshot};
pub use persistence::{FramePersistence, PersistenceError};
pub use session::{CaptureSession, SessionError};
