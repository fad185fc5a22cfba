//! Shared fixtures for the engine test modules.

use std::collections::HashMap;
use std::sync::Mutex;

use livegate_core::{BoundingBox, FaceObservation, FrameMeta};

use crate::frame::{Frame, FrameHandle, FrameRole};
use crate::persistence::{FramePersistence, PersistenceError};

/// Install a log subscriber for test debugging; safe to call repeatedly.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory persistence fake that tracks live handles.
#[derive(Default)]
pub(crate) struct MemPersistence {
    stored: Mutex<HashMap<FrameHandle, FrameRole>>,
}

impl MemPersistence {
    pub(crate) fn live_handles(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

impl FramePersistence for MemPersistence {
    fn store(&self, _frame: &Frame, role: FrameRole) -> Result<FrameHandle, PersistenceError> {
        let handle = FrameHandle::new();
        self.stored.lock().unwrap().insert(handle, role);
        Ok(handle)
    }

    fn delete(&self, handle: &FrameHandle) -> Result<(), PersistenceError> {
        self.stored.lock().unwrap().remove(handle);
        Ok(())
    }
}

/// A well-lit portrait frame.
pub(crate) fn frame() -> Frame {
    Frame {
        pixels: vec![128; 480 * 640],
        width: 480,
        height: 640,
        rotation_degrees: 270,
        timestamp_ms: 0,
    }
}

/// Metadata matching [`frame`].
pub(crate) fn meta() -> FrameMeta {
    FrameMeta {
        width: 480,
        height: 640,
        rotation_degrees: 270,
        luminance: 128.0,
    }
}

/// A centered, well-sized face with the given pose, tracking id 1.
pub(crate) fn face(yaw: f32, pitch: f32) -> FaceObservation {
    FaceObservation {
        bounding_box: BoundingBox::new(140.0, 210.0, 200.0, 220.0),
        pitch,
        yaw,
        roll: 0.0,
        left_eye_open: Some(0.9),
        right_eye_open: Some(0.9),
        smile: None,
        tracking_id: Some(1),
        contour_box: Some(BoundingBox::new(140.0, 210.0, 200.0, 220.0)),
    }
}
