//! Frame persistence capability: where capture evidence is stored is the
//! embedding application's concern (files, encrypted blobs, memory).

use thiserror::Error;

use crate::frame::{Frame, FrameHandle, FrameRole};

#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("failed to store {role:?} frame: {message}")]
    Store { role: FrameRole, message: String },
    #[error("failed to delete frame {handle}: {message}")]
    Delete {
        handle: FrameHandle,
        message: String,
    },
}

/// Storage capability for capture evidence.
///
/// The session is the only owner of the handles it receives: it deletes
/// them on reset and hands them off exactly once on completion. `delete`
/// of an already-deleted handle should be treated as success by
/// implementations, since resets may race external cleanup.
pub trait FramePersistence: Send + Sync + 'static {
    fn store(&self, frame: &Frame, role: FrameRole) -> Result<FrameHandle, PersistenceError>;
    fn delete(&self, handle: &FrameHandle) -> Result<(), PersistenceError>;
}

impl<P: FramePersistence + ?Sized> FramePersistence for std::sync::Arc<P> {
    fn store(&self, frame: &Frame, role: FrameRole) -> Result<FrameHandle, PersistenceError> {
        (**self).store(frame, role)
    }

    fn delete(&self, handle: &FrameHandle) -> Result<(), PersistenceError> {
        (**self).delete(handle)
    }
}
