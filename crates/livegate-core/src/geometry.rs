//! Frame-space geometry: bounding boxes and the viewfinder sub-region.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
    }

    /// Whether `other` lies entirely within this rectangle.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Central sub-region of the frame corresponding to what the user actually
/// sees in the (zoomed-in) camera preview. Faces outside it belong to
/// bystanders and are ignored; feedback is only given on what is visible.
///
/// `scale` > 1.0 shrinks the region: a 1.3 scale yields a centered rect of
/// width/1.3 × height/1.3.
pub fn viewfinder(frame_width: u32, frame_height: u32, scale: f32) -> BoundingBox {
    let vw = frame_width as f32 / scale;
    let vh = frame_height as f32 / scale;
    BoundingBox {
        left: (frame_width as f32 - vw) / 2.0,
        top: (frame_height as f32 - vh) / 2.0,
        width: vw,
        height: vh,
    }
}
