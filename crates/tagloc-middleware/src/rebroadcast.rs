//! Frame-id namespacing for multi-camera setups.
//!
//! Several localizer instances may run side by side, one per camera, each
//! publishing poses in frames called `map` and `camera`. A [`FramePrefixer`]
//! rewrites those names to `<prefix>_map`, `<prefix>_camera`, … so the
//! streams can be merged downstream without collisions. A frame that already
//! equals the prefix is left alone.

use tagloc_types::PoseStamped;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePrefixer {
    prefix: String,
}

impl FramePrefixer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespaced version of `frame`.
    pub fn frame(&self, frame: &str) -> String {
        if frame == self.prefix {
            frame.to_string()
        } else {
            format!("{}_{}", self.prefix, frame)
        }
    }

    /// Rewrite both frame ids of a pose message.
    pub fn apply(&self, mut pose: PoseStamped) -> PoseStamped {
        pose.frame_id = self.frame(&pose.frame_id);
        pose.child_frame_id = self.frame(&pose.child_frame_id);
        pose
    }
}
