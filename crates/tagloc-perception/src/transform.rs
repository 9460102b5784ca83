//! Transform Frame (TF) tree.
//!
//! Maintains a graph of named reference frames and the rigid transforms that
//! relate them, plus conversions between wire [`Pose`] messages and
//! [`Isometry3`]. Given any two frame names the tree composes the chain of
//! transforms between them via BFS.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::{Isometry3, Vector3};
//! use tagloc_perception::transform::FrameTree;
//!
//! let mut tf = FrameTree::new();
//! tf.set_transform("map", "camera", Isometry3::translation(1.0, 0.0, 0.0));
//! tf.set_transform("map", "car", Isometry3::translation(0.0, 2.0, 0.0));
//!
//! // Edges may be walked backwards: camera → map → car.
//! let t = tf.lookup("camera", "car").unwrap();
//! assert!((t.translation.vector - Vector3::new(-1.0, 2.0, 0.0)).norm() < 1e-12);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use tagloc_types::{Pose, QuaternionMsg, Vector3Msg};

/// Quaternions shorter than this are treated as "no rotation given".
const MIN_QUATERNION_NORM: f64 = 1e-12;

// ────────────────────────────────────────────────────────────────────────────
// Message conversions
// ────────────────────────────────────────────────────────────────────────────

/// Convert a wire pose into an isometry.
///
/// Non-unit quaternions are normalized; a zero quaternion becomes identity.
pub fn isometry_from_pose(pose: &Pose) -> Isometry3<f64> {
    let o = pose.orientation;
    let q = Quaternion::new(o.w, o.x, o.y, o.z);
    let rotation = if q.norm() > MIN_QUATERNION_NORM {
        UnitQuaternion::from_quaternion(q)
    } else {
        UnitQuaternion::identity()
    };
    let p = pose.position;
    Isometry3::from_parts(Translation3::new(p.x, p.y, p.z), rotation)
}

/// Convert an isometry into a wire pose, `(w, x, y, z)` orientation.
pub fn pose_from_isometry(iso: &Isometry3<f64>) -> Pose {
    let t = iso.translation.vector;
    let q = iso.rotation.quaternion();
    Pose {
        position: Vector3Msg::new(t.x, t.y, t.z),
        orientation: QuaternionMsg::new(q.w, q.i, q.j, q.k),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameTree
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the transforms that relate them.
///
/// `set_transform(parent, child, T)` stores `T` as the pose of `child` in
/// `parent`, i.e. it maps points expressed in `child` into `parent`. The
/// inverse edge is stored alongside, so lookups may traverse either way.
#[derive(Debug, Default)]
pub struct FrameTree {
    /// `edges[from][to]` maps points in `to` into `from`.
    edges: HashMap<String, HashMap<String, Isometry3<f64>>>,
}

impl FrameTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` in `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Isometry3<f64>) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), transform.inverse());
    }

    /// Compose the transform that maps points in `target_frame` into
    /// `source_frame`.
    ///
    /// Returns `None` if the frames are not connected.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Isometry3<f64>> {
        if source_frame == target_frame {
            return Some(Isometry3::identity());
        }

        let mut queue: VecDeque<(&str, Isometry3<f64>)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        queue.push_back((source_frame, Isometry3::identity()));
        visited.insert(source_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated * edge;
                if next == target_frame {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }
        None
    }

    /// Whether `frame` appears in any stored transform.
    pub fn contains(&self, frame: &str) -> bool {
        self.edges.contains_key(frame)
    }

    /// Number of known frames.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
