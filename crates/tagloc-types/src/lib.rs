use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of entries in a row-major 6×6 pose covariance block.
pub const COVARIANCE_LEN: usize = 36;

/// A 3-D vector (position or translation) in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3Msg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3Msg {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// An orientation as a unit quaternion, `(w, x, y, z)` convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionMsg {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl QuaternionMsg {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

impl Default for QuaternionMsg {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus orientation of one frame relative to another.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3Msg,
    pub orientation: QuaternionMsg,
}

/// One fiducial detection, expressed in the observing camera's frame.
///
/// `ids` holds every sub-id of a (possibly bundled) marker; order carries no
/// meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub ids: Vec<u32>,
    pub pose: Pose,
}

/// All detections produced from a single observation instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub stamp: DateTime<Utc>,
    /// Frame the detections are expressed in (the camera's optical frame).
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// A timestamped pose with covariance, as published by the localizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub child_frame_id: String,
    pub pose: Pose,
    /// Row-major 6×6 covariance. Never estimated; always zero.
    #[serde(default = "zero_covariance")]
    pub covariance: Vec<f64>,
}

impl PoseStamped {
    /// Build a message with a zeroed covariance block.
    pub fn new(
        stamp: DateTime<Utc>,
        frame_id: impl Into<String>,
        child_frame_id: impl Into<String>,
        pose: Pose,
    ) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
            child_frame_id: child_frame_id.into(),
            pose,
            covariance: zero_covariance(),
        }
    }
}

pub fn zero_covariance() -> Vec<f64> {
    vec![0.0; COVARIANCE_LEN]
}

/// Unified event wrapper for the pose bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "tagloc-runtime::node"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventPayload {
    /// A pose published on a named output channel.
    Pose { channel: String, pose: PoseStamped },
}

/// Error type shared by every tagloc crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalizerError {
    #[error("ring buffer capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("i/o error: {0}")]
    Io(String),
}
