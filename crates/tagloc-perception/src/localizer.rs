//! Pose Fusion Engine.
//!
//! Localizes a moving camera against a fixed origin marker and re-expresses
//! every other tracked marker in the origin's frame.
//!
//! Each [`DetectionBatch`] is handled in one synchronous call:
//!
//! 1. Every detection's id-set is canonicalized.
//! 2. Detections of the origin marker are pushed into a fixed-capacity
//!    [`RingBuffer`].
//! 3. If the ring is still empty the batch produces nothing at all.
//! 4. Otherwise the buffered observations are averaged, the mean rotation is
//!    projected onto SO(3) and inverted, giving the camera pose `T_cam`.
//! 5. `T_cam` is emitted on the camera channel, and `T_cam · T_marker` on the
//!    channel of every registered marker seen in the batch.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tagloc_perception::localizer::{Localizer, LocalizerConfig};
//! use tagloc_perception::registry::TrackedMarkerRegistry;
//! use tagloc_types::{Detection, DetectionBatch, Pose, QuaternionMsg, Vector3Msg};
//!
//! let registry = TrackedMarkerRegistry::from_entries([("5", "car_pose")]).unwrap();
//! let mut localizer = Localizer::new(LocalizerConfig::default(), registry).unwrap();
//!
//! let detection = |id, x, y| Detection {
//!     ids: vec![id],
//!     pose: Pose {
//!         position: Vector3Msg::new(x, y, 0.0),
//!         orientation: QuaternionMsg::identity(),
//!     },
//! };
//! let batch = DetectionBatch {
//!     stamp: Utc::now(),
//!     frame_id: "camera".to_string(),
//!     detections: vec![detection(0, 1.0, 0.0), detection(5, 0.0, 1.0)],
//! };
//!
//! let out = localizer.process(&batch).unwrap();
//! assert!((out.camera.message.pose.position.x + 1.0).abs() < 1e-9);
//! assert_eq!(out.markers[0].channel, "car_pose");
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use nalgebra::Isometry3;
use tagloc_types::{DetectionBatch, LocalizerError, PoseStamped};
use tracing::{debug, info, instrument};

use crate::alignment::{Observation, average, camera_pose};
use crate::marker::{canonicalize, normalize_key};
use crate::registry::TrackedMarkerRegistry;
use crate::ring::RingBuffer;
use crate::transform::{isometry_from_pose, pose_from_isometry};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Construction-time settings for [`Localizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizerConfig {
    /// Canonical key of the origin marker.
    pub origin_key: String,
    /// Channel the camera pose is published on.
    pub camera_channel: String,
    /// Frame every published pose is expressed in.
    pub frame_id: String,
    /// Child frame of the camera pose.
    pub camera_frame: String,
    /// Number of origin observations averaged together.
    pub buffer_size: usize,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            origin_key: "0".to_string(),
            camera_channel: "camera_pose".to_string(),
            frame_id: "map".to_string(),
            camera_frame: "camera".to_string(),
            buffer_size: 10,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

/// One pose ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPose {
    /// Output channel name.
    pub channel: String,
    /// Pose of `message.child_frame_id` in `message.frame_id`.
    pub transform: Isometry3<f64>,
    pub message: PoseStamped,
}

/// Everything a localized batch publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Localization {
    /// Observer pose in the origin frame.
    pub camera: PublishedPose,
    /// Registered markers seen in the batch, ordered by canonical key.
    pub markers: Vec<PublishedPose>,
}

impl Localization {
    /// Camera pose first, then markers.
    pub fn iter(&self) -> impl Iterator<Item = &PublishedPose> {
        std::iter::once(&self.camera).chain(self.markers.iter())
    }

    /// Number of messages, camera included.
    pub fn len(&self) -> usize {
        1 + self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Localizer
// ────────────────────────────────────────────────────────────────────────────

/// The fusion engine. Owns the origin ring buffer exclusively.
#[derive(Debug)]
pub struct Localizer {
    config: LocalizerConfig,
    registry: TrackedMarkerRegistry,
    ring: RingBuffer<Observation>,
}

impl Localizer {
    /// Create an engine with an empty ring.
    ///
    /// The origin key is normalized, so `"2,1"` matches detections of `[1, 2]`.
    ///
    /// # Errors
    ///
    /// - [`LocalizerError::InvalidCapacity`] if `buffer_size` is zero.
    /// - [`LocalizerError::InvalidConfig`] if the origin key is empty or not a
    ///   list of integer ids.
    pub fn new(mut config: LocalizerConfig, registry: TrackedMarkerRegistry) -> Result<Self, LocalizerError> {
        let ring = RingBuffer::new(config.buffer_size)?;
        config.origin_key = normalize_key(&config.origin_key)?;
        Ok(Self {
            config,
            registry,
            ring,
        })
    }

    pub fn config(&self) -> &LocalizerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TrackedMarkerRegistry {
        &self.registry
    }

    /// `true` once at least one origin observation has been buffered.
    pub fn is_localized(&self) -> bool {
        !self.ring.is_empty()
    }

    /// Number of buffered origin observations.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Current camera pose from the buffered observations, if any.
    pub fn camera_estimate(&self) -> Option<Isometry3<f64>> {
        let (mean_rotation, mean_translation) = average(self.ring.iter())?;
        Some(camera_pose(&mean_rotation, &mean_translation))
    }

    /// Run one detection batch through the engine.
    ///
    /// Returns `None` while the origin has never been observed; that is the
    /// normal "not yet localized" state, not an error.
    #[instrument(skip_all, fields(detections = batch.detections.len()))]
    pub fn process(&mut self, batch: &DetectionBatch) -> Option<Localization> {
        let mut tracked: BTreeMap<String, Isometry3<f64>> = BTreeMap::new();

        for detection in &batch.detections {
            let key = canonicalize(&detection.ids);
            let local = isometry_from_pose(&detection.pose);

            if key == self.config.origin_key {
                self.ring.push(Observation::from_isometry(&local));
            }
            if self.registry.contains(&key) {
                // Later detections of the same marker win.
                tracked.insert(key, local);
            }
        }

        let Some(cam) = self.camera_estimate() else {
            debug!(skipped = tracked.len(), "origin not observed yet; batch dropped");
            return None;
        };

        let camera = PublishedPose {
            channel: self.config.camera_channel.clone(),
            transform: cam,
            message: PoseStamped::new(
                batch.stamp,
                self.config.frame_id.as_str(),
                self.config.camera_frame.as_str(),
                pose_from_isometry(&cam),
            ),
        };

        let markers = tracked
            .into_iter()
            .filter_map(|(key, local)| {
                let channel = self.registry.channel_for(&key)?;
                let transform = cam * local;
                Some(PublishedPose {
                    channel: channel.to_string(),
                    transform,
                    message: PoseStamped::new(
                        batch.stamp,
                        self.config.frame_id.as_str(),
                        channel,
                        pose_from_isometry(&transform),
                    ),
                })
            })
            .collect::<Vec<_>>();

        debug!(
            buffered = self.ring.len(),
            markers = markers.len(),
            "batch localized"
        );
        Some(Localization { camera, markers })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SharedLocalizer
// ────────────────────────────────────────────────────────────────────────────

/// A [`Localizer`] behind a single mutex, for hosts that dispatch batches
/// from more than one thread.
///
/// The lock is held for the whole of [`Localizer::process`], so ring mutation,
/// averaging and alignment for one batch never interleave with another.
#[derive(Debug, Clone)]
pub struct SharedLocalizer {
    inner: Arc<Mutex<Localizer>>,
}

impl SharedLocalizer {
    pub fn new(localizer: Localizer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(localizer)),
        }
    }

    pub fn process(&self, batch: &DetectionBatch) -> Option<Localization> {
        let was_localized;
        let result = {
            let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            was_localized = guard.is_localized();
            guard.process(batch)
        };
        if !was_localized && result.is_some() {
            info!("origin marker acquired; camera localized");
        }
        result
    }

    pub fn is_localized(&self) -> bool {
        self.with(|l| l.is_localized())
    }

    pub fn buffered(&self) -> usize {
        self.with(|l| l.buffered())
    }

    /// Run `f` with the engine locked.
    pub fn with<R>(&self, f: impl FnOnce(&Localizer) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use nalgebra::{UnitQuaternion, Vector3};
    use tagloc_types::{Detection, Pose, QuaternionMsg, Vector3Msg};

    fn detection(ids: &[u32], x: f64, y: f64, z: f64) -> Detection {
        Detection {
            ids: ids.to_vec(),
            pose: Pose {
                position: Vector3Msg::new(x, y, z),
                orientation: QuaternionMsg::identity(),
            },
        }
    }

    fn batch(detections: Vec<Detection>) -> DetectionBatch {
        DetectionBatch {
            stamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            frame_id: "camera".to_string(),
            detections,
        }
    }

    fn localizer(buffer_size: usize, entries: &[(&str, &str)]) -> Localizer {
        let registry = TrackedMarkerRegistry::from_entries(entries.iter().copied()).unwrap();
        let config = LocalizerConfig {
            buffer_size,
            ..LocalizerConfig::default()
        };
        Localizer::new(config, registry).unwrap()
    }

    fn assert_identity(q: &QuaternionMsg) {
        assert_relative_eq!(q.w.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(q.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(q.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(q.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let err = Localizer::new(
            LocalizerConfig {
                buffer_size: 0,
                ..LocalizerConfig::default()
            },
            TrackedMarkerRegistry::new(),
        )
        .unwrap_err();
        assert_eq!(err, LocalizerError::InvalidCapacity(0));
    }

    #[test]
    fn empty_origin_key_is_rejected() {
        let err = Localizer::new(
            LocalizerConfig {
                origin_key: String::new(),
                ..LocalizerConfig::default()
            },
            TrackedMarkerRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LocalizerError::InvalidConfig(_)));
    }

    #[test]
    fn huge_buffer_size_builds_without_allocating() {
        let mut loc = localizer(usize::MAX, &[]);
        let out = loc.process(&batch(vec![detection(&[0], 1.0, 0.0, 0.0)]));
        assert!(out.is_some());
        assert_eq!(loc.buffered(), 1);
    }

    #[test]
    fn no_output_before_origin_is_seen() {
        let mut loc = localizer(3, &[("5", "car")]);
        let out = loc.process(&batch(vec![detection(&[5], 0.0, 1.0, 0.0)]));
        assert!(out.is_none());
        assert!(!loc.is_localized());
        assert!(loc.camera_estimate().is_none());
    }

    #[test]
    fn scenario_single_slot_buffer() {
        let mut loc = localizer(1, &[("5", "car")]);
        let out = loc
            .process(&batch(vec![
                detection(&[0], 1.0, 0.0, 0.0),
                detection(&[5], 0.0, 1.0, 0.0),
            ]))
            .expect("origin present");

        let cam = &out.camera.message;
        assert_eq!(out.camera.channel, "camera_pose");
        assert_eq!(cam.frame_id, "map");
        assert_eq!(cam.child_frame_id, "camera");
        assert_relative_eq!(cam.pose.position.x, -1.0, epsilon = 1e-9);
        assert_relative_eq!(cam.pose.position.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(cam.pose.position.z, 0.0, epsilon = 1e-9);
        assert_identity(&cam.pose.orientation);

        assert_eq!(out.markers.len(), 1);
        let car = &out.markers[0];
        assert_eq!(car.channel, "car");
        assert_relative_eq!(car.message.pose.position.x, -1.0, epsilon = 1e-9);
        assert_relative_eq!(car.message.pose.position.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(car.message.pose.position.z, 0.0, epsilon = 1e-9);
        assert_identity(&car.message.pose.orientation);
    }

    #[test]
    fn scenario_three_slot_buffer_averages_translation() {
        let mut loc = localizer(3, &[]);
        let mut last = None;
        for x in [0.0, 2.0, 4.0] {
            last = loc.process(&batch(vec![detection(&[0], x, 0.0, 0.0)]));
        }
        let out = last.expect("localized");
        assert_eq!(loc.buffered(), 3);
        assert_relative_eq!(out.camera.message.pose.position.x, -2.0, epsilon = 1e-9);
        assert!(out.markers.is_empty());
    }

    #[test]
    fn old_observations_fall_out_of_the_ring() {
        let mut loc = localizer(2, &[]);
        for x in [100.0, 2.0, 4.0] {
            loc.process(&batch(vec![detection(&[0], x, 0.0, 0.0)]));
        }
        let cam = loc.camera_estimate().unwrap();
        assert_relative_eq!(cam.translation.vector, Vector3::new(-3.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn localized_state_persists_across_batches_without_origin() {
        let mut loc = localizer(2, &[("5", "car")]);
        loc.process(&batch(vec![detection(&[0], 1.0, 0.0, 0.0)]));
        let out = loc
            .process(&batch(vec![detection(&[5], 0.0, 0.0, 2.0)]))
            .expect("still localized");
        assert_relative_eq!(out.markers[0].message.pose.position.x, -1.0, epsilon = 1e-9);
        assert_relative_eq!(out.markers[0].message.pose.position.z, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn unregistered_marker_is_never_published() {
        let mut loc = localizer(1, &[("5", "car")]);
        for _ in 0..3 {
            let out = loc
                .process(&batch(vec![
                    detection(&[0], 1.0, 0.0, 0.0),
                    detection(&[7], 0.0, 1.0, 0.0),
                ]))
                .unwrap();
            assert!(out.markers.is_empty());
            assert_eq!(out.len(), 1);
        }
    }

    #[test]
    fn origin_that_is_also_registered_is_buffered_and_republished() {
        let mut loc = localizer(1, &[("0", "origin_echo")]);
        let out = loc.process(&batch(vec![detection(&[0], 1.0, 0.0, 0.0)])).unwrap();
        assert_eq!(loc.buffered(), 1);
        assert_eq!(out.markers.len(), 1);
        // T_cam · T_origin is the identity.
        let echo = &out.markers[0].message.pose.position;
        assert_relative_eq!(echo.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(echo.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn bundled_marker_matches_regardless_of_id_order() {
        let mut loc = localizer(1, &[("4,2", "bundle")]);
        let out = loc
            .process(&batch(vec![
                detection(&[0], 0.0, 0.0, 0.0),
                detection(&[2, 4], 1.0, 0.0, 0.0),
            ]))
            .unwrap();
        assert_eq!(out.markers[0].channel, "bundle");
        assert_eq!(out.markers[0].message.child_frame_id, "bundle");
    }

    #[test]
    fn messages_carry_batch_stamp_and_zero_covariance() {
        let mut loc = localizer(1, &[("5", "car")]);
        let b = batch(vec![detection(&[0], 0.0, 0.0, 0.0), detection(&[5], 0.0, 0.0, 0.0)]);
        let out = loc.process(&b).unwrap();
        for published in out.iter() {
            assert_eq!(published.message.stamp, b.stamp);
            assert!(published.message.covariance.iter().all(|c| *c == 0.0));
        }
    }

    #[test]
    fn rotated_origin_puts_camera_in_origin_frame() {
        // Origin seen 2 m ahead of the camera, yawed 90°.
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let q = yaw.quaternion();
        let origin = Detection {
            ids: vec![0],
            pose: Pose {
                position: Vector3Msg::new(2.0, 0.0, 0.0),
                orientation: QuaternionMsg::new(q.w, q.i, q.j, q.k),
            },
        };
        let mut loc = localizer(1, &[]);
        let out = loc.process(&batch(vec![origin])).unwrap();
        // Camera origin in the marker frame: R^T · (-t) = (0, 2, 0).
        let p = out.camera.message.pose.position;
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-9);
        assert_relative_eq!(out.camera.transform.rotation.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn shared_localizer_serializes_concurrent_batches() {
        let shared = SharedLocalizer::new(localizer(4, &[]));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared.process(&batch(vec![detection(&[0], i as f64, 0.0, 0.0)]))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_some());
        }
        assert!(shared.is_localized());
        assert_eq!(shared.buffered(), 4);
    }
}
