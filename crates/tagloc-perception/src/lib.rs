//! `tagloc-perception` – pose fusion and rigid alignment.
//!
//! Turns repeated noisy detections of a fixed origin marker into a camera
//! pose, and uses that pose to place every other tracked marker in the
//! origin's frame.
//!
//! # Modules
//!
//! - [`marker`] – [`canonicalize`][marker::canonicalize]: order-independent
//!   string keys for (bundled) marker id-sets.
//! - [`ring`] – [`RingBuffer`][ring::RingBuffer]: fixed-capacity store of the
//!   most recent origin observations.
//! - [`alignment`] – naive pose averaging and the SVD-based nearest-rotation
//!   solver that turns the mean into a proper rigid transform.
//! - [`registry`] – [`TrackedMarkerRegistry`][registry::TrackedMarkerRegistry]:
//!   immutable marker → output channel mapping.
//! - [`transform`] – wire pose ↔ isometry conversions and the
//!   [`FrameTree`][transform::FrameTree] of named frames.
//! - [`localizer`] – [`Localizer`][localizer::Localizer]: the per-batch
//!   fusion engine, plus a mutex-guarded [`SharedLocalizer`][localizer::SharedLocalizer].

pub mod alignment;
pub mod localizer;
pub mod marker;
pub mod registry;
pub mod ring;
pub mod transform;

pub use localizer::{Localization, Localizer, LocalizerConfig, PublishedPose, SharedLocalizer};
pub use registry::TrackedMarkerRegistry;
