//! `tagloc-middleware` – moves poses and detections between the localizer
//! and the outside world without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – named-channel publish/subscribe bus built on Tokio broadcast
//!   channels. The channel set is fixed when the bus is built.
//! - [`rebroadcast`] – [`FramePrefixer`]: namespaces outgoing frame ids per
//!   camera.
//! - [`bridge`] – NDJSON detection ingest and the WebSocket fan-out of
//!   published poses.

pub mod bridge;
pub mod bus;
pub mod rebroadcast;

pub use bridge::{WsBridge, parse_batch_line, read_batches};
pub use bus::{ChannelReceiver, EventBus};
pub use rebroadcast::FramePrefixer;
