//! `tagloc-runtime` – runs the localizer as a long-lived node.
//!
//! # Modules
//!
//! - [`node`] – [`LocalizerNode`][node::LocalizerNode]: drains a bounded
//!   queue of detection batches in order, feeds them to the fusion engine and
//!   publishes the resulting camera and marker poses on the event bus. It
//!   also keeps a frame tree of everything it has published.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to any OTLP-compatible collector.

pub mod node;
pub mod telemetry;

pub use node::{LocalizerNode, NodeConfig, NodeStats};
pub use telemetry::{TracerProviderGuard, init_tracing};
