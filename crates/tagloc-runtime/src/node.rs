//! [`LocalizerNode`] – the ingestion boundary around the fusion engine.
//!
//! The node owns everything that is not pure math:
//!
//! 1. **Ingest** – detection batches are drained from a bounded
//!    [`mpsc`] queue strictly one at a time, in arrival order.
//! 2. **Localize** – each batch is handed synchronously to the
//!    [`SharedLocalizer`]; no other work happens while the engine's lock is
//!    held.
//! 3. **Publish** – every resulting pose is (optionally) namespaced by the
//!    [`FramePrefixer`], wrapped in an [`Event`] and published on its channel
//!    of the [`EventBus`].
//! 4. **Record** – the same transforms are written into a [`FrameTree`] so
//!    callers can look up the latest pose between any two published frames.
//!
//! # Example
//!
//! ```rust,no_run
//! use tagloc_runtime::node::{LocalizerNode, NodeConfig};
//!
//! # async fn run() -> Result<(), tagloc_types::LocalizerError> {
//! let node = LocalizerNode::new(NodeConfig::default())?;
//! let (tx, rx) = tokio::sync::mpsc::channel(node.queue_size());
//! let stats = node.run(rx).await;
//! # drop(tx); Ok(()) }
//! ```

use std::sync::Mutex;

use nalgebra::Isometry3;
use tagloc_middleware::{EventBus, FramePrefixer};
use tagloc_perception::transform::FrameTree;
use tagloc_perception::{Localizer, LocalizerConfig, SharedLocalizer, TrackedMarkerRegistry};
use tagloc_types::{DetectionBatch, Event, EventPayload, LocalizerError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// `source` field of every event the node publishes.
pub const EVENT_SOURCE: &str = "tagloc-runtime::node";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`LocalizerNode`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub localizer: LocalizerConfig,
    /// `(marker key, channel)` pairs to re-publish.
    pub markers: Vec<(String, String)>,
    /// Backlog of the ingest queue and of every bus channel.
    pub queue_size: usize,
    /// Optional namespace prepended to every outgoing frame id.
    pub frame_prefix: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            localizer: LocalizerConfig::default(),
            markers: Vec::new(),
            queue_size: 100,
            frame_prefix: None,
        }
    }
}

/// Counters reported when [`LocalizerNode::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Batches consumed from the queue.
    pub batches: usize,
    /// Batches that produced output.
    pub localized: usize,
    /// Pose events published on the bus.
    pub published: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalizerNode
// ─────────────────────────────────────────────────────────────────────────────

pub struct LocalizerNode {
    engine: SharedLocalizer,
    bus: EventBus,
    prefixer: Option<FramePrefixer>,
    frames: Mutex<FrameTree>,
    queue_size: usize,
}

impl LocalizerNode {
    /// Build the engine, registry and bus from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizerError::InvalidCapacity`] or
    /// [`LocalizerError::InvalidConfig`] for a zero buffer size, a queue size
    /// outside the bus limits, an invalid origin or marker key, or a marker
    /// routed to the camera channel.
    pub fn new(config: NodeConfig) -> Result<Self, LocalizerError> {
        let registry = TrackedMarkerRegistry::from_entries(config.markers)?;
        let camera_channel = config.localizer.camera_channel.clone();
        if let Some((key, _)) = registry.iter().find(|(_, c)| *c == camera_channel) {
            return Err(LocalizerError::InvalidConfig(format!(
                "marker {key:?} cannot publish on the camera channel {camera_channel:?}"
            )));
        }

        let channels: Vec<String> = std::iter::once(camera_channel.clone())
            .chain(registry.iter().map(|(_, c)| c.to_string()))
            .collect();
        let bus = EventBus::new(config.queue_size, channels)?;
        let localizer = Localizer::new(config.localizer, registry)?;

        info!(
            origin = %localizer.config().origin_key,
            tracked = localizer.registry().len(),
            buffer_size = localizer.config().buffer_size,
            "localizer node ready"
        );

        Ok(Self {
            engine: SharedLocalizer::new(localizer),
            bus,
            prefixer: config.frame_prefix.map(FramePrefixer::new),
            frames: Mutex::new(FrameTree::new()),
            queue_size: config.queue_size,
        })
    }

    /// Handle to the output bus. Subscribe before feeding batches.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &SharedLocalizer {
        &self.engine
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Latest transform mapping points in `target` into `source`, composed
    /// from the published poses.
    pub fn lookup(&self, source: &str, target: &str) -> Option<Isometry3<f64>> {
        let frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        frames.lookup(source, target)
    }

    /// Process one batch and publish its poses. Returns the number of pose
    /// events published; zero while the origin has not been seen.
    ///
    /// # Errors
    ///
    /// Only bus errors can surface here, and only if a channel disappeared
    /// from the bus, which cannot happen with a bus built by [`Self::new`].
    pub fn handle_batch(&self, batch: &DetectionBatch) -> Result<usize, LocalizerError> {
        let Some(localization) = self.engine.process(batch) else {
            return Ok(0);
        };

        let mut published = 0;
        for pose in localization.iter() {
            let message = match &self.prefixer {
                Some(prefixer) => prefixer.apply(pose.message.clone()),
                None => pose.message.clone(),
            };
            {
                let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
                frames.set_transform(&message.frame_id, &message.child_frame_id, pose.transform);
            }
            let event = Event::new(
                EVENT_SOURCE,
                EventPayload::Pose {
                    channel: pose.channel.clone(),
                    pose: message,
                },
            );
            let receivers = self.bus.publish_to(&pose.channel, event)?;
            debug!(channel = %pose.channel, receivers, "pose published");
            published += 1;
        }
        Ok(published)
    }

    /// Drain `rx` until every sender is dropped, handling batches in order.
    pub async fn run(&self, rx: mpsc::Receiver<DetectionBatch>) -> NodeStats {
        let (_never, shutdown) = watch::channel(false);
        self.run_until(rx, shutdown).await
    }

    /// Like [`Self::run`], but once `shutdown` flips to `true` the queue is
    /// closed to new batches and only what is already buffered is processed.
    pub async fn run_until(
        &self,
        mut rx: mpsc::Receiver<DetectionBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> NodeStats {
        let mut stats = NodeStats::default();
        let mut watching = true;

        loop {
            let next = if watching {
                tokio::select! {
                    batch = rx.recv() => batch,
                    changed = shutdown.changed() => {
                        match changed {
                            Ok(()) if *shutdown.borrow() => {
                                info!("shutdown requested; draining ingest queue");
                                rx.close();
                                watching = false;
                            }
                            Ok(()) => {}
                            // Sender gone: nobody can request a shutdown any more.
                            Err(_) => watching = false,
                        }
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };
            let Some(batch) = next else { break };

            stats.batches += 1;
            match self.handle_batch(&batch) {
                Ok(0) => {}
                Ok(n) => {
                    stats.localized += 1;
                    stats.published += n;
                }
                Err(e) => warn!(error = %e, "failed to publish localization"),
            }
        }

        info!(
            batches = stats.batches,
            localized = stats.localized,
            published = stats.published,
            "ingest closed; localizer node stopped"
        );
        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
