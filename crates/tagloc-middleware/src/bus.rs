//! Headless, named-channel publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Channels
//!
//! The set of channels is fixed when the bus is built: one for the camera
//! pose, one per tracked marker. Publishing to a channel the bus does not know
//! is an error rather than a silent drop, which catches typos in the marker
//! registry early.
//!
//! Every event published on any channel is also copied onto a single
//! firehose channel (see [`EventBus::subscribe`]) for consumers such as the
//! WebSocket bridge that want all traffic.

use std::collections::HashMap;

use tagloc_types::{Event, LocalizerError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 100;

/// Largest per-channel backlog the bus accepts.
pub const MAX_CAPACITY: usize = 65_536;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    channels: HashMap<String, broadcast::Sender<Event>>,
}

impl EventBus {
    /// Create a bus with one broadcast channel per name in `channels`.
    ///
    /// `capacity` is the backlog applied to every channel independently.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizerError::InvalidConfig`] when `capacity` is zero or
    /// above [`MAX_CAPACITY`], or a channel name is empty.
    pub fn new<I, S>(capacity: usize, channels: I) -> Result<Self, LocalizerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if capacity == 0 {
            return Err(LocalizerError::InvalidConfig(
                "bus capacity must be at least 1".to_string(),
            ));
        }
        if capacity > MAX_CAPACITY {
            return Err(LocalizerError::InvalidConfig(format!(
                "bus capacity {capacity} exceeds the maximum of {MAX_CAPACITY}"
            )));
        }
        let (firehose, _) = broadcast::channel(capacity);
        let mut senders = HashMap::new();
        for name in channels {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(LocalizerError::InvalidConfig(
                    "channel name must not be empty".to_string(),
                ));
            }
            senders
                .entry(name)
                .or_insert_with(|| broadcast::channel(capacity).0);
        }
        Ok(Self {
            firehose,
            channels: senders,
        })
    }

    /// Publish `event` on `channel` (and on the firehose).
    ///
    /// Returns the number of channel subscribers handed the event. `Ok(0)`
    /// means nobody is listening on that channel, which is a normal condition.
    pub fn publish_to(&self, channel: &str, event: Event) -> Result<usize, LocalizerError> {
        let sender = self.sender(channel)?;
        // A send only fails when there are no receivers.
        let _ = self.firehose.send(event.clone());
        Ok(sender.send(event).unwrap_or(0))
    }

    /// Subscribe to a single channel.
    pub fn subscribe_to(&self, channel: &str) -> Result<ChannelReceiver, LocalizerError> {
        Ok(ChannelReceiver {
            channel: channel.to_string(),
            receiver: self.sender(channel)?.subscribe(),
        })
    }

    /// Subscribe to every event published on any channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Names of all channels, in no particular order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    fn sender(&self, channel: &str) -> Result<&broadcast::Sender<Event>, LocalizerError> {
        self.channels
            .get(channel)
            .ok_or_else(|| LocalizerError::UnknownChannel(channel.to_string()))
    }
}

/// An async receiver bound to a single named channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct ChannelReceiver {
    channel: String,
    receiver: broadcast::Receiver<Event>,
}

impl ChannelReceiver {
    /// Wait for the next event on this channel.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}
