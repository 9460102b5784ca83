//! Node configuration – reads/writes `~/.tagloc/config.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tagloc_middleware::bus::MAX_CAPACITY as MAX_QUEUE_SIZE;
use tagloc_perception::LocalizerConfig;
use tagloc_perception::marker::normalize_key;
use tagloc_runtime::NodeConfig;
use tagloc_types::LocalizerError;

/// Largest accepted `buffer_size`.
pub const MAX_BUFFER_SIZE: usize = 100_000;

/// Persisted node configuration stored in `~/.tagloc/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the stream detection batches arrive on.
    #[serde(default = "default_detection_topic")]
    pub detection_topic: String,

    /// Canonical key of the origin marker (or bundle).
    #[serde(default = "default_origin_id")]
    pub origin_id: String,

    /// Channel the camera pose is published on.
    #[serde(default = "default_pub_topic")]
    pub pub_topic: String,

    /// Tracked markers: canonical key → output channel.
    #[serde(default)]
    pub pub_topics: BTreeMap<String, String>,

    /// Number of origin observations averaged into the camera pose.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Backlog of the ingest queue and of every output channel.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Frame every published pose is expressed in.
    #[serde(default = "default_frame_id")]
    pub frame_id: String,

    /// Child frame of the camera pose.
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,

    /// Optional namespace prepended to outgoing frame ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_prefix: Option<String>,

    /// Serve published poses over WebSocket on this port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
}

fn default_detection_topic() -> String {
    "tag_detections".to_string()
}
fn default_origin_id() -> String {
    "0".to_string()
}
fn default_pub_topic() -> String {
    "camera_pose".to_string()
}
fn default_buffer_size() -> usize {
    10
}
fn default_queue_size() -> usize {
    100
}
fn default_frame_id() -> String {
    "map".to_string()
}
fn default_camera_frame() -> String {
    "camera".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection_topic: default_detection_topic(),
            origin_id: default_origin_id(),
            pub_topic: default_pub_topic(),
            pub_topics: BTreeMap::new(),
            buffer_size: default_buffer_size(),
            queue_size: default_queue_size(),
            frame_id: default_frame_id(),
            camera_frame: default_camera_frame(),
            frame_prefix: None,
            ws_port: None,
        }
    }
}

impl Config {
    /// Check the numeric limits and bring every marker key into canonical
    /// form (`"3,1"` becomes `"1,3"`).
    ///
    /// # Errors
    ///
    /// [`LocalizerError::InvalidCapacity`] for a zero `buffer_size`,
    /// [`LocalizerError::InvalidConfig`] for everything else, including sizes
    /// above [`MAX_BUFFER_SIZE`] or the bus limit.
    pub fn validate(&mut self) -> Result<(), LocalizerError> {
        if self.buffer_size == 0 {
            return Err(LocalizerError::InvalidCapacity(0));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(LocalizerError::InvalidConfig(format!(
                "buffer_size {} exceeds the maximum of {MAX_BUFFER_SIZE}",
                self.buffer_size
            )));
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE {
            return Err(LocalizerError::InvalidConfig(format!(
                "queue_size must be between 1 and {MAX_QUEUE_SIZE}, got {}",
                self.queue_size
            )));
        }
        if self.origin_id.trim().is_empty() {
            return Err(LocalizerError::InvalidConfig(
                "origin_id must not be empty".to_string(),
            ));
        }
        self.origin_id = normalize_key(&self.origin_id)?;

        let mut canonical = BTreeMap::new();
        for (key, channel) in &self.pub_topics {
            let normalized = normalize_key(key)?;
            if canonical.insert(normalized.clone(), channel.clone()).is_some() {
                return Err(LocalizerError::InvalidConfig(format!(
                    "marker {normalized:?} is listed more than once in pub_topics"
                )));
            }
        }
        self.pub_topics = canonical;
        Ok(())
    }

    /// Translate into the runtime's configuration bundle.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            localizer: LocalizerConfig {
                origin_key: self.origin_id.clone(),
                camera_channel: self.pub_topic.clone(),
                frame_id: self.frame_id.clone(),
                camera_frame: self.camera_frame.clone(),
                buffer_size: self.buffer_size,
            },
            markers: self
                .pub_topics
                .iter()
                .map(|(k, c)| (k.clone(), c.clone()))
                .collect(),
            queue_size: self.queue_size,
            frame_prefix: self.frame_prefix.clone(),
        }
    }
}

/// Return the path to `~/.tagloc/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tagloc").join("config.toml")
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Load `path` (or the defaults when it is absent) and apply the
/// environment overrides on top.
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `TAGLOC_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `TAGLOC_ORIGIN_ID` | `origin_id` |
/// | `TAGLOC_BUFFER_SIZE` | `buffer_size` |
/// | `TAGLOC_QUEUE_SIZE` | `queue_size` |
/// | `TAGLOC_WS_PORT` | `ws_port` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TAGLOC_ORIGIN_ID") {
        cfg.origin_id = v;
    }
    if let Ok(v) = std::env::var("TAGLOC_BUFFER_SIZE")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.buffer_size = n;
    }
    if let Ok(v) = std::env::var("TAGLOC_QUEUE_SIZE")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.queue_size = n;
    }
    if let Ok(v) = std::env::var("TAGLOC_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = Some(port);
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
