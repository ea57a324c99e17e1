//! Controller API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source video codec as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Mjpeg,
}

impl VideoCodec {
    /// Whether the accessory protocol can carry this codec without
    /// re-encoding.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, VideoCodec::H264)
    }
}

/// One camera managed by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvrCamera {
    pub camera_id: String,
    pub name: String,
    pub mac: String,
    pub online: bool,
    pub codec: VideoCodec,
    /// Camera has a speaker reachable through the controller.
    pub supports_talkback: bool,
}

/// One source encoding variant offered by a camera.
///
/// Immutable once enumerated; selection logic reads but never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProfile {
    /// Stable identifier, e.g. "high" / "medium" / "low".
    pub alias: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Resolved source URL for this variant.
    pub url: String,
}

/// Talkback signaling channel descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkbackInfo {
    /// Secure WebSocket URL accepting raw encoded audio frames.
    pub url: String,
    /// Sample rate the camera speaker expects.
    pub sample_rate: u32,
}

/// Motion detection event from the controller's event feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionEvent {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    /// Detection confidence 0-100.
    pub score: u32,
}
