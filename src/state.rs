//! Application state
//!
//! Holds all shared components and state

use crate::hap::HostHandle;
use crate::motion::MotionPoller;
use crate::nvr_client::NvrClient;
use crate::port_pool::{PortPool, DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
use crate::registry::CameraRegistry;
use std::net::IpAddr;
use std::sync::Arc;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Controller base URL
    pub nvr_url: String,
    /// Controller API key
    pub nvr_api_key: String,
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
    /// Address to advertise to streaming clients; autodetected per
    /// client when unset
    pub advertised_address: Option<IpAddr>,
    /// Whether ffmpeg was built with libfdk_aac (audio legs and
    /// talkback need it)
    pub libfdk_available: bool,
    /// First UDP port the pool may lease
    pub port_range_start: u16,
    /// Past-the-end bound of the pool's port range
    pub port_range_end: u16,
    /// Motion feed polling interval in seconds
    pub motion_poll_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            nvr_url: std::env::var("NVR_URL")
                .unwrap_or_else(|_| "https://127.0.0.1:8443".to_string()),
            nvr_api_key: std::env::var("NVR_API_KEY").unwrap_or_default(),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            advertised_address: std::env::var("BRIDGE_ADDRESS")
                .ok()
                .and_then(|v| v.parse().ok()),
            libfdk_available: std::env::var("FFMPEG_LIBFDK")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            port_range_start: std::env::var("PORT_RANGE_START")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT_RANGE_START),
            port_range_end: std::env::var("PORT_RANGE_END")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT_RANGE_END),
            motion_poll_interval_secs: std::env::var("MOTION_POLL_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Bridge state shared across the host runtime
#[derive(Clone)]
pub struct BridgeState {
    /// Bridge config
    pub config: Arc<BridgeConfig>,
    /// Controller HTTP client
    pub nvr: Arc<NvrClient>,
    /// UDP port lease pool
    pub ports: Arc<PortPool>,
    /// Camera-to-coordinator registry
    pub registry: Arc<CameraRegistry>,
    /// Motion event feed
    pub motion: Arc<MotionPoller>,
    /// Forced-stop dispatch handle
    pub host: HostHandle,
}
