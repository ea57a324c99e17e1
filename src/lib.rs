//! Cambridge NVR Bridge Library
//!
//! Bridges a proprietary NVR controller onto an accessory streaming
//! protocol so stock home-automation clients can view and talk to its
//! cameras.
//!
//! ## Architecture (7 Components)
//!
//! 1. NvrClient - Controller HTTP adapter (cameras, profiles, snapshots)
//! 2. PortPool - UDP port leasing with OS bind probes
//! 3. TranscodeHandle - ffmpeg supervision and exit classification
//! 4. RtpDemuxer - Return-channel RTP/RTCP fan-out, keepalive, liveness
//! 5. SessionCoordinator - Per-camera streaming session lifecycle
//! 6. CameraRegistry - Camera-to-coordinator mapping, forced-stop routing
//! 7. MotionPoller - Controller motion feed fan-out
//!
//! ## Design Principles
//!
//! - Sessions register every acquired resource immediately, so teardown
//!   always sees a consistent picture
//! - Failures before streaming is acknowledged surface on the call;
//!   failures after route through the host runtime's forced stop
//! - Stop paths absorb errors and are idempotent

pub mod error;
pub mod hap;
pub mod motion;
pub mod nvr_client;
pub mod port_pool;
pub mod registry;
pub mod rtp_demux;
pub mod state;
pub mod stream_session;
pub mod transcoder;

pub use error::{Error, Result};
pub use state::{BridgeConfig, BridgeState};
