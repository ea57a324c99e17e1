//! Host accessory runtime boundary
//!
//! ## Responsibilities
//!
//! - Request/response shapes for the stream lifecycle hooks
//! - `CameraStreaming` capability interface the session manager implements
//! - Host event channel for bridge-initiated session termination
//!
//! The accessory runtime itself (pairing, characteristic plumbing) lives
//! outside this crate; it drives the bridge exclusively through these types.

mod types;

pub use types::*;

use crate::error::Result;
use tokio::sync::mpsc;

/// Stream lifecycle capability exposed to the host runtime.
///
/// One implementor per camera. The runtime guarantees `prepare_stream`
/// precedes `start_stream` for a given session id; `stop_stream` may arrive
/// at any time, including concurrently with an in-flight start.
#[async_trait::async_trait]
pub trait CameraStreaming: Send + Sync {
    /// Negotiate transport parameters and reserve resources for a session.
    async fn prepare_stream(&self, request: PrepareStreamRequest) -> Result<PreparedStream>;

    /// Launch the media pipeline for a prepared session.
    async fn start_stream(&self, request: StartStreamRequest) -> Result<()>;

    /// Update quality parameters mid-stream.
    async fn reconfigure_stream(&self, request: ReconfigureStreamRequest) -> Result<()>;

    /// Tear down a session and release all of its resources.
    ///
    /// Idempotent: unknown session ids are tolerated.
    async fn stop_stream(&self, session_id: &SessionId);

    /// Fetch a still image for the accessory's snapshot characteristic.
    async fn snapshot(&self, request: SnapshotRequest) -> Result<Vec<u8>>;
}

/// Events the bridge raises toward the host runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A live session died (process exit, socket inactivity) and the runtime
    /// must invalidate it on the client side.
    ForceStopSession {
        camera_id: String,
        session_id: SessionId,
    },
}

/// Sending half of the host event channel, injected into each session
/// manager at construction.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostHandle {
    /// Create a handle plus the receiving half the runtime drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Ask the runtime to forcibly terminate a session on the client side.
    ///
    /// Delivery failure means the runtime is gone; nothing left to do.
    pub fn force_stop(&self, camera_id: &str, session_id: &SessionId) {
        let event = HostEvent::ForceStopSession {
            camera_id: camera_id.to_string(),
            session_id: session_id.clone(),
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(
                camera_id = %camera_id,
                session_id = %session_id,
                "Host event channel closed, force-stop dropped"
            );
        }
    }
}
