//! Registry - Camera-to-Coordinator Mapping
//!
//! ## Responsibilities
//!
//! - Own the live set of per-camera session coordinators
//! - Resolve forced-stop deliveries from the host runtime to the
//!   owning coordinator
//! - Drain every session on shutdown
//!
//! The registry is plain owned state handed to the host runtime at
//! startup; nothing in the bridge reaches for process-global statics.

use crate::hap::SessionId;
use crate::stream_session::SessionCoordinator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct CameraRegistry {
    coordinators: RwLock<HashMap<String, Arc<SessionCoordinator>>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self {
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Register a coordinator under its camera id. Replacing an existing
    /// entry drains the old coordinator's sessions first.
    pub async fn insert(&self, coordinator: Arc<SessionCoordinator>) {
        let camera_id = coordinator.camera().camera_id.clone();
        let previous = {
            let mut coordinators = self.coordinators.write().await;
            coordinators.insert(camera_id.clone(), coordinator)
        };
        if let Some(previous) = previous {
            tracing::warn!(camera_id = %camera_id, "Replacing registered coordinator");
            previous.stop_all().await;
        }
    }

    pub async fn get(&self, camera_id: &str) -> Option<Arc<SessionCoordinator>> {
        self.coordinators.read().await.get(camera_id).cloned()
    }

    /// Deregister a camera, stopping any sessions it still owns.
    pub async fn remove(&self, camera_id: &str) -> Option<Arc<SessionCoordinator>> {
        let removed = {
            let mut coordinators = self.coordinators.write().await;
            coordinators.remove(camera_id)
        };
        if let Some(coordinator) = &removed {
            coordinator.stop_all().await;
        }
        removed
    }

    pub async fn camera_ids(&self) -> Vec<String> {
        self.coordinators.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.coordinators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.coordinators.read().await.is_empty()
    }

    /// Deliver a forced stop from the host runtime. Unknown cameras are
    /// logged and dropped; the session may have raced its own teardown.
    pub async fn force_stop(&self, camera_id: &str, session_id: &SessionId) {
        match self.get(camera_id).await {
            Some(coordinator) => {
                tracing::info!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    "Forced stop delivered"
                );
                coordinator.stop(session_id).await;
            }
            None => {
                tracing::debug!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    "Forced stop for unregistered camera"
                );
            }
        }
    }

    /// Stop every session on every coordinator.
    pub async fn stop_all(&self) {
        let coordinators: Vec<Arc<SessionCoordinator>> = {
            self.coordinators.read().await.values().cloned().collect()
        };
        for coordinator in coordinators {
            coordinator.stop_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hap::{
        HostHandle, IpFamily, MediaEndpoint, PrepareStreamRequest, SrtpCryptoSuite, SrtpParameters,
    };
    use crate::nvr_client::{NvrCamera, NvrClient, VideoCodec};
    use crate::port_pool::PortPool;
    use crate::state::BridgeConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn coordinator_for(camera_id: &str, range_start: u16) -> Arc<SessionCoordinator> {
        let (host, _events) = HostHandle::channel();
        let config = Arc::new(BridgeConfig {
            nvr_url: "http://127.0.0.1:9".to_string(),
            nvr_api_key: "test-key".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            advertised_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            libfdk_available: true,
            port_range_start: range_start,
            port_range_end: range_start + 20,
            motion_poll_interval_secs: 2,
        });
        let camera = NvrCamera {
            camera_id: camera_id.to_string(),
            name: "Door".to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            online: true,
            codec: VideoCodec::H264,
            supports_talkback: false,
        };
        Arc::new(SessionCoordinator::new(
            camera,
            Arc::new(NvrClient::new(
                "http://127.0.0.1:9".to_string(),
                "test-key".to_string(),
            )),
            Arc::new(PortPool::new(range_start, range_start + 20)),
            host,
            config,
        ))
    }

    fn prepare_request(session_id: &str) -> PrepareStreamRequest {
        let srtp = SrtpParameters {
            suite: SrtpCryptoSuite::AesCm128HmacSha1_80,
            key: vec![1u8; 16],
            salt: vec![2u8; 14],
        };
        PrepareStreamRequest {
            session_id: session_id.to_string(),
            client_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            family: IpFamily::V4,
            video: MediaEndpoint {
                port: 50000,
                srtp: srtp.clone(),
            },
            audio: MediaEndpoint { port: 50002, srtp },
        }
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = CameraRegistry::new();
        assert!(registry.is_empty().await);

        registry.insert(coordinator_for("cam-1", 43140)).await;
        registry.insert(coordinator_for("cam-2", 43160)).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get("cam-1").await.is_some());
        assert!(registry.get("cam-3").await.is_none());

        assert!(registry.remove("cam-1").await.is_some());
        assert!(registry.remove("cam-1").await.is_none());
        assert_eq!(registry.camera_ids().await, vec!["cam-2".to_string()]);
    }

    #[tokio::test]
    async fn test_force_stop_reaches_owning_coordinator() {
        let registry = CameraRegistry::new();
        let coordinator = coordinator_for("cam-1", 43180);
        registry.insert(coordinator.clone()).await;

        coordinator.prepare(prepare_request("s1")).await.unwrap();
        assert_eq!(coordinator.session_count().await, 1);

        registry.force_stop("cam-1", &"s1".to_string()).await;
        assert_eq!(coordinator.session_count().await, 0);

        // Unknown camera or session is absorbed.
        registry.force_stop("cam-9", &"s1".to_string()).await;
        registry.force_stop("cam-1", &"s9".to_string()).await;
    }

    #[tokio::test]
    async fn test_stop_all_drains_every_coordinator() {
        let registry = CameraRegistry::new();
        let first = coordinator_for("cam-1", 43200);
        let second = coordinator_for("cam-2", 43220);
        registry.insert(first.clone()).await;
        registry.insert(second.clone()).await;

        first.prepare(prepare_request("s1")).await.unwrap();
        second.prepare(prepare_request("s2")).await.unwrap();

        registry.stop_all().await;
        assert_eq!(first.session_count().await, 0);
        assert_eq!(second.session_count().await, 0);
        // Coordinators stay registered; only sessions are drained.
        assert_eq!(registry.len().await, 2);
    }
}
