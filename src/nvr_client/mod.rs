//! NvrClient - Upstream Controller Adapter
//!
//! ## Responsibilities
//!
//! - Camera and stream-profile enumeration
//! - Snapshot fetch
//! - Talkback signaling-channel URL retrieval
//! - Motion event polling
//!
//! Thin REST adapter over the controller's HTTP API; holds no state beyond
//! the HTTP client. Streaming itself never flows through here; the session
//! manager reads the profile URLs directly.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;

/// Controller HTTP client
#[derive(Clone)]
pub struct NvrClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl NvrClient {
    /// Create a new controller client.
    ///
    /// Controller appliances ship self-signed certificates, so certificate
    /// validation is disabled for this client.
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(true)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Check controller reachability.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/info", self.base_url);
        let resp = self.http.get(&url).send().await?;
        Ok(resp.status().is_success())
    }

    /// Enumerate all cameras the controller manages.
    pub async fn list_cameras(&self) -> Result<Vec<NvrCamera>> {
        let url = format!("{}/api/cameras", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Controller(format!(
                "Camera enumeration failed: {}",
                resp.status()
            )));
        }

        let cameras: Vec<NvrCamera> = resp.json().await?;
        tracing::debug!(count = cameras.len(), "Cameras enumerated");
        Ok(cameras)
    }

    /// Enumerate the encoding variants one camera offers.
    pub async fn stream_profiles(&self, camera_id: &str) -> Result<Vec<StreamProfile>> {
        let url = format!("{}/api/cameras/{}/streams", self.base_url, camera_id);

        let resp = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Controller(format!(
                "Profile enumeration for {} failed: {}",
                camera_id,
                resp.status()
            )));
        }

        let profiles: Vec<StreamProfile> = resp.json().await?;
        if profiles.is_empty() {
            return Err(Error::Controller(format!(
                "Camera {} offers no stream profiles",
                camera_id
            )));
        }
        Ok(profiles)
    }

    /// Fetch a JPEG snapshot for a camera.
    pub async fn snapshot(&self, camera_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/cameras/{}/snapshot", self.base_url, camera_id);

        let resp = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Controller(format!(
                "Snapshot for {} failed: {}",
                camera_id,
                resp.status()
            )));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Controller(format!(
                "Snapshot for {} returned no data",
                camera_id
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Request a talkback signaling channel for a camera.
    ///
    /// The returned URL is short-lived; fetch it per session, not at startup.
    pub async fn talkback(&self, camera_id: &str) -> Result<TalkbackInfo> {
        let url = format!("{}/api/cameras/{}/talkback", self.base_url, camera_id);

        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Controller(format!(
                "Talkback channel for {} failed: {}",
                camera_id,
                resp.status()
            )));
        }

        let info: TalkbackInfo = resp.json().await?;
        Ok(info)
    }

    /// Poll motion events newer than `since`.
    pub async fn poll_motion_events(&self, since: DateTime<Utc>) -> Result<Vec<MotionEvent>> {
        let url = format!(
            "{}/api/events?type=motion&since={}",
            self.base_url,
            since.timestamp_millis()
        );

        let resp = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Controller(format!(
                "Motion poll failed: {}",
                resp.status()
            )));
        }

        let events: Vec<MotionEvent> = resp.json().await?;
        Ok(events)
    }
}
