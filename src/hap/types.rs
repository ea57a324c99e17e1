//! Request/response shapes exchanged with the host accessory runtime.
//!
//! The runtime hands the bridge a fully negotiated HomeKit request; the
//! bridge answers with the transport parameters it reserved. Nothing here is
//! sent over the wire by this crate (the runtime owns the accessory
//! protocol), so these are plain data carriers.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Opaque per-request token issued by the host runtime.
pub type SessionId = String;

/// IP family of the requesting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

/// SRTP crypto suite requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrtpCryptoSuite {
    AesCm128HmacSha1_80,
    AesCm256HmacSha1_80,
    Disabled,
}

impl SrtpCryptoSuite {
    /// Suite name in the form the transcoder's SRTP output expects.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            SrtpCryptoSuite::AesCm128HmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
            SrtpCryptoSuite::AesCm256HmacSha1_80 => "AES_CM_256_HMAC_SHA1_80",
            SrtpCryptoSuite::Disabled => "NONE",
        }
    }
}

/// Symmetric key + salt pair for one media stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrtpParameters {
    pub suite: SrtpCryptoSuite,
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl SrtpParameters {
    /// Concatenated key+salt, base64-encoded, as the SRTP output URL expects.
    pub fn key_salt_base64(&self) -> String {
        let mut material = Vec::with_capacity(self.key.len() + self.salt.len());
        material.extend_from_slice(&self.key);
        material.extend_from_slice(&self.salt);
        base64::engine::general_purpose::STANDARD.encode(material)
    }
}

/// Client-side endpoint for one media type, from the prepare request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEndpoint {
    /// Port the client will listen on for this media type.
    pub port: u16,
    /// Crypto material the client will use to decrypt our stream.
    pub srtp: SrtpParameters,
}

/// Negotiation request: client address plus per-media endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareStreamRequest {
    pub session_id: SessionId,
    pub client_address: IpAddr,
    pub family: IpFamily,
    pub video: MediaEndpoint,
    pub audio: MediaEndpoint,
}

/// Bridge-side answer for one media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedMedia {
    /// Port on the bridge the client should send this media type to.
    pub port: u16,
    /// Synchronization source identifier for our outbound stream.
    pub ssrc: u32,
    /// Crypto material we will use (echoed back to the client).
    pub srtp: SrtpParameters,
}

/// Negotiation response returned from `prepare_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedStream {
    /// Bridge address the client should target.
    pub address: IpAddr,
    pub video: PreparedMedia,
    /// Absent when audio ports could not be reserved; video still streams.
    pub audio: Option<PreparedMedia>,
}

/// Requested video geometry and rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoAttributes {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Start request: quality parameters for a previously prepared session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStreamRequest {
    pub session_id: SessionId,
    pub video: VideoAttributes,
    /// Target video bitrate in kbit/s.
    pub bitrate_kbps: u32,
    /// Maximum RTP packet size the client can receive.
    pub packet_size: Option<u16>,
}

/// Mid-stream quality renegotiation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigureStreamRequest {
    pub session_id: SessionId,
    pub video: VideoAttributes,
    pub bitrate_kbps: u32,
}

/// Still-image request from the accessory runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_salt_base64_concatenation() {
        let params = SrtpParameters {
            suite: SrtpCryptoSuite::AesCm128HmacSha1_80,
            key: vec![0x01; 16],
            salt: vec![0x02; 14],
        };

        let encoded = params.key_salt_base64();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();

        assert_eq!(decoded.len(), 30);
        assert_eq!(&decoded[..16], &[0x01; 16]);
        assert_eq!(&decoded[16..], &[0x02; 14]);
    }

    #[test]
    fn test_suite_ffmpeg_names() {
        assert_eq!(
            SrtpCryptoSuite::AesCm128HmacSha1_80.ffmpeg_name(),
            "AES_CM_128_HMAC_SHA1_80"
        );
        assert_eq!(
            SrtpCryptoSuite::AesCm256HmacSha1_80.ffmpeg_name(),
            "AES_CM_256_HMAC_SHA1_80"
        );
    }
}
