//! RtpDemux - Return-Audio Packet Routing and Liveness
//!
//! ## Responsibilities
//!
//! - Split inbound RTP/RTCP traffic arriving on one UDP port onto the two
//!   localhost ports the return-audio transcoder listens on
//! - Replay the last control packet as a keepalive so the transcoder's
//!   5-second input timeout never fires on a quiet channel
//! - Watch the primary video return port for media inactivity and force
//!   session teardown when the client goes silent
//!
//! Clients send RTP and RTCP interleaved on a single port; ffmpeg wants
//! them on two. Classification is the standard payload-type heuristic on
//! the second byte, not a full header parse.

use crate::error::{Error, Result};
use crate::hap::{HostHandle, IpFamily, SessionId};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Keepalive replay period; chosen under the transcoder's 5-second
/// input inactivity timeout.
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(3500);

/// Silence on the video return port before the session is presumed dead.
pub const MEDIA_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

const DATAGRAM_BUF_SIZE: usize = 2048;

/// Datagram classification for the demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpKind {
    Media,
    Control,
}

/// Classify a datagram by the low 7 bits of its second byte.
///
/// Payload types above 90 and the value 0 are media; everything between
/// is RTCP packet-type space (the high bit of SR/RR/BYE values lands the
/// masked value in 64..=90).
pub fn rtp_kind(second_byte: u8) -> RtpKind {
    let payload_type = second_byte & 0x7f;
    if payload_type > 90 || payload_type == 0 {
        RtpKind::Media
    } else {
        RtpKind::Control
    }
}

fn loopback(family: IpFamily) -> IpAddr {
    match family {
        IpFamily::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpFamily::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}

fn unspecified(family: IpFamily) -> IpAddr {
    match family {
        IpFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Splits interleaved RTP/RTCP return traffic onto two downstream ports.
pub struct RtpDemuxer {
    port: u16,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    first_packet: watch::Receiver<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl RtpDemuxer {
    /// Bind `port` and start routing to the downstream localhost ports.
    ///
    /// `media_port` receives RTP plus the keepalive replay; `control_port`
    /// receives RTCP.
    pub async fn open(
        family: IpFamily,
        port: u16,
        media_port: u16,
        control_port: u16,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((unspecified(family), port))
            .await
            .map_err(|e| Error::Socket(format!("demux bind on {} failed: {}", port, e)))?;
        let socket = Arc::new(socket);

        let media_addr = SocketAddr::new(loopback(family), media_port);
        let control_addr = SocketAddr::new(loopback(family), control_port);

        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());
        let (first_tx, first_rx) = watch::channel(false);
        let last_control: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));

        let reader = {
            let socket = socket.clone();
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            let last_control = last_control.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; DATAGRAM_BUF_SIZE];
                loop {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let len = tokio::select! {
                        _ = shutdown.notified() => break,
                        result = socket.recv_from(&mut buf) => match result {
                            Ok((len, _)) => len,
                            Err(e) => {
                                tracing::warn!(port = port, error = %e, "Demux receive failed");
                                break;
                            }
                        },
                    };
                    if len < 2 {
                        continue;
                    }
                    first_tx.send_replace(true);
                    let target = match rtp_kind(buf[1]) {
                        RtpKind::Media => media_addr,
                        RtpKind::Control => {
                            let mut cache =
                                last_control.lock().unwrap_or_else(|e| e.into_inner());
                            *cache = Some(buf[..len].to_vec());
                            control_addr
                        }
                    };
                    if let Err(e) = socket.send_to(&buf[..len], target).await {
                        tracing::warn!(port = port, target = %target, error = %e, "Demux forward failed");
                    }
                }
            })
        };

        let keepalive = {
            let socket = socket.clone();
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            let last_control = last_control.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
                ticker.tick().await;
                loop {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = ticker.tick() => {}
                    }
                    let packet = {
                        let cache = last_control.lock().unwrap_or_else(|e| e.into_inner());
                        cache.clone()
                    };
                    // Nothing to replay until control traffic has been seen.
                    if let Some(packet) = packet {
                        if let Err(e) = socket.send_to(&packet, media_addr).await {
                            tracing::debug!(port = port, error = %e, "Keepalive replay failed");
                        }
                    }
                }
            })
        };

        tracing::debug!(
            port = port,
            media_port = media_port,
            control_port = control_port,
            "Demuxer opened"
        );

        Ok(Self {
            port,
            closed,
            shutdown,
            first_packet: first_rx,
            reader: Mutex::new(Some(reader)),
            keepalive: Mutex::new(Some(keepalive)),
        })
    }

    /// Wait until the first inbound datagram arrives.
    ///
    /// Returns false if the demuxer closed without ever receiving one.
    /// Callers bound the wait with their own timeout.
    pub async fn wait_first_packet(&self) -> bool {
        let mut rx = self.first_packet.clone();
        loop {
            if *rx.borrow() {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// The bound receiving port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the keepalive timer and release the socket. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(task) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        if let Some(task) = self
            .keepalive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        tracing::debug!(port = self.port, "Demuxer closed");
    }
}

impl Drop for RtpDemuxer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Watches the primary video return port and forces session teardown
/// after sustained silence.
///
/// The timer arms on the first inbound packet; a client that never sends
/// anything is covered by the transcoder's own failure paths instead.
pub struct InactivityCanary {
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityCanary {
    pub async fn open(
        family: IpFamily,
        port: u16,
        timeout: Duration,
        host: HostHandle,
        camera_id: &str,
        session_id: &SessionId,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((unspecified(family), port))
            .await
            .map_err(|e| Error::Socket(format!("canary bind on {} failed: {}", port, e)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());

        let task = {
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            let camera_id = camera_id.to_string();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; DATAGRAM_BUF_SIZE];

                // Arm only once traffic has been seen.
                tokio::select! {
                    _ = shutdown.notified() => return,
                    result = socket.recv_from(&mut buf) => {
                        if let Err(e) = result {
                            tracing::warn!(
                                camera_id = %camera_id,
                                session_id = %session_id,
                                port = port,
                                error = %e,
                                "Canary receive failed, forcing session stop"
                            );
                            host.force_stop(&camera_id, &session_id);
                            return;
                        }
                    }
                }

                loop {
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    tokio::select! {
                        _ = shutdown.notified() => return,
                        result = tokio::time::timeout(timeout, socket.recv_from(&mut buf)) => {
                            match result {
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => {
                                    // A dead media path is a dead session,
                                    // same as sustained silence.
                                    tracing::warn!(
                                        camera_id = %camera_id,
                                        session_id = %session_id,
                                        port = port,
                                        error = %e,
                                        "Canary receive failed, forcing session stop"
                                    );
                                    host.force_stop(&camera_id, &session_id);
                                    return;
                                }
                                Err(_) => {
                                    tracing::info!(
                                        camera_id = %camera_id,
                                        session_id = %session_id,
                                        timeout_secs = timeout.as_secs(),
                                        "Media inactivity detected, forcing session stop"
                                    );
                                    host.force_stop(&camera_id, &session_id);
                                    return;
                                }
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            closed,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop watching. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for InactivityCanary {
    fn drop(&mut self) {
        self.close();
    }
}
