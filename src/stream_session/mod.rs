//! StreamSession - Streaming Session Coordination
//!
//! ## Responsibilities
//!
//! - Negotiate per-session transport: port leases, synchronization
//!   sources, SRTP parameter echo
//! - Select a stream profile and launch the media pipeline on start
//! - Route pre-start failures to the caller and post-start failures to
//!   the host runtime's forced-stop path
//! - Tear sessions down idempotently, releasing every leased resource
//!
//! One coordinator exists per camera; the platform registry owns the
//! camera-to-coordinator mapping. A session moves pending -> active and
//! is closed by removal from the session table. Every resource-acquiring
//! step registers its handle in the session record the moment it
//! succeeds, so a stop arriving mid-start sees a consistent partial view
//! and can release whatever exists.

mod profile;
mod probe;
mod talkback;

pub use probe::{ProbeSizer, DEFAULT_PROBE_SIZE, MAX_PROBE_SIZE};
pub use talkback::TalkbackStream;

use crate::error::{Error, Result};
use crate::hap::{
    CameraStreaming, HostHandle, IpFamily, PrepareStreamRequest, PreparedMedia, PreparedStream,
    ReconfigureStreamRequest, SessionId, SnapshotRequest, SrtpCryptoSuite, SrtpParameters,
    StartStreamRequest,
};
use crate::nvr_client::{NvrCamera, NvrClient, StreamProfile};
use crate::port_pool::{PortCount, PortPool};
use crate::rtp_demux::{InactivityCanary, RtpDemuxer, MEDIA_INACTIVITY_TIMEOUT};
use crate::state::BridgeConfig;
use crate::transcoder::{ExitOutcome, ProcessEvent, TranscodeHandle};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// How long to wait for the first return-audio packet before giving up
/// on talkback for the session. Kept under the media inactivity window
/// so a quiet client cannot stall start past the canary.
const FIRST_PACKET_TIMEOUT: Duration = Duration::from_secs(3);

/// Default RTP packet size when the client does not constrain it.
const DEFAULT_PACKET_SIZE: u16 = 1316;

/// Audio RTP packets are small; fixed output packet size.
const AUDIO_PACKET_SIZE: u16 = 188;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Pending,
    Active,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
        }
    }
}

/// Negotiated transport for one media direction.
#[derive(Debug, Clone)]
struct MediaLeg {
    /// Port on the client we stream toward.
    client_port: u16,
    /// Our leased port the client sends return traffic to.
    return_port: u16,
    ssrc: u32,
    srtp: SrtpParameters,
}

/// Talkback transport negotiated at prepare time.
#[derive(Debug, Clone)]
struct TalkbackPlan {
    /// Return-audio transcoder input; RTCP rides on `rtp_port + 1`.
    rtp_port: u16,
    ws_url: String,
    /// Sample rate the camera speaker expects.
    sample_rate: u32,
}

/// Everything one session owns. Exclusively mutated under the session
/// table lock; handles are shared out only for teardown.
struct SessionRecord {
    state: SessionState,
    family: IpFamily,
    client_address: IpAddr,
    video: MediaLeg,
    audio: Option<MediaLeg>,
    talkback: Option<TalkbackPlan>,
    leased_ports: Vec<u16>,
    main_process: Option<Arc<TranscodeHandle>>,
    return_process: Option<Arc<TranscodeHandle>>,
    demux: Option<Arc<RtpDemuxer>>,
    canary: Option<Arc<InactivityCanary>>,
    talkback_stream: Option<Arc<TalkbackStream>>,
}

/// Per-camera streaming session coordinator.
pub struct SessionCoordinator {
    camera: NvrCamera,
    nvr: Arc<NvrClient>,
    ports: Arc<PortPool>,
    host: HostHandle,
    config: Arc<BridgeConfig>,
    probe: Arc<ProbeSizer>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionCoordinator {
    pub fn new(
        camera: NvrCamera,
        nvr: Arc<NvrClient>,
        ports: Arc<PortPool>,
        host: HostHandle,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            camera,
            nvr,
            ports,
            host,
            config,
            probe: Arc::new(ProbeSizer::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Camera this coordinator streams for.
    pub fn camera(&self) -> &NvrCamera {
        &self.camera
    }

    /// Number of live (pending or active) sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Negotiate transport for a new session.
    ///
    /// The video return port is load-bearing: reservation failure fails
    /// the whole negotiation. Audio and talkback degrade independently.
    pub async fn prepare(&self, request: PrepareStreamRequest) -> Result<PreparedStream> {
        let camera_id = self.camera.camera_id.clone();
        let family = request.family;
        tracing::info!(
            camera_id = %camera_id,
            session_id = %request.session_id,
            client = %request.client_address,
            "Preparing stream session"
        );

        let video_return = self.ports.reserve(family, PortCount::Single).await?;
        let mut leased = vec![video_return];

        let video = MediaLeg {
            client_port: request.video.port,
            return_port: video_return,
            ssrc: generate_ssrc(),
            srtp: request.video.srtp.clone(),
        };

        let audio = match self.ports.reserve(family, PortCount::Single).await {
            Ok(port) => {
                leased.push(port);
                Some(MediaLeg {
                    client_port: request.audio.port,
                    return_port: port,
                    ssrc: generate_ssrc(),
                    srtp: request.audio.srtp.clone(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    session_id = %request.session_id,
                    error = %e,
                    "Audio port reservation failed, continuing video-only"
                );
                None
            }
        };

        let talkback = if audio.is_some()
            && self.camera.supports_talkback
            && self.config.libfdk_available
        {
            match self.prepare_talkback(family).await {
                Ok(plan) => {
                    leased.push(plan.rtp_port);
                    leased.push(plan.rtp_port + 1);
                    Some(plan)
                }
                Err(e) => {
                    tracing::warn!(
                        camera_id = %camera_id,
                        session_id = %request.session_id,
                        error = %e,
                        "Talkback unavailable for this session"
                    );
                    None
                }
            }
        } else {
            None
        };

        let address = match self.local_address_for(request.client_address).await {
            Ok(address) => address,
            Err(e) => {
                for port in &leased {
                    self.ports.cancel(*port).await;
                }
                return Err(e);
            }
        };

        let response = PreparedStream {
            address,
            video: PreparedMedia {
                port: video.return_port,
                ssrc: video.ssrc,
                srtp: video.srtp.clone(),
            },
            audio: audio.as_ref().map(|leg| PreparedMedia {
                port: leg.return_port,
                ssrc: leg.ssrc,
                srtp: leg.srtp.clone(),
            }),
        };

        let record = SessionRecord {
            state: SessionState::Pending,
            family,
            client_address: request.client_address,
            video,
            audio,
            talkback,
            leased_ports: leased,
            main_process: None,
            return_process: None,
            demux: None,
            canary: None,
            talkback_stream: None,
        };

        let stale = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(request.session_id.clone(), record)
        };
        if let Some(stale) = stale {
            tracing::warn!(
                camera_id = %camera_id,
                session_id = %request.session_id,
                "Duplicate prepare replaced a live session"
            );
            self.teardown(&request.session_id, stale).await;
        }

        Ok(response)
    }

    /// Launch the media pipeline for a prepared session.
    pub async fn start(&self, request: StartStreamRequest) -> Result<()> {
        let session_id = request.session_id.clone();

        // Copy out what the launch needs; the table lock is never held
        // across I/O.
        let (family, client_address, video, audio, talkback_plan) = {
            let sessions = self.sessions.lock().await;
            let record = sessions
                .get(&session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
            if record.state != SessionState::Pending {
                return Err(Error::InvalidState {
                    expected: "pending".to_string(),
                    actual: record.state.as_str().to_string(),
                });
            }
            (
                record.family,
                record.client_address,
                record.video.clone(),
                record.audio.clone(),
                record.talkback.clone(),
            )
        };

        match self
            .launch(&request, family, client_address, &video, audio.as_ref(), talkback_plan)
            .await
        {
            Ok(()) => {
                let mut sessions = self.sessions.lock().await;
                match sessions.get_mut(&session_id) {
                    Some(record) => {
                        record.state = SessionState::Active;
                        tracing::info!(
                            camera_id = %self.camera.camera_id,
                            session_id = %session_id,
                            "Stream session active"
                        );
                        Ok(())
                    }
                    // Stopped while we were finishing up; launch already
                    // disposed of whatever it could not register.
                    None => Err(Error::SessionNotFound(session_id)),
                }
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %self.camera.camera_id,
                    session_id = %session_id,
                    error = %e,
                    "Stream start failed"
                );
                self.stop(&session_id).await;
                Err(e)
            }
        }
    }

    /// Tear down a session. Idempotent; absorbs all internal errors.
    pub async fn stop(&self, session_id: &SessionId) {
        let record = { self.sessions.lock().await.remove(session_id) };
        match record {
            Some(record) => self.teardown(session_id, record).await,
            None => {
                tracing::debug!(
                    camera_id = %self.camera.camera_id,
                    session_id = %session_id,
                    "Stop for unknown session"
                );
            }
        }
    }

    /// Stop every session this coordinator owns.
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = { self.sessions.lock().await.keys().cloned().collect() };
        for session_id in ids {
            self.stop(&session_id).await;
        }
    }

    async fn teardown(&self, session_id: &SessionId, record: SessionRecord) {
        tracing::info!(
            camera_id = %self.camera.camera_id,
            session_id = %session_id,
            "Stopping stream session"
        );
        if let Some(process) = &record.main_process {
            process.stop();
        }
        if let Some(process) = &record.return_process {
            process.stop();
        }
        if let Some(talkback) = &record.talkback_stream {
            talkback.close();
        }
        if let Some(demux) = &record.demux {
            demux.close();
        }
        if let Some(canary) = &record.canary {
            canary.close();
        }
        for port in &record.leased_ports {
            self.ports.cancel(*port).await;
        }
    }

    /// The full start sequence after validation. Every acquired handle is
    /// registered into the session record immediately; when registration
    /// fails (concurrent stop emptied the record) the handle is disposed
    /// and the start abandoned.
    async fn launch(
        &self,
        request: &StartStreamRequest,
        family: IpFamily,
        client_address: IpAddr,
        video: &MediaLeg,
        audio: Option<&MediaLeg>,
        talkback_plan: Option<TalkbackPlan>,
    ) -> Result<()> {
        let camera_id = self.camera.camera_id.clone();
        let session_id = request.session_id.clone();

        let profiles = self.nvr.stream_profiles(&camera_id).await?;
        let transcode = !self.camera.codec.is_passthrough();
        let selected = profile::select(
            &profiles,
            request.video.width,
            request.video.height,
            transcode,
        )
        .ok_or_else(|| Error::Controller(format!("camera {} offers no profiles", camera_id)))?;

        let probe_size = self.probe.current();
        tracing::info!(
            camera_id = %camera_id,
            session_id = %session_id,
            profile = %selected.alias,
            transcode = transcode,
            probe_size = probe_size,
            "Launching transcoder"
        );

        let audio_out = if self.config.libfdk_available {
            audio
        } else {
            None
        };
        let args = build_stream_args(
            selected,
            probe_size,
            transcode,
            client_address,
            request,
            video,
            audio_out,
        );

        let (handle, mut events) =
            TranscodeHandle::spawn(&self.config.ffmpeg_path, &args, None, &camera_id, &session_id)?;
        let handle = Arc::new(handle);
        if !self
            .register(&session_id, |record| {
                record.main_process = Some(handle.clone())
            })
            .await
        {
            handle.stop();
            return Err(Error::SessionNotFound(session_id));
        }

        // Suspend until the pipeline is live. An exit before the first
        // frame is a start failure and belongs to this call.
        match events.recv().await {
            Some(ProcessEvent::FirstFrame) => {}
            Some(ProcessEvent::Exited(outcome)) => {
                return Err(self.classify_start_failure(outcome, &handle));
            }
            None => {
                return Err(Error::ProcessStartup(
                    "event channel closed before first frame".to_string(),
                ));
            }
        }

        self.spawn_exit_watcher(session_id.clone(), events);

        // Liveness watchdog on the video return port.
        let canary = InactivityCanary::open(
            family,
            video.return_port,
            MEDIA_INACTIVITY_TIMEOUT,
            self.host.clone(),
            &camera_id,
            &session_id,
        )
        .await?;
        let canary = Arc::new(canary);
        if !self
            .register(&session_id, |record| record.canary = Some(canary.clone()))
            .await
        {
            canary.close();
            return Err(Error::SessionNotFound(session_id));
        }

        if let (Some(plan), Some(audio_leg)) = (talkback_plan, audio) {
            if let Err(e) = self
                .start_talkback(&session_id, family, audio_leg, &plan)
                .await
            {
                tracing::warn!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    error = %e,
                    "Talkback setup failed, continuing without it"
                );
            }
        }

        Ok(())
    }

    /// Reserve the talkback pair and fetch the signaling URL.
    async fn prepare_talkback(&self, family: IpFamily) -> Result<TalkbackPlan> {
        let rtp_port = self.ports.reserve(family, PortCount::Pair).await?;
        match self.nvr.talkback(&self.camera.camera_id).await {
            Ok(info) => Ok(TalkbackPlan {
                rtp_port,
                ws_url: info.url,
                sample_rate: info.sample_rate,
            }),
            Err(e) => {
                self.ports.cancel(rtp_port).await;
                self.ports.cancel(rtp_port + 1).await;
                Err(e)
            }
        }
    }

    /// Open the demuxer, wait for return audio, and bridge it upstream.
    ///
    /// Failures here degrade talkback only; the primary stream is already
    /// live and unaffected.
    async fn start_talkback(
        &self,
        session_id: &SessionId,
        family: IpFamily,
        audio: &MediaLeg,
        plan: &TalkbackPlan,
    ) -> Result<()> {
        let camera_id = self.camera.camera_id.clone();

        let demux =
            RtpDemuxer::open(family, audio.return_port, plan.rtp_port, plan.rtp_port + 1).await?;
        let demux = Arc::new(demux);
        if !self
            .register(session_id, |record| record.demux = Some(demux.clone()))
            .await
        {
            demux.close();
            return Err(Error::SessionNotFound(session_id.clone()));
        }

        let live = tokio::time::timeout(FIRST_PACKET_TIMEOUT, demux.wait_first_packet()).await;
        if !matches!(live, Ok(true)) {
            demux.close();
            return Err(Error::Talkback(format!(
                "no return audio within {}s",
                FIRST_PACKET_TIMEOUT.as_secs()
            )));
        }

        let sdp = build_talkback_sdp(family, plan.rtp_port, &audio.srtp);
        let args = build_return_audio_args(plan.sample_rate);
        let (handle, events) = TranscodeHandle::spawn(
            &self.config.ffmpeg_path,
            &args,
            Some(sdp.into_bytes()),
            &camera_id,
            session_id,
        )?;
        let handle = Arc::new(handle);
        if !self
            .register(session_id, |record| {
                record.return_process = Some(handle.clone())
            })
            .await
        {
            handle.stop();
            return Err(Error::SessionNotFound(session_id.clone()));
        }

        // Return-audio exits never take the session down; they only cost
        // the talkback direction.
        {
            let camera_id = camera_id.clone();
            let session_id = session_id.clone();
            let mut events = events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let ProcessEvent::Exited(outcome) = event {
                        match outcome {
                            ExitOutcome::Cancelled | ExitOutcome::CleanExit => {}
                            ExitOutcome::Failed { code, log_tail, .. } => {
                                tracing::warn!(
                                    camera_id = %camera_id,
                                    session_id = %session_id,
                                    code = ?code,
                                    log = %log_tail,
                                    "Return-audio transcoder failed"
                                );
                            }
                        }
                    }
                }
            });
        }

        let stdout = handle
            .take_stdout()
            .ok_or_else(|| Error::Talkback("return audio stdout unavailable".to_string()))?;
        let talkback =
            TalkbackStream::connect(&plan.ws_url, stdout, &camera_id, session_id).await?;
        let talkback = Arc::new(talkback);
        if !self
            .register(session_id, |record| {
                record.talkback_stream = Some(talkback.clone())
            })
            .await
        {
            talkback.close();
            return Err(Error::SessionNotFound(session_id.clone()));
        }

        tracing::info!(
            camera_id = %camera_id,
            session_id = %session_id,
            "Talkback bridged"
        );
        Ok(())
    }

    /// Watch the primary transcoder after streaming is acknowledged.
    ///
    /// Any exit from here on routes through the host's forced stop, never
    /// back to the completed start call.
    fn spawn_exit_watcher(
        &self,
        session_id: SessionId,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        let camera_id = self.camera.camera_id.clone();
        let host = self.host.clone();
        let probe = self.probe.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let ProcessEvent::Exited(outcome) = event else {
                    continue;
                };
                match outcome {
                    ExitOutcome::Cancelled => {
                        tracing::debug!(
                            camera_id = %camera_id,
                            session_id = %session_id,
                            "Transcoder cancelled by teardown"
                        );
                    }
                    ExitOutcome::CleanExit => {
                        tracing::info!(
                            camera_id = %camera_id,
                            session_id = %session_id,
                            "Transcoder ended, stopping session"
                        );
                        host.force_stop(&camera_id, &session_id);
                    }
                    ExitOutcome::Failed {
                        code,
                        log_tail,
                        probe_shortfall,
                        ..
                    } => {
                        if probe_shortfall {
                            probe.bump(&camera_id);
                        }
                        tracing::warn!(
                            camera_id = %camera_id,
                            session_id = %session_id,
                            code = ?code,
                            log = %log_tail,
                            "Transcoder failed mid-stream, stopping session"
                        );
                        host.force_stop(&camera_id, &session_id);
                    }
                }
            }
        });
    }

    fn classify_start_failure(&self, outcome: ExitOutcome, handle: &TranscodeHandle) -> Error {
        match outcome {
            ExitOutcome::Cancelled => Error::InvalidState {
                expected: "pending".to_string(),
                actual: "closed".to_string(),
            },
            ExitOutcome::CleanExit => Error::ProcessExited {
                code: Some(0),
                log: handle.log_tail(),
            },
            ExitOutcome::Failed {
                code,
                log_tail,
                probe_shortfall,
                ..
            } => {
                if probe_shortfall {
                    self.probe.bump(&self.camera.camera_id);
                }
                Error::ProcessExited {
                    code,
                    log: log_tail,
                }
            }
        }
    }

    /// Apply a mutation to a live session record.
    ///
    /// Returns false when the session is gone, which means a concurrent
    /// stop won; the caller must dispose what it just acquired.
    async fn register<F>(&self, session_id: &SessionId, apply: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// The bridge address to advertise toward this client.
    async fn local_address_for(&self, client: IpAddr) -> Result<IpAddr> {
        if let Some(address) = self.config.advertised_address {
            return Ok(address);
        }
        // Route lookup via a connected UDP socket; nothing is sent.
        let bind_addr: std::net::SocketAddr = if client.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let probe = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Socket(format!("address probe bind failed: {}", e)))?;
        probe
            .connect((client, 9))
            .await
            .map_err(|e| Error::Socket(format!("no route to client {}: {}", client, e)))?;
        let local = probe
            .local_addr()
            .map_err(|e| Error::Socket(e.to_string()))?;
        Ok(local.ip())
    }
}

#[async_trait::async_trait]
impl CameraStreaming for SessionCoordinator {
    async fn prepare_stream(&self, request: PrepareStreamRequest) -> Result<PreparedStream> {
        self.prepare(request).await
    }

    async fn start_stream(&self, request: StartStreamRequest) -> Result<()> {
        self.start(request).await
    }

    async fn reconfigure_stream(&self, request: ReconfigureStreamRequest) -> Result<()> {
        // Quality renegotiation is acknowledged but not yet acted on.
        tracing::debug!(
            camera_id = %self.camera.camera_id,
            session_id = %request.session_id,
            width = request.video.width,
            height = request.video.height,
            bitrate_kbps = request.bitrate_kbps,
            "Reconfigure acknowledged"
        );
        Ok(())
    }

    async fn stop_stream(&self, session_id: &SessionId) {
        self.stop(session_id).await;
    }

    async fn snapshot(&self, _request: SnapshotRequest) -> Result<Vec<u8>> {
        self.nvr.snapshot(&self.camera.camera_id).await
    }
}

/// Synchronization source id; kept positive to survive signed parsers.
fn generate_ssrc() -> u32 {
    rand::random::<u32>() & 0x7fff_ffff
}

/// Argument vector for the primary media pipeline.
fn build_stream_args(
    profile: &StreamProfile,
    probe_size: u64,
    transcode: bool,
    client_address: IpAddr,
    request: &StartStreamRequest,
    video: &MediaLeg,
    audio: Option<&MediaLeg>,
) -> Vec<String> {
    let packet_size = request.packet_size.unwrap_or(DEFAULT_PACKET_SIZE);

    let mut args: Vec<String> = Vec::new();
    args.extend(["-hide_banner", "-loglevel", "level+verbose", "-probesize"].map(String::from));
    args.push(probe_size.to_string());
    args.extend(["-max_delay", "500000", "-rtsp_transport", "tcp", "-i"].map(String::from));
    args.push(profile.url.clone());

    args.extend(["-map", "0:v:0"].map(String::from));
    if transcode {
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "main",
                "-level:v",
                "3.1",
            ]
            .map(String::from),
        );
        args.push("-filter:v".to_string());
        args.push(format!(
            "scale={}:{}",
            request.video.width, request.video.height
        ));
        args.push("-b:v".to_string());
        args.push(format!("{}k", request.bitrate_kbps));
        args.push("-maxrate".to_string());
        args.push(format!("{}k", request.bitrate_kbps));
        args.push("-bufsize".to_string());
        args.push(format!("{}k", request.bitrate_kbps * 2));
        args.push("-r".to_string());
        args.push(request.video.fps.to_string());
    } else {
        args.extend(["-c:v", "copy"].map(String::from));
    }
    args.extend(["-payload_type", "99", "-ssrc"].map(String::from));
    args.push(video.ssrc.to_string());
    args.extend(rtp_output(
        &video.srtp,
        client_address,
        video.client_port,
        packet_size,
    ));

    if let Some(audio) = audio {
        args.extend(
            [
                "-map",
                "0:a:0?",
                "-c:a",
                "libfdk_aac",
                "-profile:a",
                "aac_eld",
                "-flags",
                "+global_header",
                "-ar",
                "16000",
                "-ac",
                "1",
                "-b:a",
                "24k",
                "-payload_type",
                "110",
                "-ssrc",
            ]
            .map(String::from),
        );
        args.push(audio.ssrc.to_string());
        args.extend(rtp_output(
            &audio.srtp,
            client_address,
            audio.client_port,
            AUDIO_PACKET_SIZE,
        ));
    }

    args
}

/// Output transport arguments for one (S)RTP leg.
fn rtp_output(
    srtp: &SrtpParameters,
    address: IpAddr,
    port: u16,
    packet_size: u16,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-f".to_string(), "rtp".to_string()];
    if srtp.suite == SrtpCryptoSuite::Disabled {
        args.push(format!(
            "rtp://{}:{}?rtcpport={}&pkt_size={}",
            address, port, port, packet_size
        ));
    } else {
        args.push("-srtp_out_suite".to_string());
        args.push(srtp.suite.ffmpeg_name().to_string());
        args.push("-srtp_out_params".to_string());
        args.push(srtp.key_salt_base64());
        args.push(format!(
            "srtp://{}:{}?rtcpport={}&pkt_size={}",
            address, port, port, packet_size
        ));
    }
    args
}

/// Argument vector for the return-audio decoder feeding the talkback
/// channel. Input SDP arrives on stdin, encoded audio leaves on stdout.
fn build_return_audio_args(sample_rate: u32) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.extend(
        [
            "-hide_banner",
            "-protocol_whitelist",
            "crypto,file,pipe,rtp,udp",
            "-f",
            "sdp",
            "-c:a",
            "libfdk_aac",
            "-i",
            "pipe:0",
            "-map",
            "0:a",
            "-c:a",
            "libfdk_aac",
            "-flags",
            "+global_header",
            "-ar",
        ]
        .map(String::from),
    );
    args.push(sample_rate.to_string());
    args.extend(["-ac", "1", "-b:a", "64k", "-f", "adts", "pipe:1"].map(String::from));
    args
}

/// Session description for the return-audio input: AAC-ELD over SRTP on
/// the demuxer's downstream pair.
fn build_talkback_sdp(family: IpFamily, rtp_port: u16, srtp: &SrtpParameters) -> String {
    let (ip_version, host) = match family {
        IpFamily::V4 => ("IP4", "127.0.0.1"),
        IpFamily::V6 => ("IP6", "::1"),
    };
    let mut sdp = format!(
        "v=0\r\n\
         o=- 0 0 IN {ip} {host}\r\n\
         s=TalkBack\r\n\
         c=IN {ip} {host}\r\n\
         t=0 0\r\n\
         m=audio {port} RTP/AVP 110\r\n\
         b=AS:24\r\n\
         a=rtpmap:110 MPEG4-GENERIC/16000/1\r\n\
         a=fmtp:110 profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3; config=F8F0212C00BC00\r\n",
        ip = ip_version,
        host = host,
        port = rtp_port,
    );
    if srtp.suite != SrtpCryptoSuite::Disabled {
        sdp.push_str(&format!(
            "a=crypto:1 {} inline:{}\r\n",
            srtp.suite.ffmpeg_name(),
            srtp.key_salt_base64()
        ));
    }
    sdp
}
