//! Transcoder - External ffmpeg Process Supervision
//!
//! ## Responsibilities
//!
//! - Spawn ffmpeg with a prepared argument vector
//! - Watch stderr for the first-frame signal and keep a rolling log tail
//! - Classify process exit (cancelled / clean / failed) and report it
//!
//! Each spawned process gets exactly one event channel carrying
//! [`ProcessEvent`]s in order: at most one `FirstFrame`, then one terminal
//! `Exited`, after which the channel closes. Callers that miss the window
//! observe the closed channel instead of a stale flag.
//!
//! Uses kill_on_drop(true) so an ffmpeg instance can never outlive its
//! handle, even when the owning session is dropped mid-teardown.

use crate::error::{Error, Result};
use crate::hap::SessionId;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::{mpsc, Notify};

/// Lines of stderr retained for diagnostics.
const STDERR_LOG_LINES: usize = 50;

/// How long a stopped process gets to exit on SIGTERM before the hard kill.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Markers ffmpeg prints when the input analysis window was too small.
const PROBE_SHORTFALL_MARKERS: [&str; 2] = [
    "could not find codec parameters",
    "consider increasing probesize",
];

/// Events emitted by a supervised process, in order, on a single channel.
#[derive(Debug)]
pub enum ProcessEvent {
    /// First stderr output observed; the stream is producing frames.
    FirstFrame,
    /// Terminal event; the channel closes after this.
    Exited(ExitOutcome),
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// Terminated by `stop()`; expected during session teardown.
    Cancelled,
    /// Exited on its own with status 0.
    CleanExit,
    /// Exited on its own with a non-zero status.
    Failed {
        /// True when the process never produced a frame; routes the error
        /// back to the start call instead of through a forced stop.
        before_first_frame: bool,
        code: Option<i32>,
        log_tail: String,
        /// The failure is the input-analysis shortfall, not a hard error.
        probe_shortfall: bool,
    },
}

/// Handle to a supervised ffmpeg process.
///
/// Dropping the handle does not kill the process; the monitor task keeps
/// running until exit. Call [`stop`](TranscodeHandle::stop) for teardown.
pub struct TranscodeHandle {
    camera_id: String,
    session_id: SessionId,
    cancelled: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    log: Arc<Mutex<VecDeque<String>>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl TranscodeHandle {
    /// Spawn `program` with `args` and start supervising it.
    ///
    /// `input` is written to the process stdin and the pipe closed; the
    /// return-audio path feeds its SDP document this way. Returns the
    /// handle plus the event receiver for this process. The receiver
    /// yields `FirstFrame` (at most once) and then `Exited`.
    pub fn spawn(
        program: &str,
        args: &[String],
        input: Option<Vec<u8>>,
        camera_id: &str,
        session_id: &SessionId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        tracing::debug!(
            camera_id = %camera_id,
            session_id = %session_id,
            command = %format!("{} {}", program, args.join(" ")),
            "Spawning transcoder"
        );

        let stdin_mode = if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(stdin_mode)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ProcessStartup(format!("{} not found - is it installed?", program))
                } else {
                    Error::ProcessStartup(format!("{} spawn failed: {}", program, e))
                }
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            Error::ProcessStartup(format!("{}: stderr pipe unavailable", program))
        })?;
        let stdout = child.stdout.take();

        if let Some(data) = input {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = stdin.write_all(&data).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_LOG_LINES)));
        let first_frame = Arc::new(AtomicBool::new(false));

        // stderr reader: first-frame signal plus the rolling log tail.
        let reader_task = {
            let tx = tx.clone();
            let log = log.clone();
            let first_frame = first_frame.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !first_frame.swap(true, Ordering::SeqCst) {
                        let _ = tx.send(ProcessEvent::FirstFrame);
                    }
                    let mut log = log.lock().unwrap_or_else(|e| e.into_inner());
                    if log.len() == STDERR_LOG_LINES {
                        log.pop_front();
                    }
                    log.push_back(line);
                }
            })
        };

        // Monitor: owns the child, reaps it, classifies the exit.
        {
            let camera_id = camera_id.to_string();
            let session_id = session_id.clone();
            let cancelled = cancelled.clone();
            let stop_signal = stop_signal.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = stop_signal.notified() => {
                        // SIGTERM first; ffmpeg flushes and sends RTCP BYE
                        // on it. The hard kill waits out the grace window.
                        #[cfg(unix)]
                        {
                            if let Some(pid) = child.id() {
                                unsafe {
                                    nix::libc::kill(pid as i32, nix::libc::SIGTERM);
                                }
                            }
                        }
                        tokio::select! {
                            status = child.wait() => status,
                            _ = tokio::time::sleep(STOP_GRACE) => {
                                tracing::debug!(
                                    session_id = %session_id,
                                    "Transcoder ignored SIGTERM, killing"
                                );
                                if let Err(e) = child.start_kill() {
                                    tracing::debug!(
                                        session_id = %session_id,
                                        error = %e,
                                        "Transcoder kill after exit"
                                    );
                                }
                                child.wait().await
                            }
                        }
                    }
                };

                // Let the reader drain stderr so the log tail is complete
                // and FirstFrame is ordered before Exited.
                let _ = reader_task.await;

                let outcome = match status {
                    _ if cancelled.load(Ordering::SeqCst) => ExitOutcome::Cancelled,
                    Ok(status) if status.success() => ExitOutcome::CleanExit,
                    Ok(status) => {
                        let log_tail = {
                            let log = log.lock().unwrap_or_else(|e| e.into_inner());
                            log.iter().cloned().collect::<Vec<_>>().join("\n")
                        };
                        let lowered = log_tail.to_lowercase();
                        let probe_shortfall = PROBE_SHORTFALL_MARKERS
                            .iter()
                            .any(|marker| lowered.contains(marker));
                        ExitOutcome::Failed {
                            before_first_frame: !first_frame.load(Ordering::SeqCst),
                            code: status.code(),
                            log_tail,
                            probe_shortfall,
                        }
                    }
                    Err(e) => ExitOutcome::Failed {
                        before_first_frame: !first_frame.load(Ordering::SeqCst),
                        code: None,
                        log_tail: format!("wait failed: {}", e),
                        probe_shortfall: false,
                    },
                };

                tracing::debug!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    outcome = ?outcome_label(&outcome),
                    "Transcoder exited"
                );
                let _ = tx.send(ProcessEvent::Exited(outcome));
                // tx drops here; the channel closes after the terminal event.
            });
        }

        Ok((
            Self {
                camera_id: camera_id.to_string(),
                session_id: session_id.clone(),
                cancelled,
                stop_signal,
                log,
                stdout: Mutex::new(stdout),
            },
            rx,
        ))
    }

    /// Request termination. Idempotent; safe to call after exit.
    pub fn stop(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            camera_id = %self.camera_id,
            session_id = %self.session_id,
            "Stopping transcoder"
        );
        self.stop_signal.notify_one();
    }

    /// Take the process stdout pipe, once.
    ///
    /// Used by the talkback path, where ffmpeg writes encoded return audio
    /// to stdout for relaying upstream.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Snapshot of the rolling stderr tail, for error reporting.
    pub fn log_tail(&self) -> String {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn outcome_label(outcome: &ExitOutcome) -> &'static str {
    match outcome {
        ExitOutcome::Cancelled => "cancelled",
        ExitOutcome::CleanExit => "clean",
        ExitOutcome::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> ProcessEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("event timeout")
            .expect("channel closed early")
    }

    #[tokio::test]
    async fn test_clean_exit() {
        let (_handle, mut rx) =
            TranscodeHandle::spawn("sh", &sh("exit 0"), None, "cam-1", &"s1".to_string()).unwrap();

        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::CleanExit) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        // Terminal event closes the channel.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_frame() {
        let (_handle, mut rx) =
            TranscodeHandle::spawn("sh", &sh("exit 3"), None, "cam-1", &"s1".to_string()).unwrap();

        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Failed {
                before_first_frame,
                code,
                ..
            }) => {
                assert!(before_first_frame);
                assert_eq!(code, Some(3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_frame_precedes_failure() {
        let (_handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("echo 'frame=1 fps=30' >&2; exit 2"),
            None,
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        match next_event(&mut rx).await {
            ProcessEvent::FirstFrame => {}
            other => panic!("expected first frame, got {:?}", other),
        }
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Failed {
                before_first_frame,
                log_tail,
                ..
            }) => {
                assert!(!before_first_frame);
                assert!(log_tail.contains("frame=1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_shortfall_detection() {
        let (_handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("echo 'Could not find codec parameters for stream 0' >&2; exit 1"),
            None,
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        // The diagnostic line doubles as the first-frame signal.
        match next_event(&mut rx).await {
            ProcessEvent::FirstFrame => {}
            other => panic!("expected first frame, got {:?}", other),
        }
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Failed {
                probe_shortfall, ..
            }) => assert!(probe_shortfall),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_shortfall_detects_probesize_hint() {
        // ffmpeg sometimes emits only the probesize hint, without the
        // codec-parameters line.
        let (_handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("echo 'Consider increasing probesize' >&2; exit 1"),
            None,
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        match next_event(&mut rx).await {
            ProcessEvent::FirstFrame => {}
            other => panic!("expected first frame, got {:?}", other),
        }
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Failed {
                probe_shortfall, ..
            }) => assert!(probe_shortfall),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_yields_cancelled() {
        let (handle, mut rx) =
            TranscodeHandle::spawn("sh", &sh("sleep 30"), None, "cam-1", &"s1".to_string()).unwrap();

        handle.stop();
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Cancelled) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_delivers_term_before_kill() {
        // The trap only fires on a catchable signal; a straight kill
        // never runs it. The background sleep drops the pipes so EOF
        // is not held open past the trap.
        let (handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("trap 'echo cleanup-ran >&2; exit 0' TERM; echo up >&2; sleep 30 >/dev/null 2>&1 & wait $!"),
            None,
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        match next_event(&mut rx).await {
            ProcessEvent::FirstFrame => {}
            other => panic!("expected first frame, got {:?}", other),
        }
        handle.stop();
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Cancelled) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(handle.log_tail().contains("cleanup-ran"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (handle, mut rx) =
            TranscodeHandle::spawn("sh", &sh("sleep 30"), None, "cam-1", &"s1".to_string()).unwrap();

        handle.stop();
        handle.stop();
        match next_event(&mut rx).await {
            ProcessEvent::Exited(ExitOutcome::Cancelled) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        handle.stop();
    }

    #[tokio::test]
    async fn test_log_tail_is_bounded() {
        let (handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("i=0; while [ $i -lt 200 ]; do echo line-$i >&2; i=$((i+1)); done; exit 1"),
            None,
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        loop {
            match next_event(&mut rx).await {
                ProcessEvent::FirstFrame => continue,
                ProcessEvent::Exited(ExitOutcome::Failed { log_tail, .. }) => {
                    let lines: Vec<&str> = log_tail.lines().collect();
                    assert!(lines.len() <= STDERR_LOG_LINES);
                    assert_eq!(*lines.last().unwrap(), "line-199");
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        drop(handle);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = TranscodeHandle::spawn(
            "definitely-not-a-real-binary",
            &sh("true"),
            None,
            "cam-1",
            &"s1".to_string(),
        );
        assert!(matches!(result, Err(Error::ProcessStartup(_))));
    }

    #[tokio::test]
    async fn test_input_is_delivered_on_stdin() {
        // cat copies stdin to stderr, so the input shows up in the log tail.
        let (_handle, mut rx) = TranscodeHandle::spawn(
            "sh",
            &sh("cat >&2; exit 1"),
            Some(b"v=0 session-description".to_vec()),
            "cam-1",
            &"s1".to_string(),
        )
        .unwrap();

        loop {
            match next_event(&mut rx).await {
                ProcessEvent::FirstFrame => continue,
                ProcessEvent::Exited(ExitOutcome::Failed { log_tail, .. }) => {
                    assert!(log_tail.contains("v=0 session-description"));
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
