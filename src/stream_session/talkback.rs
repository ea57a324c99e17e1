//! Talkback signaling channel.
//!
//! Return audio travels as a WebSocket binary stream to the controller,
//! which plays it out the camera speaker. The bridge side is a pump: read
//! encoded audio from the return-audio transcoder's stdout, write each
//! chunk as one binary frame. Controllers send nothing meaningful back on
//! this channel, so inbound frames are drained and dropped.

use crate::error::{Error, Result};
use crate::hap::SessionId;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};

const AUDIO_CHUNK_SIZE: usize = 1024;

/// One session's talkback connection.
pub struct TalkbackStream {
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TalkbackStream {
    /// Connect to the signaling URL and start pumping `audio` into it.
    ///
    /// Controller appliances use self-signed certificates, so validation
    /// is disabled for `wss://` endpoints.
    pub async fn connect<R>(
        url: &str,
        audio: R,
        camera_id: &str,
        session_id: &SessionId,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Talkback(format!("TLS setup failed: {}", e)))?;

        let (ws, _) =
            connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
                .await
                .map_err(|e| Error::Talkback(format!("signaling connect failed: {}", e)))?;

        tracing::debug!(
            camera_id = %camera_id,
            session_id = %session_id,
            "Talkback signaling channel connected"
        );

        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());

        let task = {
            let shutdown = shutdown.clone();
            let camera_id = camera_id.to_string();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let (mut sink, mut source) = ws.split();
                let mut audio = audio;
                let mut buf = [0u8; AUDIO_CHUNK_SIZE];
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        read = audio.read(&mut buf) => match read {
                            Ok(0) => {
                                tracing::debug!(
                                    camera_id = %camera_id,
                                    session_id = %session_id,
                                    "Return audio ended"
                                );
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            Ok(n) => {
                                if let Err(e) = sink.send(Message::Binary(buf[..n].to_vec())).await {
                                    tracing::warn!(
                                        camera_id = %camera_id,
                                        session_id = %session_id,
                                        error = %e,
                                        "Talkback send failed"
                                    );
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    camera_id = %camera_id,
                                    session_id = %session_id,
                                    error = %e,
                                    "Return audio read failed"
                                );
                                break;
                            }
                        },
                        inbound = source.next() => match inbound {
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::debug!(
                                    camera_id = %camera_id,
                                    session_id = %session_id,
                                    "Signaling channel closed by peer"
                                );
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(
                                    camera_id = %camera_id,
                                    session_id = %session_id,
                                    error = %e,
                                    "Signaling channel error"
                                );
                                break;
                            }
                        },
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

    /// Tear down the pump and the connection. Idempotent.
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

impl Drop for TalkbackStream {
    fn drop(&mut self) {
        self.close();
    }
}
