//! Server-side session handler.
//!
//! Each accepted websocket gets its own reader loop (inbound decode,
//! speech classification, endpoint detection), a single writer task, and
//! at most one in-flight dialogue invocation guarded by the busy flag.
//! While busy, inbound audio is discarded — not queued — so one utterance
//! is processed at a time per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::adpcm::{self, AdpcmState};
use crate::archive::UtteranceArchive;
use crate::audio::AudioFrame;
use crate::config::ServerConfig;
use crate::control;
use crate::endpoint::{EndpointDetector, EndpointEvent, Utterance};
use crate::error::Result;
use crate::pipeline::DialoguePipeline;
use crate::vad::ClassifierFactory;

/// Gap between outgoing response blocks: half a frame of audio, so bursts
/// stay bounded but transmission still outruns playback.
const RESPONSE_PACING: Duration = Duration::from_millis(16);

/// Outgoing message backlog per connection before senders await.
const WRITER_QUEUE: usize = 64;

pub struct Server {
    config: ServerConfig,
    classifiers: Arc<dyn ClassifierFactory>,
    pipeline: Arc<dyn DialoguePipeline>,
    archive: Option<Arc<UtteranceArchive>>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        classifiers: Arc<dyn ClassifierFactory>,
        pipeline: Arc<dyn DialoguePipeline>,
    ) -> Result<Self> {
        let archive = match &config.archive_dir {
            Some(dir) => Some(Arc::new(UtteranceArchive::new(dir)?)),
            None => None,
        };
        Ok(Self {
            config,
            classifiers,
            pipeline,
            archive,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener (tests bind port 0).
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    log::warn!("connection from {peer} ended with error: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        log::info!("client connected from {peer}");
        let (mut writer, mut reader) = ws.split();

        // Single-writer discipline: everything outgoing funnels through
        // one task, so the response stream and control tokens interleave
        // in a defined order.
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(WRITER_QUEUE);
        let writer_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = writer.send(message).await {
                    log::warn!("send failed: {e}");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        let mut classifier = self.classifiers.make()?;
        let mut detector = EndpointDetector::new(self.config.endpoint.clone());
        let mut decoder = AdpcmState::default();
        let busy = Arc::new(AtomicBool::new(false));

        while let Some(next) = reader.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    log::info!("client {peer} dropped: {e}");
                    break;
                }
            };
            match message {
                Message::Binary(block) => {
                    if busy.load(Ordering::Acquire) {
                        // Single flight: discard, never queue.
                        continue;
                    }
                    let frame = AudioFrame::new(adpcm::decode_block(&block, &mut decoder));
                    let probability = match classifier.probability(&frame) {
                        Ok(p) => p,
                        Err(e) => {
                            log::warn!("classifier error, skipping frame: {e}");
                            continue;
                        }
                    };
                    match detector.feed(frame, probability) {
                        Some(EndpointEvent::Start) => {
                            let _ = out_tx
                                .send(Message::Text(control::LISTENING.to_string()))
                                .await;
                        }
                        Some(EndpointEvent::End(utterance)) => {
                            log::info!(
                                "utterance from {peer}: {} frames, {:.2}s",
                                utterance.frame_count(),
                                utterance.duration().as_secs_f32()
                            );
                            busy.store(true, Ordering::Release);
                            let _ = out_tx
                                .send(Message::Text(control::PROCESSING_START.to_string()))
                                .await;
                            if let Some(archive) = &self.archive {
                                if let Err(e) = archive.save(&utterance) {
                                    log::warn!("archive failed: {e}");
                                }
                            }
                            tokio::spawn(respond(
                                self.pipeline.clone(),
                                utterance,
                                out_tx.clone(),
                                busy.clone(),
                            ));
                        }
                        _ => {}
                    }
                }
                Message::Text(text) => {
                    // Clients have no control vocabulary today.
                    log::debug!("ignoring text from {peer}: {text:?}");
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        drop(out_tx);
        let _ = writer_task.await;
        log::info!("client {peer} disconnected");
        Ok(())
    }
}

/// Invoke the dialogue pipeline and stream its answer back: emotion hint,
/// encoded audio blocks from a fresh codec state, then the response-end
/// token. The end token goes out even when the pipeline fails, so the
/// client is never left stuck waiting; only then does busy clear.
async fn respond(
    pipeline: Arc<dyn DialoguePipeline>,
    utterance: Utterance,
    out_tx: mpsc::Sender<Message>,
    busy: Arc<AtomicBool>,
) {
    match pipeline.respond(&utterance).await {
        Ok(response) => {
            let _ = out_tx
                .send(Message::Text(response.emotion.code().to_string()))
                .await;
            // Fresh stream, fresh codec state; the client resets its
            // decoder on the first binary frame to match.
            let mut encoder = AdpcmState::default();
            log::debug!("streaming {} response frames", response.audio.len());
            for frame in &response.audio {
                let block = adpcm::encode_block(frame.samples(), &mut encoder);
                if out_tx.send(Message::Binary(block)).await.is_err() {
                    break;
                }
                tokio::time::sleep(RESPONSE_PACING).await;
            }
        }
        Err(e) => {
            // Contained here; treated as an empty response.
            log::warn!("dialogue pipeline failed: {e}");
        }
    }
    let _ = out_tx
        .send(Message::Text(control::RESPONSE_END.to_string()))
        .await;
    busy.store(false, Ordering::Release);
}
