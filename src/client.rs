//! Client-side transport coordinator.
//!
//! One connection runs five tasks over a shared [`Session`]: capture,
//! playback, sender, receiver, and the liveness monitor. Any fatal fault
//! in one task cancels the whole set (fan-in cancellation); the owning
//! loop then waits a fixed backoff and dials again with a brand-new
//! session, so nothing partially consumed survives a reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::adpcm::{self, AdpcmState};
use crate::audio::{AudioFrame, AudioSink, AudioSource};
use crate::config::ClientConfig;
use crate::control::{ControlMessage, Emotion};
use crate::error::{LinkError, Result};
use crate::jitter::POP_WAIT;
use crate::session::Session;
use crate::state::{ConnectionEvent, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Cadence for the liveness monitor's idle check.
const LIVENESS_PERIOD: Duration = Duration::from_secs(1);
/// Sender back-off while capture is suspended.
const SENDER_IDLE_WAIT: Duration = Duration::from_millis(20);

pub struct Client {
    config: ClientConfig,
    sink: Arc<dyn AudioSink>,
    state_tx: watch::Sender<ConnectionState>,
    emotion_tx: watch::Sender<Emotion>,
}

impl Client {
    pub fn new(config: ClientConfig, sink: Arc<dyn AudioSink>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Offline);
        let (emotion_tx, _) = watch::channel(Emotion::Neutral);
        Self {
            config,
            sink,
            state_tx,
            emotion_tx,
        }
    }

    /// Presentation feed: last observed connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Presentation feed: last emotion hint from the server.
    pub fn watch_emotion(&self) -> watch::Receiver<Emotion> {
        self.emotion_tx.subscribe()
    }

    /// Connect and stream until the task is cancelled from outside.
    /// Retries forever on failure with a fixed backoff.
    pub async fn run(&self, mut source: Box<dyn AudioSource>) -> Result<()> {
        // Fail fast on a malformed endpoint instead of on every retry.
        let url = Url::parse(&self.config.server_url)?;

        loop {
            let session = Arc::new(Session::with_channels(
                self.config.queue_capacity,
                self.state_tx.clone(),
                self.emotion_tx.clone(),
            ));
            session.apply(ConnectionEvent::Dialing);

            log::info!("connecting to {}", url);
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    session.apply(ConnectionEvent::ConnectEstablished);
                    session.touch_inbound();
                    source = self.run_connection(ws, session, source).await?;
                }
                Err(e) => {
                    log::warn!("connect failed: {e}");
                    session.apply(ConnectionEvent::TransportFailed);
                }
            }

            log::info!(
                "reconnecting in {}s",
                self.config.reconnect_delay.as_secs()
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Run one established connection to completion. Returns the audio
    /// source so the next attempt can reuse the device.
    async fn run_connection(
        &self,
        ws: WsStream,
        session: Arc<Session>,
        source: Box<dyn AudioSource>,
    ) -> Result<Box<dyn AudioSource>> {
        let (writer, reader) = ws.split();
        let cancel = CancellationToken::new();
        let (ping_tx, ping_rx) = mpsc::channel::<()>(1);

        let capture = tokio::spawn(capture_task(source, session.clone(), cancel.clone()));
        let playback = tokio::spawn(playback_task(
            self.sink.clone(),
            session.clone(),
            cancel.clone(),
        ));
        let sender = tokio::spawn(sender_task(writer, session.clone(), ping_rx, cancel.clone()));
        let receiver = tokio::spawn(receiver_task(reader, session.clone(), cancel.clone()));
        let liveness = tokio::spawn(liveness_task(
            session.clone(),
            ping_tx,
            self.config.idle_timeout,
            self.config.probe_timeout,
            cancel.clone(),
        ));

        let (_, _, _, source_back) = tokio::join!(sender, receiver, liveness, capture);
        let source = source_back
            .map_err(|e| LinkError::Audio(format!("capture task failed: {e}")))?;
        playback
            .await
            .map_err(|e| LinkError::Audio(format!("playback task failed: {e}")))?;

        if session.state() != ConnectionState::Disconnected {
            session.apply(ConnectionEvent::TransportFailed);
        }
        Ok(source)
    }
}

/// Read device frames; encode and enqueue them while the state machine
/// allows capture, drop them otherwise. The encoder state is exclusive to
/// this task and lives exactly as long as the connection.
async fn capture_task(
    mut source: Box<dyn AudioSource>,
    session: Arc<Session>,
    cancel: CancellationToken,
) -> Box<dyn AudioSource> {
    let mut encoder = AdpcmState::default();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => frame,
        };
        match frame {
            Ok(frame) => {
                if !session.state().accepts_capture() {
                    continue;
                }
                let block = adpcm::encode_block(frame.samples(), &mut encoder);
                if !session.outbound.push(block) {
                    log::warn!(
                        "outbound queue full, dropped a block ({} total)",
                        session.outbound.dropped()
                    );
                }
            }
            Err(e) => {
                // Device read failures are transient: log and keep going.
                log::warn!("audio capture error: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    source
}

/// Drain decoded frames to the playback device. Sink errors are transient.
async fn playback_task(sink: Arc<dyn AudioSink>, session: Arc<Session>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = session.inbound.pop(POP_WAIT) => frame,
        };
        if let Some(frame) = frame {
            if let Err(e) = sink.play(&frame).await {
                log::warn!("audio playback error: {e}");
            }
        }
    }
}

/// Own the write half: transmit queued blocks while capturing, service
/// liveness ping requests, and stay off the wire otherwise.
async fn sender_task(
    mut writer: WsWriter,
    session: Arc<Session>,
    mut ping_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let capturing = session.state().accepts_capture();
        let outcome: Option<Message> = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = ping_rx.recv() => Some(Message::Ping(Vec::new())),
            block = session.outbound.pop(POP_WAIT), if capturing => {
                block.map(Message::Binary)
            }
            _ = tokio::time::sleep(SENDER_IDLE_WAIT), if !capturing => None,
        };
        if let Some(message) = outcome {
            if let Err(e) = writer.send(message).await {
                log::warn!("send failed: {e}");
                session.apply(ConnectionEvent::TransportFailed);
                cancel.cancel();
                break;
            }
        }
    }
    let _ = writer.close().await;
}

/// Own the read half: control text goes to the state machine, audio is
/// decoded into the playback queue, and every inbound message feeds the
/// liveness clock.
async fn receiver_task(mut reader: WsReader, session: Arc<Session>, cancel: CancellationToken) {
    let mut decoder = AdpcmState::default();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                log::warn!("receive failed: {e}");
                session.apply(ConnectionEvent::TransportFailed);
                cancel.cancel();
                break;
            }
            None => {
                log::info!("server closed the connection");
                session.apply(ConnectionEvent::TransportFailed);
                cancel.cancel();
                break;
            }
        };

        session.touch_inbound();
        match message {
            Message::Text(text) => match ControlMessage::parse(&text) {
                Some(control) => {
                    session.handle_control(control);
                }
                None => log::debug!("ignoring unrecognized control text {text:?}"),
            },
            Message::Binary(block) => {
                if let Some(taken) = session.apply(ConnectionEvent::BinaryReceived) {
                    if taken.reset_playback_codec {
                        decoder.reset();
                    }
                }
                let frame = AudioFrame::new(adpcm::decode_block(&block, &mut decoder));
                if !session.inbound.push(frame) {
                    log::warn!(
                        "playback queue full, dropped a block ({} total)",
                        session.inbound.dropped()
                    );
                }
            }
            Message::Close(_) => {
                log::info!("server sent close");
                session.apply(ConnectionEvent::TransportFailed);
                cancel.cancel();
                break;
            }
            // Pings are answered by the websocket layer; pongs only matter
            // for the liveness clock, already touched above.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

/// Probe the link when inbound traffic dries up while capturing. Probe
/// success demotes Streaming to Idle; failure tears the connection down.
async fn liveness_task(
    session: Arc<Session>,
    ping_tx: mpsc::Sender<()>,
    idle_timeout: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(LIVENESS_PERIOD) => {}
        }
        if !session.state().accepts_capture() {
            continue;
        }
        if session.inbound_idle() < idle_timeout {
            continue;
        }

        log::debug!(
            "no inbound traffic for {:.0?}, sending liveness probe",
            session.inbound_idle()
        );
        let probe_start = Instant::now();
        if ping_tx.send(()).await.is_err() {
            break; // sender gone; its own failure path tears down
        }

        let mut answered = false;
        while probe_start.elapsed() < probe_timeout {
            if session.last_inbound() > probe_start {
                answered = true;
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }

        if answered {
            session.apply(ConnectionEvent::ProbeSucceeded);
        } else {
            log::warn!("liveness probe unanswered after {:.0?}", probe_timeout);
            session.apply(ConnectionEvent::ProbeFailed);
            cancel.cancel();
            break;
        }
    }
}
