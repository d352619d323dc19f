//! # Duplex Protocol Tests
//!
//! End-to-end tests that run a real server on a loopback socket and drive
//! it with a raw websocket client speaking the wire protocol: ADPCM binary
//! frames inbound, control tokens and a paced response stream outbound.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use voicelink::adpcm::{self, AdpcmState};
use voicelink::audio::FRAME_SAMPLES;
use voicelink::config::ServerConfig;
use voicelink::endpoint::Utterance;
use voicelink::pipeline::{DialoguePipeline, EchoPipeline, PipelineResponse};
use voicelink::server::Server;
use voicelink::vad::LevelFactory;
use voicelink::Result;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decoded peak level that counts as speech for the test classifier.
/// Client-side PCM passes through the codec gain stages at roughly 1.5x,
/// so an amplitude of 2000 lands well clear of this.
const SPEECH_LEVEL: i16 = 1000;

async fn start_server(pipeline: Arc<dyn DialoguePipeline>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        bind_addr: addr.to_string(),
        ..ServerConfig::default()
    };
    let server = Server::new(
        config,
        Arc::new(LevelFactory {
            level: SPEECH_LEVEL,
        }),
        pipeline,
    )
    .unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

async fn connect(addr: std::net::SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws
}

async fn recv(ws: &mut WsClient) -> Message {
    timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for server message")
        .expect("connection closed")
        .expect("websocket error")
}

async fn send_frames(ws: &mut WsClient, encoder: &mut AdpcmState, amplitude: i16, count: usize) {
    for _ in 0..count {
        let samples = vec![amplitude; FRAME_SAMPLES];
        let block = adpcm::encode_block(&samples, encoder);
        ws.send(Message::Binary(block)).await.unwrap();
    }
}

#[tokio::test]
async fn full_exchange_echoes_utterance() {
    let addr = start_server(Arc::new(EchoPipeline)).await;
    let mut ws = connect(addr).await;
    let mut encoder = AdpcmState::default();

    // Two leading quiet frames become pre-roll, three loud frames are
    // speech, thirty quiet frames close the utterance.
    send_frames(&mut ws, &mut encoder, 0, 2).await;
    send_frames(&mut ws, &mut encoder, 2000, 3).await;
    send_frames(&mut ws, &mut encoder, 0, 30).await;

    match recv(&mut ws).await {
        Message::Text(t) => assert_eq!(t, "LISTENING"),
        other => panic!("expected LISTENING, got {other:?}"),
    }
    match recv(&mut ws).await {
        Message::Text(t) => assert_eq!(t, "PROCESSING_START"),
        other => panic!("expected PROCESSING_START, got {other:?}"),
    }
    match recv(&mut ws).await {
        Message::Text(t) => assert_eq!(t, "00"),
        other => panic!("expected emotion code, got {other:?}"),
    }

    // Echoed audio: pre-roll + speech + silence tail, then the end token.
    let mut binary_frames = 0usize;
    loop {
        match recv(&mut ws).await {
            Message::Binary(block) => {
                assert_eq!(block.len(), FRAME_SAMPLES / 2);
                binary_frames += 1;
            }
            Message::Text(t) => {
                assert_eq!(t, "TTS_END");
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    // Codec ringing right after the loud frames can classify as speech
    // for a frame or two, stretching the utterance slightly.
    assert!(
        (30..=33).contains(&binary_frames),
        "expected pre-roll + speech + tail, got {binary_frames} frames"
    );
}

/// Pipeline that holds the busy flag long enough for the test to shove
/// more audio at the server mid-response.
struct SlowPipeline;

#[async_trait::async_trait]
impl DialoguePipeline for SlowPipeline {
    async fn respond(&self, _utterance: &Utterance) -> Result<PipelineResponse> {
        tokio::time::sleep(Duration::from_millis(800)).await;
        Ok(PipelineResponse {
            audio: Vec::new(),
            emotion: Default::default(),
        })
    }
}

#[tokio::test]
async fn audio_during_response_is_discarded() {
    let addr = start_server(Arc::new(SlowPipeline)).await;
    let mut ws = connect(addr).await;
    let mut encoder = AdpcmState::default();

    send_frames(&mut ws, &mut encoder, 2000, 2).await;
    send_frames(&mut ws, &mut encoder, 0, 30).await;

    // Wait for the first response to start, then talk over it.
    let mut saw_processing = false;
    while !saw_processing {
        if let Message::Text(t) = recv(&mut ws).await {
            if t == "PROCESSING_START" {
                saw_processing = true;
            }
        }
    }
    send_frames(&mut ws, &mut encoder, 2000, 2).await;
    send_frames(&mut ws, &mut encoder, 0, 30).await;

    // Drain until the end token; the second utterance must leave no trace.
    let mut listening = 0usize;
    let mut processing = 0usize;
    loop {
        match recv(&mut ws).await {
            Message::Text(t) if t == "TTS_END" => break,
            Message::Text(t) if t == "LISTENING" => listening += 1,
            Message::Text(t) if t == "PROCESSING_START" => processing += 1,
            _ => {}
        }
    }
    assert_eq!(listening, 0);
    assert_eq!(processing, 0);

    // Nothing further arrives after the end token.
    let quiet = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(quiet.is_err(), "server sent a message after TTS_END");
}

/// Pipeline that always fails; the end token must still go out.
struct FailingPipeline;

#[async_trait::async_trait]
impl DialoguePipeline for FailingPipeline {
    async fn respond(&self, _utterance: &Utterance) -> Result<PipelineResponse> {
        Err(voicelink::LinkError::Pipeline("model unavailable".into()))
    }
}

#[tokio::test]
async fn pipeline_failure_still_sends_end_token() {
    let addr = start_server(Arc::new(FailingPipeline)).await;
    let mut ws = connect(addr).await;
    let mut encoder = AdpcmState::default();

    send_frames(&mut ws, &mut encoder, 2000, 2).await;
    send_frames(&mut ws, &mut encoder, 0, 30).await;

    let mut saw_end = false;
    for _ in 0..4 {
        match recv(&mut ws).await {
            Message::Text(t) if t == "TTS_END" => {
                saw_end = true;
                break;
            }
            Message::Text(_) => {}
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(saw_end, "no TTS_END after pipeline failure");

    // The connection is usable again for the next utterance.
    send_frames(&mut ws, &mut encoder, 2000, 2).await;
    match recv(&mut ws).await {
        Message::Text(t) => assert_eq!(t, "LISTENING"),
        other => panic!("expected LISTENING, got {other:?}"),
    }
}
