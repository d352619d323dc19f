//! cpal-backed microphone and speaker.
//!
//! cpal streams are not Send, so each device lives on its own std thread
//! and talks to the async side over channels. Output is always mono 16kHz
//! s16le regardless of what the hardware runs at.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, AudioSink, AudioSource, FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{LinkError, Result};

/// Frames buffered between the capture thread and the async reader before
/// new frames are dropped.
const CAPTURE_QUEUE: usize = 100;

/// Playback queue limit in samples (~4s of audio).
const PLAYBACK_QUEUE_SAMPLES: usize = SAMPLE_RATE as usize * 4;

/// Microphone capture producing fixed-size 16kHz mono frames.
pub struct CpalMicrophone {
    frames: mpsc::Receiver<AudioFrame>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Result<Self> {
        let (frame_tx, frames) = mpsc::channel(CAPTURE_QUEUE);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || {
            match build_input_stream(frame_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Stream must stay alive on this thread.
                    while !thread_stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| LinkError::Audio("capture thread died during init".into()))??;

        Ok(Self {
            frames,
            stop,
            handle: Some(handle),
        })
    }
}

#[async_trait::async_trait]
impl AudioSource for CpalMicrophone {
    async fn next_frame(&mut self) -> Result<AudioFrame> {
        self.frames
            .recv()
            .await
            .ok_or_else(|| LinkError::Audio("capture stream ended".into()))
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn build_input_stream(frame_tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LinkError::Audio("no default input device".into()))?;
    log::info!("using input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| LinkError::Audio(e.to_string()))?;
    let config = supported.config();
    log::info!(
        "capture hardware: {}Hz, {} channels, {:?} -> {}Hz mono s16le",
        config.sample_rate.0,
        config.channels,
        supported.sample_format(),
        SAMPLE_RATE
    );

    let stream = match supported.sample_format() {
        SampleFormat::I16 => input_stream::<i16>(&device, &config, frame_tx)?,
        SampleFormat::U16 => input_stream::<u16>(&device, &config, frame_tx)?,
        SampleFormat::F32 => input_stream::<f32>(&device, &config, frame_tx)?,
        other => {
            return Err(LinkError::Audio(format!(
                "unsupported capture sample format: {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| LinkError::Audio(e.to_string()))?;
    Ok(stream)
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let hardware_rate = config.sample_rate.0;
    let step = hardware_rate as f32 / SAMPLE_RATE as f32;

    let mut raw: Vec<f32> = Vec::new();
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES);
    let mut cursor: f32 = 0.0;

    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                // Channel 0 only, converted to f32.
                for frame in data.chunks(channels) {
                    raw.push(f32::from_sample(frame[0]));
                }

                // Linear interpolation down to 16kHz. When the hardware is
                // already 16kHz, step is 1.0 and this degenerates to a copy.
                while (cursor.floor() as usize) + 1 < raw.len() {
                    let idx = cursor.floor() as usize;
                    let fract = cursor.fract();
                    let sample = raw[idx] * (1.0 - fract) + raw[idx + 1] * fract;
                    let clamped = sample.clamp(-1.0, 1.0);
                    pending.push((clamped * 32768.0).clamp(-32768.0, 32767.0) as i16);
                    cursor += step;

                    if pending.len() == FRAME_SAMPLES {
                        let frame = AudioFrame::new(std::mem::take(&mut pending));
                        pending = Vec::with_capacity(FRAME_SAMPLES);
                        // Drop on backpressure rather than stall the
                        // realtime callback.
                        if frame_tx.try_send(frame).is_err() {
                            log::debug!("capture queue full, dropping frame");
                        }
                    }
                }
                let consumed = cursor.floor() as usize;
                raw.drain(..consumed.min(raw.len()));
                cursor -= consumed as f32;
            },
            |err| log::error!("capture stream error: {err}"),
            None,
        )
        .map_err(|e| LinkError::Audio(e.to_string()))
}

/// Speaker playback at whatever the default output device runs, fed with
/// 16kHz mono frames and interpolated up in the output callback.
pub struct CpalSpeaker {
    queue: Arc<Mutex<Vec<f32>>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CpalSpeaker {
    pub fn new() -> Result<Self> {
        let queue = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread_queue = queue.clone();
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            match build_output_stream(thread_queue) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while !thread_stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| LinkError::Audio("playback thread died during init".into()))??;

        Ok(Self {
            queue,
            stop,
            handle: Some(handle),
        })
    }
}

#[async_trait::async_trait]
impl AudioSink for CpalSpeaker {
    async fn play(&self, frame: &AudioFrame) -> Result<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| LinkError::Audio("playback queue poisoned".into()))?;
        if queue.len() + frame.len() > PLAYBACK_QUEUE_SAMPLES {
            return Err(LinkError::Audio("playback buffer full".into()));
        }
        queue.extend(
            frame
                .samples()
                .iter()
                .map(|&s| s as f32 / i16::MAX as f32),
        );
        Ok(())
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn build_output_stream(queue: Arc<Mutex<Vec<f32>>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LinkError::Audio("no default output device".into()))?;
    log::info!("using output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| LinkError::Audio(e.to_string()))?;
    let output_rate = supported.sample_rate().0;
    let output_channels = supported.channels() as usize;
    let step = SAMPLE_RATE as f32 / output_rate as f32;

    let stream = device
        .build_output_stream(
            &supported.config(),
            move |data: &mut [f32], _| {
                let mut queue = match queue.lock() {
                    Ok(q) => q,
                    Err(_) => return,
                };
                let mut cursor: f32 = 0.0;
                for frame in data.chunks_mut(output_channels) {
                    // Linear interpolation from the 16kHz queue; silence
                    // once the queue runs dry.
                    let idx = cursor.floor() as usize;
                    let fract = cursor.fract();
                    let a = queue.get(idx).copied().unwrap_or(0.0);
                    let b = queue.get(idx + 1).copied().unwrap_or(0.0);
                    let sample = a * (1.0 - fract) + b * fract;
                    for channel in frame.iter_mut() {
                        *channel = sample;
                    }
                    cursor += step;
                }
                let consumed = (cursor.ceil() as usize).min(queue.len());
                queue.drain(..consumed);
            },
            |err| log::error!("playback stream error: {err}"),
            None,
        )
        .map_err(|e| LinkError::Audio(e.to_string()))?;
    stream
        .play()
        .map_err(|e| LinkError::Audio(e.to_string()))?;
    Ok(stream)
}
