//! Per-connection session aggregate.
//!
//! All state shared between the coordinator's tasks lives here: the two
//! jitter buffers, the authoritative connection state, the presentation
//! watch channels, and the last-inbound clock for liveness. A session is
//! created per connection attempt and discarded on teardown, so no
//! partially-consumed state survives a reconnect.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::audio::AudioFrame;
use crate::control::{ControlMessage, Emotion};
use crate::jitter::JitterBuffer;
use crate::state::{transition, ConnectionEvent, ConnectionState, Transition};

pub struct Session {
    /// Encoded blocks waiting to be sent upstream.
    pub outbound: JitterBuffer<Vec<u8>>,
    /// Decoded frames waiting for playback.
    pub inbound: JitterBuffer<AudioFrame>,
    state: Mutex<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    emotion_tx: watch::Sender<Emotion>,
    last_inbound: Mutex<Instant>,
}

impl Session {
    pub fn new(queue_capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Offline);
        let (emotion_tx, _) = watch::channel(Emotion::Neutral);
        Self::with_channels(queue_capacity, state_tx, emotion_tx)
    }

    /// Build a session reporting into long-lived watch channels, so
    /// presentation observers survive reconnects even though sessions do
    /// not.
    pub fn with_channels(
        queue_capacity: usize,
        state_tx: watch::Sender<ConnectionState>,
        emotion_tx: watch::Sender<Emotion>,
    ) -> Self {
        Self {
            outbound: JitterBuffer::new(queue_capacity),
            inbound: JitterBuffer::new(queue_capacity),
            state: Mutex::new(ConnectionState::Offline),
            state_tx,
            emotion_tx,
            last_inbound: Mutex::new(Instant::now()),
        }
    }

    /// Instant of the most recent inbound traffic of any kind.
    pub fn last_inbound(&self) -> Instant {
        *self.last_inbound.lock().expect("session clock poisoned")
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("session state poisoned")
    }

    /// Apply an event under the session lock. Returns the transition taken,
    /// with its queue-clearing side effect already performed; `None` means
    /// the event had no defined edge and was ignored.
    pub fn apply(&self, event: ConnectionEvent) -> Option<Transition> {
        let mut state = self.state.lock().expect("session state poisoned");
        let taken = transition(*state, event)?;
        let from = *state;
        *state = taken.next;
        drop(state);

        if taken.clear_queues {
            let cleared = self.outbound.clear() + self.inbound.clear();
            if cleared > 0 {
                log::debug!("cleared {} queued items on {} -> {}", cleared, from, taken.next);
            }
        }
        if from != taken.next {
            log::info!("connection state {} -> {}", from, taken.next);
            let _ = self.state_tx.send(taken.next);
        }
        Some(taken)
    }

    /// Route a parsed control message: emotion hints update the
    /// presentation channel, everything else goes through the state
    /// machine.
    pub fn handle_control(&self, msg: ControlMessage) -> Option<Transition> {
        if let ControlMessage::EmotionHint(emotion) = msg {
            log::debug!("emotion hint: {}", emotion);
            let _ = self.emotion_tx.send(emotion);
            return None;
        }
        self.apply(ConnectionEvent::Control(msg))
    }

    pub fn touch_inbound(&self) {
        *self.last_inbound.lock().expect("session clock poisoned") = Instant::now();
    }

    pub fn inbound_idle(&self) -> Duration {
        self.last_inbound
            .lock()
            .expect("session clock poisoned")
            .elapsed()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn watch_emotion(&self) -> watch::Receiver<Emotion> {
        self.emotion_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_session() -> Session {
        let session = Session::new(8);
        session.apply(ConnectionEvent::Dialing).unwrap();
        session.apply(ConnectionEvent::ConnectEstablished).unwrap();
        session
    }

    #[test]
    fn processing_start_drains_both_queues() {
        let session = connected_session();
        session.outbound.push(vec![1, 2, 3]);
        session.inbound.push(AudioFrame::silence(4));

        session
            .handle_control(ControlMessage::ProcessingStart)
            .unwrap();
        assert_eq!(session.state(), ConnectionState::AwaitingResponse);
        assert!(session.outbound.is_empty());
        assert!(session.inbound.is_empty());
    }

    #[test]
    fn binary_during_await_requests_codec_reset() {
        let session = connected_session();
        session
            .handle_control(ControlMessage::ProcessingStart)
            .unwrap();

        let taken = session.apply(ConnectionEvent::BinaryReceived).unwrap();
        assert!(taken.reset_playback_codec);
        assert_eq!(session.state(), ConnectionState::PlayingResponse);

        // Further audio is a no-op edge.
        assert!(session.apply(ConnectionEvent::BinaryReceived).is_none());
    }

    #[test]
    fn emotion_hint_feeds_the_watch_channel_only() {
        let session = connected_session();
        let emotion_rx = session.watch_emotion();
        let before = session.state();

        assert!(session
            .handle_control(ControlMessage::EmotionHint(Emotion::Happy))
            .is_none());
        assert_eq!(session.state(), before);
        assert_eq!(*emotion_rx.borrow(), Emotion::Happy);
    }

    #[test]
    fn state_watchers_observe_transitions() {
        let session = Session::new(8);
        let state_rx = session.watch_state();
        session.apply(ConnectionEvent::Dialing).unwrap();
        session.apply(ConnectionEvent::ConnectEstablished).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Streaming);
    }

    #[test]
    fn undefined_events_leave_the_session_untouched() {
        let session = Session::new(8);
        session.outbound.push(vec![0]);
        assert!(session.apply(ConnectionEvent::BinaryReceived).is_none());
        assert_eq!(session.state(), ConnectionState::Offline);
        assert_eq!(session.outbound.len(), 1);
    }
}
