//! Presentation mapping for display front-ends.
//!
//! Purely observational: consumes the session's state and emotion watch
//! channels and never feeds anything back into the protocol.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::control::Emotion;
use crate::state::ConnectionState;

/// Display asset shown for a given connection state and emotion hint.
pub fn face_asset(state: ConnectionState, emotion: Emotion) -> &'static str {
    match state {
        ConnectionState::Offline => "blank",
        ConnectionState::Disconnected => "stunned",
        ConnectionState::Idle => "roaming",
        ConnectionState::AwaitingResponse => "thinking",
        ConnectionState::Streaming | ConnectionState::PlayingResponse => match emotion {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
        },
    }
}

/// Log the face that would be displayed whenever state or emotion changes.
/// Stops when both senders are gone (session teardown).
pub fn spawn_observer(
    mut state_rx: watch::Receiver<ConnectionState>,
    mut emotion_rx: watch::Receiver<Emotion>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = *state_rx.borrow_and_update();
            let emotion = *emotion_rx.borrow_and_update();
            log::info!("face: {} ({} / {})", face_asset(state, emotion), state, emotion);

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = emotion_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
