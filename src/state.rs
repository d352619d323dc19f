//! Connection lifecycle state machine.
//!
//! The transition table is the single source of truth for when audio may
//! flow in which direction. Events with no defined edge from the current
//! state are ignored, never partially applied; queue clearing and codec
//! resets ride on the returned [`Transition`] so stale audio and desynced
//! codec state cannot leak across an utterance boundary.

use strum::Display;

use crate::control::ControlMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// No network at all; entry state at boot.
    Offline,
    /// Transport down; a (re)connect attempt is pending or in flight.
    Disconnected,
    /// Connected and quiet; capture still flows.
    Idle,
    /// Connected, capturing and sending audio upstream.
    Streaming,
    /// Server is processing an utterance; capture suspended.
    AwaitingResponse,
    /// Response audio is arriving; capture suspended, playback active.
    PlayingResponse,
}

impl ConnectionState {
    /// States in which captured audio is encoded and sent.
    pub fn accepts_capture(&self) -> bool {
        matches!(self, ConnectionState::Streaming | ConnectionState::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Boot-time hand-off from no-network to connecting.
    Dialing,
    /// Transport established.
    ConnectEstablished,
    /// A parsed text frame arrived.
    Control(ControlMessage),
    /// A binary (audio) frame arrived.
    BinaryReceived,
    /// Send/receive/connect failure or remote close.
    TransportFailed,
    /// Liveness probe got no answer in time.
    ProbeFailed,
    /// Liveness probe answered after an idle period.
    ProbeSucceeded,
}

/// A legal edge plus the side effects the caller must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    /// Drop everything queued in both directions.
    pub clear_queues: bool,
    /// Zero the inbound (playback) codec state before decoding further.
    pub reset_playback_codec: bool,
}

impl Transition {
    fn to(next: ConnectionState) -> Self {
        Self {
            next,
            clear_queues: false,
            reset_playback_codec: false,
        }
    }

    fn cleared(next: ConnectionState) -> Self {
        Self {
            next,
            clear_queues: true,
            reset_playback_codec: false,
        }
    }
}

/// Look up the edge for `event` out of `state`. `None` means the event is
/// undefined there and must be ignored.
pub fn transition(state: ConnectionState, event: ConnectionEvent) -> Option<Transition> {
    use ConnectionEvent as Event;
    use ConnectionState as State;

    match (state, event) {
        (State::Offline, Event::Dialing) => Some(Transition::to(State::Disconnected)),

        (State::Disconnected, Event::ConnectEstablished) => {
            Some(Transition::to(State::Streaming))
        }

        (State::Streaming | State::Idle, Event::Control(ControlMessage::ProcessingStart)) => {
            Some(Transition::cleared(State::AwaitingResponse))
        }

        (
            State::AwaitingResponse | State::PlayingResponse,
            Event::Control(ControlMessage::ResponseEnd),
        ) => Some(Transition::to(State::Streaming)),

        (
            State::AwaitingResponse | State::Streaming | State::Idle,
            Event::BinaryReceived,
        ) => Some(Transition {
            next: State::PlayingResponse,
            clear_queues: true,
            reset_playback_codec: true,
        }),

        // Already playing: further audio is just more of the same stream.
        (State::PlayingResponse, Event::BinaryReceived) => None,

        (_, Event::TransportFailed) => Some(Transition::cleared(State::Disconnected)),

        (State::Streaming | State::Idle, Event::ProbeFailed) => {
            Some(Transition::cleared(State::Disconnected))
        }

        (State::Streaming | State::Idle, Event::ProbeSucceeded) => {
            Some(Transition::to(State::Idle))
        }

        // Listening and emotion hints never touch protocol state.
        (_, Event::Control(ControlMessage::Listening))
        | (_, Event::Control(ControlMessage::EmotionHint(_))) => None,

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Emotion;
    use ConnectionEvent as Event;
    use ConnectionState as State;

    const ALL_STATES: [State; 6] = [
        State::Offline,
        State::Disconnected,
        State::Idle,
        State::Streaming,
        State::AwaitingResponse,
        State::PlayingResponse,
    ];

    #[test]
    fn boot_path_reaches_streaming() {
        let t = transition(State::Offline, Event::Dialing).unwrap();
        assert_eq!(t.next, State::Disconnected);
        let t = transition(State::Disconnected, Event::ConnectEstablished).unwrap();
        assert_eq!(t.next, State::Streaming);
        assert!(!t.clear_queues);
    }

    #[test]
    fn processing_start_clears_queues_and_suspends_capture() {
        for from in [State::Streaming, State::Idle] {
            let t = transition(from, Event::Control(ControlMessage::ProcessingStart)).unwrap();
            assert_eq!(t.next, State::AwaitingResponse);
            assert!(t.clear_queues);
            assert!(!t.next.accepts_capture());
        }
        // Not a defined edge anywhere else.
        for from in [State::Offline, State::Disconnected, State::PlayingResponse] {
            assert!(transition(from, Event::Control(ControlMessage::ProcessingStart)).is_none());
        }
    }

    #[test]
    fn first_binary_enters_playback_with_codec_reset() {
        for from in [State::AwaitingResponse, State::Streaming, State::Idle] {
            let t = transition(from, Event::BinaryReceived).unwrap();
            assert_eq!(t.next, State::PlayingResponse);
            assert!(t.clear_queues);
            assert!(t.reset_playback_codec);
        }
        // Subsequent audio while playing is not a transition.
        assert!(transition(State::PlayingResponse, Event::BinaryReceived).is_none());
    }

    #[test]
    fn offline_cannot_jump_to_playback() {
        assert!(transition(State::Offline, Event::BinaryReceived).is_none());
        assert!(transition(State::Offline, Event::ConnectEstablished).is_none());
    }

    #[test]
    fn response_end_resumes_streaming() {
        for from in [State::AwaitingResponse, State::PlayingResponse] {
            let t = transition(from, Event::Control(ControlMessage::ResponseEnd)).unwrap();
            assert_eq!(t.next, State::Streaming);
            assert!(t.next.accepts_capture());
        }
    }

    #[test]
    fn transport_failure_disconnects_from_anywhere() {
        for from in ALL_STATES {
            let t = transition(from, Event::TransportFailed).unwrap();
            assert_eq!(t.next, State::Disconnected);
            assert!(t.clear_queues);
        }
    }

    #[test]
    fn probe_outcomes_only_apply_while_capturing() {
        let t = transition(State::Streaming, Event::ProbeSucceeded).unwrap();
        assert_eq!(t.next, State::Idle);
        let t = transition(State::Idle, Event::ProbeFailed).unwrap();
        assert_eq!(t.next, State::Disconnected);
        assert!(transition(State::AwaitingResponse, Event::ProbeSucceeded).is_none());
        assert!(transition(State::PlayingResponse, Event::ProbeFailed).is_none());
    }

    #[test]
    fn informational_controls_never_transition() {
        for from in ALL_STATES {
            assert!(transition(from, Event::Control(ControlMessage::Listening)).is_none());
            assert!(transition(
                from,
                Event::Control(ControlMessage::EmotionHint(Emotion::Sad))
            )
            .is_none());
        }
    }
}
