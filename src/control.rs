//! Text-frame control tokens exchanged over the websocket.

use strum::Display;

/// Presentation emotion hint carried as a two-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default)]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
}

impl Emotion {
    pub fn code(&self) -> &'static str {
        match self {
            Emotion::Neutral => "00",
            Emotion::Happy => "01",
            Emotion::Sad => "10",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "00" => Some(Emotion::Neutral),
            "01" => Some(Emotion::Happy),
            "10" => Some(Emotion::Sad),
            _ => None,
        }
    }
}

/// Control messages carried as short text frames. Unrecognized text is not
/// an error; the receiver ignores it without touching protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Server began processing an utterance; the client suspends capture.
    ProcessingStart,
    /// Server finished streaming its response; the client resumes capture.
    ResponseEnd,
    /// Informational only; no state change.
    Listening,
    /// Presentation hint; no effect on protocol state.
    EmotionHint(Emotion),
}

pub const PROCESSING_START: &str = "PROCESSING_START";
pub const RESPONSE_END: &str = "TTS_END";
pub const LISTENING: &str = "LISTENING";

impl ControlMessage {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            PROCESSING_START => Some(ControlMessage::ProcessingStart),
            RESPONSE_END => Some(ControlMessage::ResponseEnd),
            LISTENING => Some(ControlMessage::Listening),
            other => Emotion::from_code(other).map(ControlMessage::EmotionHint),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMessage::ProcessingStart => PROCESSING_START,
            ControlMessage::ResponseEnd => RESPONSE_END,
            ControlMessage::Listening => LISTENING,
            ControlMessage::EmotionHint(emotion) => emotion.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tokens() {
        assert_eq!(
            ControlMessage::parse("PROCESSING_START"),
            Some(ControlMessage::ProcessingStart)
        );
        assert_eq!(
            ControlMessage::parse("TTS_END"),
            Some(ControlMessage::ResponseEnd)
        );
        assert_eq!(
            ControlMessage::parse("LISTENING"),
            Some(ControlMessage::Listening)
        );
        assert_eq!(
            ControlMessage::parse("01"),
            Some(ControlMessage::EmotionHint(Emotion::Happy))
        );
    }

    #[test]
    fn unknown_text_parses_to_none() {
        assert_eq!(ControlMessage::parse(""), None);
        assert_eq!(ControlMessage::parse("tts_end"), None);
        assert_eq!(ControlMessage::parse("11"), None);
    }

    #[test]
    fn tokens_round_trip() {
        for msg in [
            ControlMessage::ProcessingStart,
            ControlMessage::ResponseEnd,
            ControlMessage::Listening,
            ControlMessage::EmotionHint(Emotion::Neutral),
            ControlMessage::EmotionHint(Emotion::Happy),
            ControlMessage::EmotionHint(Emotion::Sad),
        ] {
            assert_eq!(ControlMessage::parse(msg.as_str()), Some(msg));
        }
    }
}
