// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The meeting-domain data model.

use std::time::SystemTime;

/// One entry in a room's append-only conversation history.
///
/// Produced either when a human or the bot finishes speaking, or when a
/// participant joins/leaves. `ConversationMemory` never mutates an entry
/// once appended; `ChatCompleter` turns each one into a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum MeetingEvent {
    /// A turn of speech, either from a human participant or the bot itself.
    Speech { participant_name: String, is_bot: bool, text: String },
    /// A participant joining or leaving the room.
    Presence { participant_name: String, joined: bool, time: SystemTime },
}

impl MeetingEvent {
    /// Convenience constructor for a human speech turn.
    #[must_use]
    pub fn human_speech(participant_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Speech { participant_name: participant_name.into(), is_bot: false, text: text.into() }
    }

    /// Convenience constructor for the bot's own speech turn.
    #[must_use]
    pub fn bot_speech(text: impl Into<String>) -> Self {
        Self::Speech { participant_name: "KITT".to_string(), is_bot: true, text: text.into() }
    }

    /// Convenience constructor for a presence marker at the current time.
    #[must_use]
    pub fn presence(participant_name: impl Into<String>, joined: bool) -> Self {
        Self::Presence { participant_name: participant_name.into(), joined, time: SystemTime::now() }
    }
}

/// A single response from the streaming recognizer, as produced by one
/// `Transcriber` and consumed exactly once by the `Agent`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeResult {
    /// The participant whose microphone produced this result.
    pub participant_id: String,
    /// Recognized text (interim concatenation, or the final transcript).
    pub text: String,
    /// Whether this is a final result (committed) or an interim update.
    pub is_final: bool,
    /// Set instead of a usable `text` when the provider reported an error
    /// for this utterance; the Transcriber keeps running after emitting it.
    pub error: Option<String>,
}

impl RecognizeResult {
    #[must_use]
    pub fn interim(participant_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { participant_id: participant_id.into(), text: text.into(), is_final: false, error: None }
    }

    #[must_use]
    pub fn finalized(participant_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { participant_id: participant_id.into(), text: text.into(), is_final: true, error: None }
    }

    #[must_use]
    pub fn failed(participant_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            text: String::new(),
            is_final: false,
            error: Some(message.into()),
        }
    }
}

/// The designated speaker an `ActivationController` will answer next,
/// guarded by a monotonically increasing epoch so a stale watchdog firing
/// after the speaker changed is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSpeaker {
    pub participant_id: String,
    pub epoch: u64,
    pub last_activity_at: std::time::Instant,
}

impl ActiveSpeaker {
    #[must_use]
    pub fn new(participant_id: impl Into<String>, epoch: u64) -> Self {
        Self { participant_id: participant_id.into(), epoch, last_activity_at: std::time::Instant::now() }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = std::time::Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_speech_is_marked() {
        let ev = MeetingEvent::bot_speech("hello");
        assert!(matches!(ev, MeetingEvent::Speech { is_bot: true, .. }));
    }

    #[test]
    fn recognize_result_constructors_set_flags() {
        let r = RecognizeResult::finalized("p1", "hi");
        assert!(r.is_final);
        assert!(r.error.is_none());

        let r = RecognizeResult::failed("p1", "boom");
        assert!(r.error.is_some());
        assert!(!r.is_final);
    }

    #[test]
    fn active_speaker_touch_advances_time() {
        let mut s = ActiveSpeaker::new("p1", 0);
        let before = s.last_activity_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.touch();
        assert!(s.last_activity_at > before);
    }
}
