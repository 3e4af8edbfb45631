// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Prompt assembly and streamed, sentence-chunked LLM responses.

use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use kitt_core::{KittError, Language, MeetingEvent, Result};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PREAMBLE_PREFIX: &str = "You are KITT, a concise voice assistant in a live meeting. \
Keep answers short and conversational. End any question you ask with a question mark.";

fn shared_http_client() -> Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<Result<reqwest::Client, reqwest::Error>> = OnceLock::new();
    CLIENT
        .get_or_init(|| reqwest::Client::builder().connect_timeout(Duration::from_secs(5)).build())
        .as_ref()
        .map_err(|e| KittError::Provider(format!("failed to initialize LLM HTTP client: {e}")))
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

/// Builds the message list for one answer turn: a system preamble with the
/// participant roster and language, the conversation history so far, and
/// the current prompt tagged with the speaker's name.
#[must_use]
pub fn build_messages(
    roster: &[String],
    language: Language,
    history: &[MeetingEvent],
    prompt_speaker: &str,
    prompt_text: &str,
) -> Vec<(String, String)> {
    let today = days_since_epoch();
    let system = format!(
        "{SYSTEM_PREAMBLE_PREFIX}\nParticipants currently in the room: {}.\nRespond in {}.\nToday's date: {today}.",
        if roster.is_empty() { "none".to_string() } else { roster.join(", ") },
        language.label,
    );

    let mut messages = vec![("system".to_string(), system)];
    for event in history {
        match event {
            MeetingEvent::Speech { is_bot: true, text, .. } => {
                messages.push(("assistant".to_string(), text.clone()));
            }
            MeetingEvent::Speech { participant_name, is_bot: false, text } => {
                messages.push(("user".to_string(), format!("{participant_name}: {text}")));
            }
            MeetingEvent::Presence { participant_name, joined, .. } => {
                let verb = if *joined { "joined" } else { "left" };
                messages.push(("system".to_string(), format!("{participant_name} {verb} the meeting.")));
            }
        }
    }
    messages.push(("user".to_string(), format!("{prompt_speaker}: {prompt_text}")));
    messages
}

fn days_since_epoch() -> String {
    // A coarse, dependency-free "today" good enough for the system prompt;
    // callers that need wall-clock formatting elsewhere use `apps/kittd`'s
    // `time`-crate-backed RFC3339 helper instead.
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let days = secs / 86_400;
    format!("day {days} since epoch")
}

/// Opens a streaming chat completion and exposes it as a sequence of
/// sentence-bounded chunks.
pub struct ChatCompleter {
    endpoint: String,
    api_key: String,
}

impl ChatCompleter {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { endpoint: DEFAULT_ENDPOINT.to_string(), api_key: api_key.into() }
    }

    #[must_use]
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), api_key: api_key.into() }
    }

    /// Starts the streaming request and returns the sentence splitter over
    /// its server-sent events.
    pub fn stream(&self, messages: Vec<(String, String)>) -> Result<SentenceStream> {
        let client = shared_http_client()?;

        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: messages.into_iter().map(|(role, content)| ChatMessage { role, content }).collect(),
            stream: true,
        };

        let request = client.post(&self.endpoint).bearer_auth(&self.api_key).json(&body);
        let source = EventSource::new(request)
            .map_err(|e| KittError::Provider(format!("failed to open LLM event stream: {e}")))?;

        Ok(SentenceStream { source, buffer: String::new(), done: false })
    }
}

/// One emitted sentence chunk, with the language it should be spoken in
/// if the stream carried a `<lang-code>` (or bare `lang-code`) prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceChunk {
    pub text: String,
    pub language_code: Option<String>,
}

/// Consumes raw LLM delta tokens and releases sentence-terminated chunks.
///
/// Grounded on the same buffer-and-boundary-scan shape as the agent's
/// text chunker: accumulate into a buffer, release as soon as the trimmed
/// tail ends in a sentence terminator, and flush whatever remains when the
/// stream ends.
pub struct SentenceStream {
    source: EventSource,
    buffer: String,
    done: bool,
}

const SENTENCE_BOUNDARIES: &[&str] = &[". ", ".\n", "! ", "!\n", "? ", "?\n", "。", "！", "？"];

impl SentenceStream {
    /// Returns the next sentence-terminated chunk, or `None` once the
    /// stream has ended and the buffer has been fully flushed.
    pub async fn recv(&mut self) -> Result<Option<SentenceChunk>> {
        loop {
            if let Some(chunk) = self.extract_sentence() {
                return Ok(Some(self.apply_language_prefix(chunk)));
            }

            if self.done {
                if self.buffer.trim().is_empty() {
                    return Ok(None);
                }
                let remainder = std::mem::take(&mut self.buffer);
                return Ok(Some(self.apply_language_prefix(remainder)));
            }

            match self.source.next().await {
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(message))) => {
                    if message.data == "[DONE]" {
                        self.done = true;
                        continue;
                    }
                    let chunk: ChatStreamChunk = serde_json::from_str(&message.data)
                        .map_err(|e| KittError::Provider(format!("malformed LLM stream chunk: {e}")))?;
                    if let Some(choice) = chunk.choices.into_iter().next() {
                        if let Some(delta) = choice.delta.content {
                            self.buffer.push_str(&delta);
                        }
                    }
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    self.done = true;
                }
                Some(Err(e)) => {
                    self.source.close();
                    return Err(KittError::Provider(format!("LLM stream error: {e}")));
                }
            }
        }
    }

    fn extract_sentence(&mut self) -> Option<String> {
        for boundary in SENTENCE_BOUNDARIES {
            if let Some(pos) = self.buffer.find(boundary) {
                let end = pos + boundary.len();
                return Some(self.buffer.drain(..end).collect::<String>().trim().to_string());
            }
        }
        None
    }

    fn apply_language_prefix(&self, chunk: String) -> SentenceChunk {
        strip_language_prefix(&chunk)
    }
}

/// Strips a leading `<lang-code>` or bare `lang-code` token (e.g. `<fr-FR>`
/// or `fr-FR`) from a sentence chunk, returning the remaining text and the
/// parsed code if one was present.
fn strip_language_prefix(chunk: &str) -> SentenceChunk {
    let trimmed = chunk.trim_start();

    if let Some(rest) = trimmed.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            let code = &rest[..end];
            if is_plausible_language_code(code) {
                return SentenceChunk {
                    text: rest[end + 1..].trim_start().to_string(),
                    language_code: Some(code.to_string()),
                };
            }
        }
    }

    if let Some((first_word, rest)) = trimmed.split_once(' ') {
        if is_plausible_language_code(first_word) {
            return SentenceChunk { text: rest.trim_start().to_string(), language_code: Some(first_word.to_string()) };
        }
    }

    SentenceChunk { text: chunk.to_string(), language_code: None }
}

fn is_plausible_language_code(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() == 5
        && bytes[2] == b'-'
        && bytes[..2].iter().all(u8::is_ascii_alphabetic)
        && bytes[3..].iter().all(u8::is_ascii_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_angle_bracket_language_prefix() {
        let chunk = strip_language_prefix("<fr-FR>Bonjour. ");
        assert_eq!(chunk.language_code.as_deref(), Some("fr-FR"));
        assert_eq!(chunk.text, "Bonjour. ");
    }

    #[test]
    fn strips_bare_language_prefix() {
        let chunk = strip_language_prefix("fr-FR Bonjour.");
        assert_eq!(chunk.language_code.as_deref(), Some("fr-FR"));
        assert_eq!(chunk.text, "Bonjour.");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let chunk = strip_language_prefix("Hello there.");
        assert_eq!(chunk.language_code, None);
        assert_eq!(chunk.text, "Hello there.");
    }

    #[test]
    fn rejects_five_char_word_that_is_not_a_language_code() {
        assert!(!is_plausible_language_code("hello"));
        assert!(is_plausible_language_code("en-US"));
    }

    #[test]
    fn build_messages_tags_human_speech_with_name_and_bot_speech_plain() {
        let history = vec![
            MeetingEvent::human_speech("Alice", "hi"),
            MeetingEvent::bot_speech("hello Alice"),
        ];
        let messages = build_messages(
            &["Alice".to_string(), "KITT".to_string()],
            Language::default_language(),
            &history,
            "Alice",
            "what time is it",
        );

        assert_eq!(messages[0].0, "system");
        assert!(messages.iter().any(|(role, content)| role == "user" && content.contains("Alice: hi")));
        assert!(messages.iter().any(|(role, content)| role == "assistant" && content == "hello Alice"));
        assert_eq!(messages.last().unwrap().0, "user");
        assert!(messages.last().unwrap().1.contains("what time is it"));
    }
}
