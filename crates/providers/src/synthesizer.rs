// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stateless text-to-speech client.

use std::sync::OnceLock;
use std::time::Duration;

use kitt_core::{KittError, Language, Result};
use serde::Serialize;

const DEFAULT_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

fn shared_http_client() -> Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<Result<reqwest::Client, reqwest::Error>> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(Duration::from_secs(5))
                .build()
        })
        .as_ref()
        .map_err(|e| KittError::Provider(format!("failed to initialize TTS HTTP client: {e}")))
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelector<'a>,
    #[serde(rename = "audioConfig")]
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct VoiceSelector<'a> {
    #[serde(rename = "languageCode")]
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AudioConfig {
    #[serde(rename = "audioEncoding")]
    audio_encoding: &'static str,
    #[serde(rename = "sampleRateHertz")]
    sample_rate_hertz: u32,
}

#[derive(Debug, serde::Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

/// Stateless wrapper over a cloud text-to-speech REST endpoint.
///
/// `synthesize` is safe to call concurrently from many agents; the
/// underlying HTTP client is process-wide and shared read-only.
pub struct Synthesizer {
    endpoint: String,
    api_key: String,
}

impl Synthesizer {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { endpoint: DEFAULT_ENDPOINT.to_string(), api_key: api_key.into() }
    }

    #[must_use]
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), api_key: api_key.into() }
    }

    /// Synthesizes `text` into an OGG-Opus byte blob at 48kHz, voiced per
    /// `language.tts_voice_id`.
    pub async fn synthesize(&self, text: &str, language: Language) -> Result<bytes::Bytes> {
        let client = shared_http_client()?;

        let request = SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelector { language_code: language.code, name: language.tts_voice_id },
            audio_config: AudioConfig { audio_encoding: "OGG_OPUS", sample_rate_hertz: kitt_media::opus::SAMPLE_RATE },
        };

        let response = client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| KittError::Provider(format!("TTS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(KittError::Provider(format!("TTS request returned {}", response.status())));
        }

        let parsed: SynthesizeResponse =
            response.json().await.map_err(|e| KittError::Provider(format!("TTS response decode failed: {e}")))?;

        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &parsed.audio_content)
            .map(bytes::Bytes::from)
            .map_err(|e| KittError::Provider(format!("TTS response was not valid base64: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizer_uses_provided_endpoint() {
        let s = Synthesizer::with_endpoint("key", "https://example.test/tts");
        assert_eq!(s.endpoint, "https://example.test/tts");
    }
}
