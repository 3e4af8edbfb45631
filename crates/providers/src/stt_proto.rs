// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal streaming-recognition message shapes for the speech provider.
//!
//! A real deployment generates these from the provider's `.proto` file via
//! `tonic-build` in a `build.rs`; this module hand-writes the handful of
//! fields the `Transcriber` actually reads or sets, following the same
//! request/config/response shape every major streaming speech API exposes.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct SpeechContext {
    #[prost(string, repeated, tag = "1")]
    pub phrases: Vec<String>,
    #[prost(float, tag = "2")]
    pub boost: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RecognitionConfig {
    #[prost(enumeration = "AudioEncoding", tag = "1")]
    pub encoding: i32,
    #[prost(int32, tag = "2")]
    pub sample_rate_hertz: i32,
    #[prost(int32, tag = "3")]
    pub audio_channel_count: i32,
    #[prost(string, tag = "4")]
    pub language_code: String,
    #[prost(string, tag = "5")]
    pub model: String,
    #[prost(bool, tag = "6")]
    pub use_enhanced: bool,
    #[prost(message, repeated, tag = "7")]
    pub speech_contexts: Vec<SpeechContext>,
}

#[derive(Clone, Copy, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum AudioEncoding {
    Unspecified = 0,
    OggOpus = 6,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamingRecognitionConfig {
    #[prost(message, optional, tag = "1")]
    pub config: Option<RecognitionConfig>,
    #[prost(bool, tag = "2")]
    pub interim_results: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamingRecognizeRequest {
    #[prost(message, optional, tag = "1")]
    pub streaming_config: Option<StreamingRecognitionConfig>,
    #[prost(bytes = "vec", tag = "2")]
    pub audio_content: Vec<u8>,
}

impl StreamingRecognizeRequest {
    #[must_use]
    pub fn config(streaming_config: StreamingRecognitionConfig) -> Self {
        Self { streaming_config: Some(streaming_config), audio_content: Vec::new() }
    }

    #[must_use]
    pub fn audio(bytes: Vec<u8>) -> Self {
        Self { streaming_config: None, audio_content: bytes }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SpeechRecognitionAlternative {
    #[prost(string, tag = "1")]
    pub transcript: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamingRecognitionResult {
    #[prost(message, repeated, tag = "1")]
    pub alternatives: Vec<SpeechRecognitionAlternative>,
    #[prost(bool, tag = "2")]
    pub is_final: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamingRecognizeResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<StreamingRecognitionResult>,
    #[prost(string, optional, tag = "2")]
    pub error_message: Option<String>,
}

/// Wake phrases boosted in every session's adaptation set: greeting words
/// crossed with name tokens the bot answers to, so the recognizer is less
/// likely to mis-hear its own wake phrase.
#[must_use]
pub fn wake_phrase_contexts() -> Vec<SpeechContext> {
    vec![SpeechContext {
        phrases: vec![
            "hi kit".to_string(),
            "hello kit".to_string(),
            "hey kit".to_string(),
            "hi gpt".to_string(),
            "hey gpt".to_string(),
            "hey kitt".to_string(),
            "hey livekit".to_string(),
        ],
        boost: 15.0,
    }]
}
