// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! kitt-providers: streaming STT, TTS and LLM provider clients.
//!
//! ## Modules
//!
//! - [`transcriber`]: per-microphone streaming recognizer with endless-streaming rotation.
//! - [`synthesizer`]: stateless text-to-speech request/response wrapper.
//! - [`chat_completer`]: prompt assembly and sentence-chunked LLM streaming.
//! - [`stt_proto`]: hand-written streaming-recognition message shapes.

pub mod chat_completer;
pub mod stt_proto;
pub mod synthesizer;
pub mod transcriber;

pub use chat_completer::{ChatCompleter, SentenceChunk, SentenceStream};
pub use synthesizer::Synthesizer;
pub use transcriber::{SttClient, Transcriber};
