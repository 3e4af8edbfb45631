// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! kitt-media: Ogg/Opus framing and the outbound playback track.
//!
//! ## Modules
//!
//! - [`opus`]: Opus TOC byte decoding (frame duration, frame count).
//! - [`ogg`]: demultiplexing a TTS provider's Ogg-Opus response, and
//!   remultiplexing captured microphone packets for the speech recognizer.
//! - [`outbound_track`]: the bot's pull-based outbound audio queue.

pub mod ogg;
pub mod opus;
pub mod outbound_track;

pub use ogg::{OggPacketizer, OggWriter, OpusPacket};
pub use outbound_track::OutboundTrack;
