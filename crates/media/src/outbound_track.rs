// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The bot's outbound audio track: a FIFO of queued TTS utterances, pulled
//! one 20ms Opus packet at a time and backfilled with silence whenever the
//! queue runs dry.
//!
//! Unlike a node that paces its own output on an internal
//! [`tokio::time::Interval`], this track is driven by the SFU's outgoing
//! sample puller: every call to [`OutboundTrack::next_packet`] corresponds
//! to one RTP frame the room is about to send, so the 20ms clock lives on
//! the caller's side and this type only ever needs to answer "what's next".

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;

use crate::ogg::OpusPacket;

/// The canonical 80-byte SILK mono silence payload: a 20ms frame (TOC
/// config 1 — SILK narrowband, 20ms, mono, single frame) whose body is a
/// fixed low-bitrate comfort-noise encoding. Declared once and cloned on
/// every tick the queue is empty.
const SILENCE_FRAME: [u8; 80] = {
    let mut frame = [0u8; 80];
    frame[0] = 1 << 3; // config=1 (SILK NB, 20ms), stereo=0, frame_count_code=0
    frame
};
const SILENCE_DURATION_US: u32 = 20_000;

type OnComplete = Box<dyn FnOnce() + Send>;

struct QueuedSource {
    packets: VecDeque<OpusPacket>,
    on_complete: Option<OnComplete>,
}

struct State {
    queue: VecDeque<QueuedSource>,
}

/// A cloneable handle over a single bot audio track's playback queue.
///
/// `enqueue` is called by the `Agent` once a `Synthesizer` response is
/// packetized; `next_packet` is called by the room transport once per
/// outgoing audio tick.
pub struct OutboundTrack {
    state: Mutex<State>,
}

impl Default for OutboundTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundTrack {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(State { queue: VecDeque::new() }) }
    }

    /// Queues a finished utterance's packets for playback. `on_complete`
    /// fires once the last packet of this utterance has been pulled,
    /// letting the `Agent` know when it's safe to start listening again.
    pub fn enqueue(&self, packets: impl IntoIterator<Item = OpusPacket>, on_complete: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.queue.push_back(QueuedSource {
            packets: packets.into_iter().collect(),
            on_complete: Some(Box::new(on_complete)),
        });
    }

    /// Drops every queued utterance without firing their completion
    /// callbacks, used when a barge-in interrupts the bot mid-sentence.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.queue.clear();
    }

    /// True while there is queued audio left to play.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        !state.queue.is_empty()
    }

    /// Returns the next packet to send, or a 20ms silence frame if the
    /// queue is empty. Never blocks: this is called from the transport's
    /// own pacing loop and must not stall it.
    #[must_use]
    pub fn next_packet(&self) -> OpusPacket {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        loop {
            let Some(front) = state.queue.front_mut() else {
                return silence_packet();
            };

            if let Some(packet) = front.packets.pop_front() {
                return packet;
            }

            // This utterance is exhausted; fire its callback and move on,
            // possibly returning the next source's first packet this call
            // so playback doesn't glitch with a silence gap between them.
            let mut finished = state.queue.pop_front().expect("front() just confirmed a source");
            if let Some(cb) = finished.on_complete.take() {
                cb();
            }
        }
    }
}

fn silence_packet() -> OpusPacket {
    OpusPacket { data: Bytes::from_static(&SILENCE_FRAME), duration_us: SILENCE_DURATION_US }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn packet(byte: u8) -> OpusPacket {
        OpusPacket { data: Bytes::from(vec![byte]), duration_us: 20_000 }
    }

    #[test]
    fn returns_silence_when_empty() {
        let track = OutboundTrack::new();
        assert!(!track.is_speaking());
        let p = track.next_packet();
        assert_eq!(p.data.as_ref(), &SILENCE_FRAME);
    }

    #[test]
    fn drains_queued_packets_in_order() {
        let track = OutboundTrack::new();
        track.enqueue([packet(1), packet(2)], || {});
        assert!(track.is_speaking());

        assert_eq!(track.next_packet().data.as_ref(), [1]);
        assert_eq!(track.next_packet().data.as_ref(), [2]);
        assert!(!track.is_speaking());
        assert_eq!(track.next_packet().data.as_ref(), &SILENCE_FRAME);
    }

    #[test]
    fn fires_on_complete_exactly_once_when_exhausted() {
        let track = OutboundTrack::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        track.enqueue([packet(9)], move || fired_clone.store(true, Ordering::SeqCst));

        assert!(!fired.load(Ordering::SeqCst));
        let _ = track.next_packet();
        assert!(!fired.load(Ordering::SeqCst));
        let _ = track.next_packet(); // drains and fires completion, returns silence
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn clear_drops_queue_without_firing_callbacks() {
        let track = OutboundTrack::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        track.enqueue([packet(1), packet(2)], move || fired_clone.store(true, Ordering::SeqCst));

        track.clear();
        assert!(!track.is_speaking());
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(track.next_packet().data.as_ref(), &SILENCE_FRAME);
    }

    #[test]
    fn second_source_continues_seamlessly_after_first_drains() {
        let track = OutboundTrack::new();
        track.enqueue([packet(1)], || {});
        track.enqueue([packet(2)], || {});

        assert_eq!(track.next_packet().data.as_ref(), [1]);
        assert_eq!(track.next_packet().data.as_ref(), [2]);
    }
}
