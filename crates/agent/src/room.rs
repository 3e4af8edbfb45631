// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The conferencing room/SFU boundary.
//!
//! The room SDK itself is out of scope here — interfaces only — since
//! it is a genuinely external collaborator with no in-crate
//! implementation. This boundary is modeled the same way the pluggable
//! transport boundary in `crates/core/src/moq_gateway.rs` is: a
//! `#[async_trait]` trait defined alongside the code that calls it,
//! shaped like `MoqGatewayTrait`, with the real implementation a
//! collaborator `kitt-agent` does not construct for itself.
//!
//! Room callbacks carry `participant_id`, never a back-pointer into the
//! room — the same "cyclic callback graph, modeled as explicit
//! ownership" design `moq_gateway.rs` uses for MoQ gateway routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use kitt_core::{DataPacket, Result};
use kitt_media::OutboundTrack;
use tokio::sync::mpsc;

/// The media kind a published track carries; the agent subscribes
/// iff source is a microphone track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Other,
}

/// One room lifecycle notification the `Agent` actor reacts to.
///
/// `TrackSubscribed` carries the inbound RTP payload stream for that
/// track rather than a handle back into the room: the agent owns exactly
/// what it needs (a receiver) and nothing more.
pub enum AgentEvent {
    TrackPublished { participant_id: String, track_id: String, source: TrackSource },
    TrackSubscribed { participant_id: String, track_id: String, codec: String, rtp_rx: mpsc::Receiver<Bytes> },
    TrackUnsubscribed { participant_id: String, track_id: String },
    /// A non-bot participant joined the room. Carries the display name
    /// directly rather than requiring a roster lookup, since by the time
    /// this event is handled the participant may already have left.
    ParticipantConnected { participant_id: String, name: String },
    ParticipantDisconnected { participant_id: String, name: String },
    Disconnected,
}

/// The room/SFU collaborator boundary. A concrete
/// implementation connects with a token, disables auto-subscribe,
/// publishes the agent's single outbound track, and feeds room lifecycle
/// notifications back through [`RoomClient::events`].
#[async_trait]
pub trait RoomClient: Send + Sync {
    /// Connects to the room with the SFU-issued `token`, with
    /// auto-subscribe disabled (the agent subscribes explicitly, only to
    /// microphone tracks from non-bot participants).
    async fn connect(&self, token: &str) -> Result<()>;

    /// Publishes the agent's single outbound Opus track.
    async fn publish_local_track(&self, track: Arc<OutboundTrack>) -> Result<()>;

    /// Publishes one packet on the room's reliable data channel.
    async fn publish_data(&self, packet: DataPacket) -> Result<()>;

    /// Subscribes to a previously published track.
    async fn subscribe(&self, participant_id: &str, track_id: &str) -> Result<()>;

    /// Unsubscribes from a track this agent previously subscribed to.
    async fn unsubscribe(&self, participant_id: &str, track_id: &str) -> Result<()>;

    /// Disconnects from the room (self-destruct).
    async fn disconnect(&self);

    /// Takes ownership of the event stream. Called exactly once, right
    /// after [`RoomClient::connect`] succeeds.
    fn events(&self) -> mpsc::Receiver<AgentEvent>;

    /// The display name for a participant, used to tag transcript
    /// packets and LLM messages.
    fn participant_name(&self, participant_id: &str) -> String;

    /// Display names of every non-bot participant currently in the room,
    /// for the LLM's system preamble roster.
    fn roster(&self) -> Vec<String>;

    /// Count of non-bot participants currently in the room — the
    /// `ActivationController`'s solo/multi-party quorum input.
    fn human_count(&self) -> usize;
}

/// An in-memory [`RoomClient`] good enough to exercise the `Agent` actor
/// in tests, without reimplementing any SFU wire protocol. Tests drive
/// it by calling [`StubRoomClient::inject_event`],
/// [`StubRoomClient::add_human`], and [`StubRoomClient::remove_human`],
/// then inspect [`StubRoomClient::published_data`] and
/// [`StubRoomClient::published_track`].
pub struct StubRoomClient {
    events_tx: mpsc::Sender<AgentEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    roster: Mutex<HashMap<String, String>>,
    published_data: Mutex<Vec<DataPacket>>,
    published_track: Mutex<Option<Arc<OutboundTrack>>>,
    disconnected: Mutex<bool>,
    next_track_id: AtomicU64,
}

impl Default for StubRoomClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRoomClient {
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            roster: Mutex::new(HashMap::new()),
            published_data: Mutex::new(Vec::new()),
            published_track: Mutex::new(None),
            disconnected: Mutex::new(false),
            next_track_id: AtomicU64::new(0),
        }
    }

    /// Delivers an [`AgentEvent`] to the running agent as if the room had
    /// produced it. A no-op if the agent already dropped its receiver.
    pub fn inject_event(&self, event: AgentEvent) {
        let _ = self.events_tx.try_send(event);
    }

    /// Adds a human participant to the roster and emits the
    /// `TrackPublished`/`TrackSubscribed` pair a real microphone
    /// publication would produce, returning the sender half of the
    /// inbound RTP channel so the test can feed it audio.
    pub fn add_human(&self, participant_id: &str, name: &str) -> mpsc::Sender<Bytes> {
        self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(participant_id.to_string(), name.to_string());

        self.inject_event(AgentEvent::ParticipantConnected { participant_id: participant_id.to_string(), name: name.to_string() });

        let track_id = format!("track-{}", self.next_track_id.fetch_add(1, Ordering::Relaxed));
        self.inject_event(AgentEvent::TrackPublished {
            participant_id: participant_id.to_string(),
            track_id: track_id.clone(),
            source: TrackSource::Microphone,
        });

        let (rtp_tx, rtp_rx) = mpsc::channel(128);
        self.inject_event(AgentEvent::TrackSubscribed {
            participant_id: participant_id.to_string(),
            track_id,
            codec: "opus".to_string(),
            rtp_rx,
        });
        rtp_tx
    }

    /// Removes a human participant and emits `ParticipantDisconnected`.
    pub fn remove_human(&self, participant_id: &str) {
        let name = self
            .roster
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(participant_id)
            .unwrap_or_else(|| participant_id.to_string());
        self.inject_event(AgentEvent::ParticipantDisconnected { participant_id: participant_id.to_string(), name });
    }

    #[must_use]
    pub fn published_data(&self) -> Vec<DataPacket> {
        self.published_data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn published_track(&self) -> Option<Arc<OutboundTrack>> {
        self.published_track.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RoomClient for StubRoomClient {
    async fn connect(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn publish_local_track(&self, track: Arc<OutboundTrack>) -> Result<()> {
        *self.published_track.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(track);
        Ok(())
    }

    async fn publish_data(&self, packet: DataPacket) -> Result<()> {
        self.published_data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(packet);
        Ok(())
    }

    async fn subscribe(&self, _participant_id: &str, _track_id: &str) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _participant_id: &str, _track_id: &str) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {
        *self.disconnected.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = true;
    }

    fn events(&self) -> mpsc::Receiver<AgentEvent> {
        self.events_rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take().unwrap_or_else(|| mpsc::channel(1).1)
    }

    fn participant_name(&self, participant_id: &str) -> String {
        self.roster
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(participant_id)
            .cloned()
            .unwrap_or_else(|| participant_id.to_string())
    }

    fn roster(&self) -> Vec<String> {
        self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect()
    }

    fn human_count(&self) -> usize {
        self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_local_track_is_recorded() {
        let room = StubRoomClient::new();
        let track = Arc::new(OutboundTrack::new());
        room.publish_local_track(track.clone()).await.expect("publishes");
        assert!(room.published_track().is_some());
    }

    #[tokio::test]
    async fn add_human_emits_connected_then_published_then_subscribed() {
        let room = StubRoomClient::new();
        let _rtp_tx = room.add_human("p1", "Alice");
        assert_eq!(room.human_count(), 1);

        let mut events = room.events();
        let first = events.recv().await.expect("connected event");
        assert!(matches!(first, AgentEvent::ParticipantConnected { .. }));
        let second = events.recv().await.expect("published event");
        assert!(matches!(second, AgentEvent::TrackPublished { .. }));
        let third = events.recv().await.expect("subscribed event");
        assert!(matches!(third, AgentEvent::TrackSubscribed { .. }));
    }

    #[tokio::test]
    async fn remove_human_drops_from_roster() {
        let room = StubRoomClient::new();
        let _ = room.add_human("p1", "Alice");
        room.remove_human("p1");
        assert_eq!(room.human_count(), 0);
    }
}
