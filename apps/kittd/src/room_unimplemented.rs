// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Default stand-ins for the two genuinely external collaborators left
//! out of scope here: the SFU room transport
//! ([`kitt_agent::RoomClient`]) and the SFU's room lookup service
//! ([`crate::supervisor::RoomDirectory`]). `kittd serve` wires these in
//! by default so the binary runs end to end; a real deployment replaces
//! both with implementations backed by its actual room SDK and
//! `config.livekit` credentials.

use async_trait::async_trait;
use kitt_core::{KittError, Result};

use crate::supervisor::RoomDirectory;

/// A [`kitt_agent::RoomClient`] that fails every call. Exists so
/// [`crate::supervisor::Supervisor::create_if_absent`] has a concrete
/// type to construct without a real SFU SDK linked in; every method
/// reports the same clear error rather than silently doing nothing.
pub struct UnimplementedRoomClient;

#[async_trait]
impl kitt_agent::RoomClient for UnimplementedRoomClient {
    async fn connect(&self, _token: &str) -> Result<()> {
        Err(not_wired())
    }

    async fn publish_local_track(&self, _track: std::sync::Arc<kitt_media::OutboundTrack>) -> Result<()> {
        Err(not_wired())
    }

    async fn publish_data(&self, _packet: kitt_core::DataPacket) -> Result<()> {
        Err(not_wired())
    }

    async fn subscribe(&self, _participant_id: &str, _track_id: &str) -> Result<()> {
        Err(not_wired())
    }

    async fn unsubscribe(&self, _participant_id: &str, _track_id: &str) -> Result<()> {
        Err(not_wired())
    }

    async fn disconnect(&self) {}

    fn events(&self) -> tokio::sync::mpsc::Receiver<kitt_agent::AgentEvent> {
        tokio::sync::mpsc::channel(1).1
    }

    fn participant_name(&self, participant_id: &str) -> String {
        participant_id.to_string()
    }

    fn roster(&self) -> Vec<String> {
        Vec::new()
    }

    fn human_count(&self) -> usize {
        0
    }
}

fn not_wired() -> KittError {
    KittError::Configuration("no RoomClient implementation is wired into this build; see crate::room_unimplemented".to_string())
}

/// A [`RoomDirectory`] that reports every room as missing. See
/// [`UnimplementedRoomClient`].
pub struct UnimplementedRoomDirectory;

#[async_trait]
impl RoomDirectory for UnimplementedRoomDirectory {
    async fn resolve(&self, _room_name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
