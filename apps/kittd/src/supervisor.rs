// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The process-wide `room → Agent` map, structured directly on
//! `SessionManager` (`apps/skit/src/session.rs`): a
//! `HashMap<RoomId, AgentSlot>` behind a `tokio::sync::Mutex`, the same
//! four `opentelemetry` metrics `SessionManager::default()`
//! registers (renamed to the agent domain), and a `remove`/destruction
//! path that records the session's lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kitt_agent::{AgentConfig, AgentHandle, RoomClient};
use kitt_core::{Language, Result};
use opentelemetry::global;
use tokio::sync::Mutex;

use crate::providers::ProviderClients;

/// Looks up a room by name and hands back a join token, standing in for
/// the SFU's room service — out of scope here, modeled the same
/// way [`kitt_agent::room::RoomClient`] is.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Resolves `room_name` to a join token, or `None` if no such room
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails (the HTTP surface
    /// maps this to a 500).
    async fn resolve(&self, room_name: &str) -> Result<Option<String>>;
}

/// An in-memory [`RoomDirectory`] good enough to exercise the Supervisor
/// in tests: rooms are registered ahead of time with a fixed token.
#[derive(Default)]
pub struct StubRoomDirectory {
    rooms: Mutex<HashMap<String, String>>,
}

impl StubRoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, room_name: impl Into<String>, token: impl Into<String>) {
        self.rooms.lock().await.insert(room_name.into(), token.into());
    }
}

#[async_trait]
impl RoomDirectory for StubRoomDirectory {
    async fn resolve(&self, room_name: &str) -> Result<Option<String>> {
        Ok(self.rooms.lock().await.get(room_name).cloned())
    }
}

/// Builds a fresh [`RoomClient`] to hand to a newly spawned agent. The
/// real room SDK is out of scope here; a deployment supplies a
/// factory backed by its actual SFU client, `kittd` itself only needs
/// the trait object.
pub type RoomClientFactory = Arc<dyn Fn() -> Arc<dyn RoomClient> + Send + Sync>;

/// One room's agent lifecycle state. `Connecting` is the dedup sentinel:
/// it occupies the slot the instant a create is accepted, before the
/// agent has actually connected, so a second concurrent webhook/join for
/// the same room sees the slot and backs off.
enum AgentSlot {
    Connecting,
    Ready { handle: AgentHandle, started_at: Instant },
}

struct Metrics {
    agents_active: opentelemetry::metrics::Gauge<u64>,
    agents_created: opentelemetry::metrics::Counter<u64>,
    agents_destroyed: opentelemetry::metrics::Counter<u64>,
    agent_duration: opentelemetry::metrics::Histogram<f64>,
}

impl Default for Metrics {
    fn default() -> Self {
        let meter = global::meter("kittd_agents");
        Self {
            agents_active: meter.u64_gauge("agents.active").with_description("Number of active per-room agents").build(),
            agents_created: meter.u64_counter("agents.created").with_description("Total number of agents created").build(),
            agents_destroyed: meter.u64_counter("agents.destroyed").with_description("Total number of agents destroyed").build(),
            agent_duration: meter
                .f64_histogram("agent.duration")
                .with_description("Agent lifetime duration in seconds")
                .with_unit("s")
                .build(),
        }
    }
}

/// Process-wide `room → Agent` map.
///
/// `slots` and `metrics` are each wrapped in their own `Arc` (independent
/// of whatever `Arc<Supervisor>` a caller wraps the whole thing in) so the
/// exit-watcher task spawned per agent can hold just the state it needs
/// without borrowing `self` or requiring `Supervisor` itself to live
/// behind an `Arc`.
pub struct Supervisor {
    slots: Arc<Mutex<HashMap<String, AgentSlot>>>,
    providers: Arc<ProviderClients>,
    room_factory: RoomClientFactory,
    language: Language,
    metrics: Arc<Metrics>,
}

impl Supervisor {
    #[must_use]
    pub fn new(providers: Arc<ProviderClients>, room_factory: RoomClientFactory, language: Language) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            providers,
            room_factory,
            language,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Creates an agent for `room_id` if one is not already connecting
    /// or ready, joining with `token`. A no-op (not an error) if a slot
    /// already exists — this is the "guard against duplicate creation"
    /// rule both the webhook and direct-join entry points share.
    pub async fn create_if_absent(&self, room_id: &str, token: String) {
        {
            let mut guard = self.slots.lock().await;
            if guard.contains_key(room_id) {
                return;
            }
            guard.insert(room_id.to_string(), AgentSlot::Connecting);
        }
        self.metrics.agents_created.add(1, &[]);

        let room = (self.room_factory)();
        let config = AgentConfig {
            token,
            language: self.language,
            room,
            stt_client: self.providers.stt_client.clone(),
            synthesizer: self.providers.synthesizer.clone(),
            chat_completer: self.providers.chat_completer.clone(),
        };

        let (handle, exit_rx) = AgentHandle::spawn(config);
        let started_at = Instant::now();

        {
            let mut guard = self.slots.lock().await;
            guard.insert(room_id.to_string(), AgentSlot::Ready { handle, started_at });
        }
        self.metrics.agents_active.record(self.active_count().await, &[]);

        self.watch_for_exit(room_id.to_string(), exit_rx, started_at);
    }

    /// Spawns the task that removes a room's slot once its agent's
    /// actor loop exits on its own (room emptied, fatal room error), the
    /// "on agent disconnect, remove its slot" rule.
    fn watch_for_exit(&self, room_id: String, exit_rx: tokio::sync::oneshot::Receiver<()>, started_at: Instant) {
        let slots = Arc::clone(&self.slots);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let _ = exit_rx.await;
            let mut guard = slots.lock().await;
            if guard.remove(&room_id).is_some() {
                metrics.agents_destroyed.add(1, &[]);
                metrics.agent_duration.record(started_at.elapsed().as_secs_f64(), &[]);
                metrics.agents_active.record(guard.len() as u64, &[]);
            }
        });
    }

    /// True once a slot exists for `room_id` (connecting or ready) — the
    /// dedup invariant the tests below check.
    pub async fn has_slot(&self, room_id: &str) -> bool {
        self.slots.lock().await.contains_key(room_id)
    }

    async fn active_count(&self) -> u64 {
        self.slots.lock().await.len() as u64
    }

    /// Cancels every running agent, giving each up to 5 seconds to shut
    /// down, and drops the provider
    /// clients. Individual timeouts are logged and otherwise ignored —
    /// shutdown proceeds regardless.
    pub async fn shutdown(&self) {
        let slots = std::mem::take(&mut *self.slots.lock().await);
        let handles: Vec<AgentHandle> =
            slots.into_values().filter_map(|slot| if let AgentSlot::Ready { handle, .. } = slot { Some(handle) } else { None }).collect();

        let shutdowns = handles.iter().map(AgentHandle::shutdown_and_wait);
        for result in futures::future::join_all(shutdowns).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "agent did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitt_agent::StubRoomClient;
    use kitt_providers::{ChatCompleter, Synthesizer};
    use std::time::Duration;

    struct NeverStt;

    #[async_trait]
    impl kitt_providers::SttClient for NeverStt {
        async fn streaming_recognize(
            &self,
            _requests: std::pin::Pin<Box<dyn futures::Stream<Item = kitt_providers::stt_proto::StreamingRecognizeRequest> + Send>>,
        ) -> Result<std::pin::Pin<Box<dyn futures::Stream<Item = Result<kitt_providers::stt_proto::StreamingRecognizeResponse>> + Send>>>
        {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    fn test_providers() -> Arc<ProviderClients> {
        Arc::new(ProviderClients {
            stt_client: Arc::new(NeverStt),
            synthesizer: Arc::new(Synthesizer::new("unused")),
            chat_completer: Arc::new(ChatCompleter::new("unused")),
        })
    }

    fn test_supervisor() -> Supervisor {
        let factory: RoomClientFactory = Arc::new(|| Arc::new(StubRoomClient::new()) as Arc<dyn RoomClient>);
        Supervisor::new(test_providers(), factory, Language::default_language())
    }

    #[tokio::test]
    async fn create_if_absent_is_idempotent_for_the_same_room() {
        let supervisor = test_supervisor();
        assert!(!supervisor.has_slot("room-1").await);

        supervisor.create_if_absent("room-1", "token-a".to_string()).await;
        assert!(supervisor.has_slot("room-1").await);

        // A second create for the same room must not replace the slot.
        supervisor.create_if_absent("room-1", "token-b".to_string()).await;
        assert_eq!(supervisor.slots.lock().await.len(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn distinct_rooms_get_distinct_slots() {
        let supervisor = test_supervisor();
        supervisor.create_if_absent("room-1", "token-a".to_string()).await;
        supervisor.create_if_absent("room-2", "token-b".to_string()).await;
        assert_eq!(supervisor.slots.lock().await.len(), 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_clears_every_slot() {
        let supervisor = test_supervisor();
        supervisor.create_if_absent("room-1", "token-a".to_string()).await;
        supervisor.shutdown().await;
        assert!(supervisor.slots.lock().await.is_empty());
    }

    #[tokio::test]
    async fn slot_is_removed_once_the_agent_disconnects_itself() {
        let room = Arc::new(StubRoomClient::new());
        let room_for_factory = room.clone();
        let factory: RoomClientFactory = Arc::new(move || room_for_factory.clone() as Arc<dyn RoomClient>);
        let supervisor = Supervisor::new(test_providers(), factory, Language::default_language());

        supervisor.create_if_absent("room-1", "token-a".to_string()).await;
        assert!(supervisor.has_slot("room-1").await);

        room.inject_event(kitt_agent::AgentEvent::Disconnected);

        // The exit watcher removes the slot asynchronously; poll briefly
        // rather than assuming a fixed delay.
        for _ in 0..50 {
            if !supervisor.has_slot("room-1").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("slot was not removed after the agent disconnected");
    }
}
