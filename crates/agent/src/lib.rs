// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! kitt-agent: the per-room orchestrator.
//!
//! ## Modules
//!
//! - [`activation`]: the wake-phrase/solo/multi-party decision policy.
//! - [`memory`]: the append-only conversation history.
//! - [`room`]: the room/SFU collaborator boundary (`RoomClient`).
//! - [`agent`]: the actor that wires everything above into one
//!   answer-turn pipeline per room.

pub mod activation;
pub mod agent;
pub mod memory;
pub mod room;

pub use activation::{detect_activation, ActivationController, ActivationIntent, Evaluation, Quorum, WatchdogArm, IDLE_TIMEOUT};
pub use agent::{AgentConfig, AgentHandle, BOT_IDENTITY};
pub use memory::ConversationMemory;
pub use room::{AgentEvent, RoomClient, StubRoomClient, TrackSource};
