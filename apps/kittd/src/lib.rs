// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! kittd: the Supervisor process — the lobby HTTP surface and the
//! process-wide `room → Agent` map on top of `kitt-agent`.

pub mod cli;
pub mod config;
pub mod logging;
pub mod providers;
pub mod room_unimplemented;
pub mod server;
pub mod supervisor;
