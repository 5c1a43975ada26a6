// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod session;
pub mod supervisor;

pub use session::PlcSession;
pub use supervisor::{LinkState, spawn_health_probe, spawn_heartbeat};
