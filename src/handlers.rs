// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Business handlers attached to monitored tags. The stock build only logs
//! the transitions; site-specific logic hooks in here.

use std::sync::Arc;

use tracing::info;

use crate::tags::{EventKind, TagRegistry};

/// Registers the default edge handlers on every tag that has its monitor
/// configured. Called once at startup, after the registry is built.
pub fn register_default_handlers(registry: &TagRegistry) {
    for tag in registry.all() {
        if !tag.declaration().config_monitor {
            continue;
        }
        info!(tag_path = %tag.declaration().tag_path, "registering edge handlers");
        tag.monitor().register_handler(
            EventKind::Rising,
            Arc::new(|event| info!(target: "s7_gateway::handlers", "rising edge: {event}")),
        );
        tag.monitor().register_handler(
            EventKind::Falling,
            Arc::new(|event| info!(target: "s7_gateway::handlers", "falling edge: {event}")),
        );
    }
}
