// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Background tasks keeping a session healthy: a liveness probe that drives
//! the link state machine and triggers reconnects, and an optional heartbeat
//! that toggles a known bit so the PLC can observe the gateway is alive.

use std::{fmt, sync::Arc};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{cfg::config::MonitorConfig, session::session::PlcSession};

/// Link state as observed by the health probe.
///
/// INIT → CONNECTING → CONNECTED ↔ DISCONNECTED → CONNECTING; SHUTDOWN is
/// terminal and only reached through explicit shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Connecting,
    Connected,
    Disconnected,
    Shutdown,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Init => "INIT",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Shutdown => "SHUTDOWN",
        })
    }
}

/// Spawns the health probe for a session.
///
/// Every `check_interval` the probe reads one byte at the configured monitor
/// address. Success moves the session to CONNECTED; failure moves it to
/// DISCONNECTED and the *next* tick attempts a reconnect. State changes are
/// logged on transitions only.
pub fn spawn_health_probe(
    session: Arc<PlcSession>,
    monitor: MonitorConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(session = session.label(), "link health probe started");
        let mut timer = tokio::time::interval(monitor.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut state = LinkState::Init;
        let mut needs_reconnect = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if needs_reconnect {
                transition(&session, &mut state, LinkState::Connecting);
                match session.reconnect().await {
                    Ok(()) => needs_reconnect = false,
                    Err(e) => {
                        debug!(session = session.label(), "reconnect attempt failed: {e}");
                        continue;
                    },
                }
            }

            match session.probe(monitor.db_number, monitor.byte_offset).await {
                Ok(()) => {
                    session.set_link_up(true);
                    transition(&session, &mut state, LinkState::Connected);
                },
                Err(e) => {
                    session.set_link_up(false);
                    if state == LinkState::Connected {
                        error!(session = session.label(), "PLC link lost: {e}");
                    }
                    transition(&session, &mut state, LinkState::Disconnected);
                    needs_reconnect = true;
                },
            }
        }

        transition(&session, &mut state, LinkState::Shutdown);
        session.disconnect().await;
        info!(session = session.label(), "link health probe stopped");
    })
}

/// Spawns the heartbeat writer. At most one session per PLC carries it.
///
/// Every `check_interval` the configured bit is flipped in place so the PLC
/// program can detect a stalled gateway. Failures are logged but never
/// propagated; while the link is down the write is skipped.
pub fn spawn_heartbeat(
    session: Arc<PlcSession>,
    monitor: MonitorConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(session = session.label(), "heartbeat task started");
        let mut timer = tokio::time::interval(monitor.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if !session.is_connected() {
                warn!(session = session.label(), "link down, skipping heartbeat");
                continue;
            }

            match session
                .negate_bit(monitor.db_number, monitor.byte_offset, monitor.bit_index)
                .await
            {
                Ok(()) => debug!(session = session.label(), "heartbeat written"),
                Err(e) => error!(session = session.label(), "heartbeat write failed: {e}"),
            }
        }

        info!(session = session.label(), "heartbeat task stopped");
    })
}

fn transition(session: &PlcSession, state: &mut LinkState, next: LinkState) {
    if *state != next {
        info!(session = session.label(), from = %state, to = %next, "link state changed");
        *state = next;
    }
}
