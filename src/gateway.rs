// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wiring of one gateway process: two sessions per PLC, their supervisors,
//! the tag registry, the batch engine and the sweep scheduler. Everything is
//! built here and passed by reference; there are no hidden globals.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cfg::config::{GatewayConfig, RuntimeConfig},
    error::Result,
    handlers,
    scheduler,
    session::{PlcSession, spawn_health_probe, spawn_heartbeat},
    tags::{TagDeclaration, TagEngine, TagRegistry},
};

/// Bound on waiting for one background task during shutdown; tasks that do
/// not stop in time are logged and leaked, which is acceptable since
/// shutdown is process exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Gateway {
    pub sync_lane: Arc<PlcSession>,
    pub async_lane: Arc<PlcSession>,
    pub registry: Arc<TagRegistry>,
    pub engine: Arc<TagEngine>,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Builds and starts the whole stack: sessions (heartbeat on the sync
    /// lane only), supervisors, registry, default handlers and sweeps.
    ///
    /// A PLC that is unreachable at startup is not fatal; the supervisors
    /// keep reconnecting in the background.
    pub async fn start(
        cfg: GatewayConfig,
        runtime: RuntimeConfig,
        declarations: Vec<TagDeclaration>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let connect_gate = Arc::new(Mutex::new(()));

        let sync_lane = PlcSession::new("sync", cfg.plc.clone(), runtime, Arc::clone(&connect_gate));
        let async_lane =
            PlcSession::new("async", cfg.plc.clone(), runtime, Arc::clone(&connect_gate));

        for session in [&sync_lane, &async_lane] {
            if let Err(e) = session.connect().await {
                warn!(
                    session = session.label(),
                    "starting disconnected, supervisor will retry: {e}"
                );
            }
        }

        let mut tasks = vec![
            spawn_health_probe(Arc::clone(&sync_lane), cfg.monitor, cancel.clone()),
            spawn_health_probe(Arc::clone(&async_lane), cfg.monitor, cancel.clone()),
            // One heartbeat per PLC is enough for it to see the gateway.
            spawn_heartbeat(Arc::clone(&sync_lane), cfg.monitor, cancel.clone()),
        ];

        let registry = TagRegistry::initialize(declarations).await?;
        handlers::register_default_handlers(&registry);

        let engine = TagEngine::new(
            Arc::clone(&registry),
            Arc::clone(&sync_lane),
            Arc::clone(&async_lane),
        );
        tasks.extend(scheduler::spawn_sweeps(
            Arc::clone(&engine),
            runtime.sweep_interval,
            cancel.clone(),
        ));

        info!("gateway started");
        Ok(Self { sync_lane, async_lane, registry, engine, cancel, tasks })
    }

    /// Cooperative shutdown: cancel, join with a bound, drain the monitors,
    /// close the sockets.
    pub async fn shutdown(self) {
        info!("gateway shutting down");
        self.cancel.cancel();

        for task in self.tasks {
            if timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!("background task did not stop in time, leaking it");
            }
        }

        for tag in self.registry.all() {
            tag.monitor().enable(false).await;
        }

        self.sync_lane.disconnect().await;
        self.async_lane.disconnect().await;
        info!("gateway stopped");
    }
}
