// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-interval background jobs: the batch read sweep and the pending
//! write flush, both on the async lane.
//!
//! Each job runs on its own task with a skipping interval, so a slow pass
//! never overlaps itself and backlogged ticks coalesce into the most recent
//! one. A failing pass is logged and the cadence continues.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tags::TagEngine;

/// Ticks arriving later than this past their slot are logged as misfires.
const MISFIRE_GRACE: Duration = Duration::from_secs(1);

/// Spawns the read sweep and the write flush tickers.
pub fn spawn_sweeps(
    engine: Arc<TagEngine>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_read_sweep(Arc::clone(&engine), sweep_interval, cancel.clone()),
        spawn_write_flush(engine, sweep_interval, cancel),
    ]
}

fn spawn_read_sweep(
    engine: Arc<TagEngine>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?sweep_interval, "background read sweep started");
        let mut timer = interval(sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut due = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            observe_misfire("read_sweep", &mut due, sweep_interval);

            let results = engine.read_all().await;
            let failed = results.values().filter(|v| v.is_none()).count();
            if failed > 0 {
                warn!(total = results.len(), failed, "read sweep finished with failures");
            } else {
                debug!(total = results.len(), "read sweep finished");
            }
        }
        info!("background read sweep stopped");
    })
}

fn spawn_write_flush(
    engine: Arc<TagEngine>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?sweep_interval, "background write flush started");
        let mut timer = interval(sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut due = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            observe_misfire("write_flush", &mut due, sweep_interval);

            let results = engine.flush_pending().await;
            if results.is_empty() {
                continue;
            }
            let failed = results.values().filter(|ok| !**ok).count();
            if failed > 0 {
                warn!(total = results.len(), failed, "write flush finished with failures");
            } else {
                debug!(total = results.len(), "write flush finished");
            }
        }
        info!("background write flush stopped");
    })
}

fn observe_misfire(job: &'static str, due: &mut Instant, sweep_interval: Duration) {
    let now = Instant::now();
    if now > *due + MISFIRE_GRACE {
        warn!(job, late = ?(now - *due), "tick delayed past misfire grace, coalescing");
    }
    *due = now + sweep_interval;
}
