// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{path::Path, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use s7_gateway::{
    api::{self, ApiState},
    cfg::{
        config::{ApiConfig, GatewayConfig, RuntimeConfig, resolve_config_path},
        logger::init_logger,
    },
    gateway::Gateway,
    tags::store::load_declarations,
    utils::acquire_instance_lock,
};
use tokio::time::timeout;
use tracing::info;

const DEFAULT_PLC_CONFIG: &str = "config/PLC1_CONF.ini";
const DEFAULT_TAG_STORE: &str = "config/Database.db";

fn main() -> ExitCode {
    // The lock must be taken before anything else spins up, and held for the
    // process lifetime.
    let _lock = match acquire_instance_lock("s7-gateway") {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            println!("gateway already running, exiting");
            return ExitCode::SUCCESS;
        },
        Err(e) => {
            eprintln!("instance check failed: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gateway failed: {e:#}");
            ExitCode::FAILURE
        },
    }
    // `_lock` drops here, releasing the instance lock on clean exit.
}

#[tokio::main]
async fn run() -> Result<()> {
    let _log_guard = init_logger(Some(Path::new("logs")))?;

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_PLC_CONFIG.to_string());
    let store_path = args.next().unwrap_or_else(|| DEFAULT_TAG_STORE.to_string());

    let cfg = GatewayConfig::load_from_file(resolve_config_path(&config_path)?)
        .with_context(|| format!("loading {config_path}"))?;
    info!(
        ip = %cfg.plc.ip,
        rack = cfg.plc.rack,
        slot = cfg.plc.slot,
        port = cfg.plc.port,
        "PLC configuration loaded"
    );

    let declarations = load_declarations(resolve_config_path(&store_path)?)
        .with_context(|| format!("loading {store_path}"))?;

    let gateway = Gateway::start(cfg, RuntimeConfig::default(), declarations)
        .await
        .context("starting gateway")?;

    let api_cfg = ApiConfig::from_env();
    let state = ApiState {
        engine: Arc::clone(&gateway.engine),
        max_batch_size: api_cfg.max_batch_size,
    };
    let addr = format!("{}:{}", api_cfg.host, api_cfg.port);
    let api_task = tokio::spawn(api::serve(state, addr, gateway.cancel.clone()));

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    gateway.shutdown().await;
    match timeout(Duration::from_secs(5), api_task).await {
        Ok(joined) => joined.context("api server task")??,
        Err(_) => info!("api server did not stop in time, leaking it"),
    }
    Ok(())
}
