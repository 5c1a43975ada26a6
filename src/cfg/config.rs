// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// Per-PLC settings, loaded from an INI file with `[PLC]` and `[MONITOR]`
/// sections. Missing keys fall back to the defaults of a factory-fresh
/// S7-1200 reachable on the local subnet.
#[derive(Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    /// Connection endpoint of the PLC.
    pub plc: PlcConfig,
    /// Liveness/heartbeat probe address and cadence.
    pub monitor: MonitorConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PlcConfig {
    pub ip: String,
    pub rack: u16,
    pub slot: u16,
    pub port: u16,
}

/// The probe address doubles as the heartbeat address: the health task reads
/// one byte there, the heartbeat task toggles `bit_index` of that byte.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Probe/heartbeat cadence in seconds.
    pub check_interval: u64,
    pub db_number: u16,
    pub byte_offset: u16,
    pub bit_index: u8,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}

impl GatewayConfig {
    /// Loads the configuration from an INI file, applies fallback defaults,
    /// validates invariants and returns the ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GatewayError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let raw = config::Config::builder()
            .set_default("plc.ip", "192.168.0.1")
            .and_then(|b| b.set_default("plc.rack", 0))
            .and_then(|b| b.set_default("plc.slot", 1))
            .and_then(|b| b.set_default("plc.port", 102))
            .and_then(|b| b.set_default("monitor.check_interval", 2))
            .and_then(|b| b.set_default("monitor.db_number", 1))
            .and_then(|b| b.set_default("monitor.byte_offset", 1))
            .and_then(|b| b.set_default("monitor.bit_index", 0))
            .map_err(|e| GatewayError::Config(e.to_string()))?
            .add_source(config::File::new(
                path.to_str().ok_or_else(|| {
                    GatewayError::Config(format!("non-utf8 config path: {}", path.display()))
                })?,
                config::FileFormat::Ini,
            ))
            .build()
            .map_err(|e| {
                GatewayError::Config(format!("failed to parse {}: {e}", path.display()))
            })?;

        let cfg: GatewayConfig = raw
            .try_deserialize()
            .map_err(|e| GatewayError::Config(format!("invalid config {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.plc.ip.is_empty() {
            return Err(GatewayError::Config("plc.ip must not be empty".into()));
        }
        if self.plc.port == 0 {
            return Err(GatewayError::Config("plc.port must be non-zero".into()));
        }
        if self.monitor.check_interval == 0 {
            return Err(GatewayError::Config(
                "monitor.check_interval must be >= 1 second".into(),
            ));
        }
        if self.monitor.bit_index > 7 {
            return Err(GatewayError::Config(format!(
                "monitor.bit_index must be 0..=7, got {}",
                self.monitor.bit_index
            )));
        }
        Ok(())
    }
}

/// Runtime knobs that live outside the INI file. The values mirror what the
/// gateway has always shipped with; they rarely need tuning.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Bound on acquiring the session or connect mutex.
    pub lock_timeout: Duration,
    /// How long an operation waits for the link before failing NotConnected.
    pub connect_timeout: Duration,
    /// Bound on a single socket read or write inside the transport.
    pub io_timeout: Duration,
    /// Cadence of the background read sweep and write flush.
    pub sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_millis(200),
        }
    }
}

/// REST surface settings, environment-driven like the rest of the process
/// plumbing (`GATEWAY_HOST`, `GATEWAY_PORT`, `MAX_BATCH_SIZE`).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_batch_size: usize,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);
        let max_batch_size = env::var("MAX_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        Self { host, port, max_batch_size }
    }
}

/// Resolves a possibly-relative config path against the current working
/// directory without requiring the file to exist yet.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = env::current_dir()
        .map_err(|e| GatewayError::Config(format!("cannot get current working dir: {e}")))?;
    Ok(cwd.join(p))
}
