// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::{Instant, sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    cfg::config::{PlcConfig, RuntimeConfig},
    error::{GatewayError, Result},
    transport::S7Transport,
};

/// Operations slower than this are logged as warnings; on a healthy segment
/// an S7 job round-trip stays well under it.
const SLOW_OP: Duration = Duration::from_millis(200);

/// Pause between tearing a connection down and dialling again.
const RECONNECT_PAUSE: Duration = Duration::from_millis(500);

/// Poll step of [`PlcSession::wait_until_ready`].
const READY_POLL: Duration = Duration::from_millis(100);

/// One S7 session to a PLC. Each gateway keeps two per PLC: the sync lane
/// serving API requests and the async lane serving scheduled sweeps.
///
/// All I/O is serialised on the internal transport mutex; callers block in
/// arrival order. Every acquisition is bounded by the configured lock
/// timeout so a stuck peer cannot deadlock the gateway.
#[derive(Debug)]
pub struct PlcSession {
    label: &'static str,
    plc: PlcConfig,
    runtime: RuntimeConfig,
    transport: Mutex<Option<S7Transport>>,
    connected: AtomicBool,
    /// Process-wide gate ordering `connect()` calls across sessions, so two
    /// lanes to the same PLC cannot race on TCP setup.
    connect_gate: Arc<Mutex<()>>,
}

impl PlcSession {
    pub fn new(
        label: &'static str,
        plc: PlcConfig,
        runtime: RuntimeConfig,
        connect_gate: Arc<Mutex<()>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label,
            plc,
            runtime,
            transport: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_gate,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Best-effort cached link state, owned by the connect/disconnect paths
    /// and the supervisor probe.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_link_up(&self, up: bool) {
        self.connected.store(up, Ordering::Release);
    }

    /// Blocks until the session reports connected or the timeout elapses.
    pub async fn wait_until_ready(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.is_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(session = self.label, "timed out waiting for PLC link");
                return false;
            }
            sleep(READY_POLL).await;
        }
    }

    /// Dials the PLC. Gated by the process-wide connect mutex; already
    /// connected sessions return immediately.
    pub async fn connect(&self) -> Result<()> {
        let _gate = timeout(self.runtime.lock_timeout, self.connect_gate.lock())
            .await
            .map_err(|_| GatewayError::LockTimeout)?;
        let mut slot = self.lock_transport().await?;

        if self.is_connected() && slot.is_some() {
            warn!(session = self.label, "already connected, nothing to do");
            return Ok(());
        }

        match S7Transport::connect(&self.plc, self.runtime.io_timeout).await {
            Ok(transport) => {
                info!(
                    session = self.label,
                    ip = %self.plc.ip,
                    pdu_length = transport.pdu_length(),
                    "connected to PLC"
                );
                *slot = Some(transport);
                self.set_link_up(true);
                Ok(())
            },
            Err(e) => {
                self.set_link_up(false);
                error!(session = self.label, ip = %self.plc.ip, "failed to connect: {e}");
                Err(e)
            },
        }
    }

    /// Closes the socket and clears the cached link state.
    pub async fn disconnect(&self) {
        let _gate = match timeout(self.runtime.lock_timeout, self.connect_gate.lock()).await {
            Ok(g) => g,
            Err(_) => {
                error!(session = self.label, "connect gate busy, cannot disconnect");
                return;
            },
        };
        match self.lock_transport().await {
            Ok(mut slot) => {
                if let Some(mut transport) = slot.take() {
                    transport.close().await;
                    info!(session = self.label, "disconnected from PLC");
                }
                self.set_link_up(false);
            },
            Err(_) => error!(session = self.label, "transport busy, cannot disconnect"),
        }
    }

    /// Tears the connection down and dials again after a short pause.
    pub async fn reconnect(&self) -> Result<()> {
        warn!(session = self.label, "reconnecting to PLC");
        self.disconnect().await;
        sleep(RECONNECT_PAUSE).await;
        self.connect().await
    }

    /// Reads `len` bytes of data block `db` starting at `offset`.
    pub async fn read_range(&self, db: u16, offset: u16, len: usize) -> Result<Bytes> {
        if !self.wait_until_ready(self.runtime.connect_timeout).await {
            return Err(GatewayError::NotConnected);
        }
        let started = Instant::now();
        let result = async {
            let mut slot = self.lock_transport().await?;
            let transport = slot.as_mut().ok_or(GatewayError::NotConnected)?;
            let mut buf = vec![0u8; len];
            transport.read_db(db, offset, &mut buf).await?;
            Ok(Bytes::from(buf))
        }
        .await;
        self.log_round_trip("read_range", db, offset, started.elapsed());
        result
    }

    /// Writes the buffer into data block `db` at `offset`.
    pub async fn write_range(&self, db: u16, offset: u16, data: &[u8]) -> Result<()> {
        if !self.wait_until_ready(self.runtime.connect_timeout).await {
            return Err(GatewayError::NotConnected);
        }
        let started = Instant::now();
        let result = async {
            let mut slot = self.lock_transport().await?;
            let transport = slot.as_mut().ok_or(GatewayError::NotConnected)?;
            transport.write_db(db, offset, data).await
        }
        .await;
        self.log_round_trip("write_range", db, offset, started.elapsed());
        result
    }

    /// One-byte liveness read used by the supervisor. Unlike the regular
    /// operations this does not wait for the cached state to become ready,
    /// since its whole point is discovering that state.
    pub async fn probe(&self, db: u16, offset: u16) -> Result<()> {
        let mut slot = self.lock_transport().await?;
        let transport = slot.as_mut().ok_or(GatewayError::NotConnected)?;
        let mut byte = [0u8; 1];
        transport.read_db(db, offset, &mut byte).await
    }

    /// Reads a byte, flips bit `bit` and writes it back, holding the
    /// transport for the whole read-modify-write so no other caller on this
    /// session can interleave.
    pub async fn negate_bit(&self, db: u16, offset: u16, bit: u8) -> Result<()> {
        if !self.wait_until_ready(self.runtime.connect_timeout).await {
            return Err(GatewayError::NotConnected);
        }
        let started = Instant::now();
        let result = async {
            let mut slot = self.lock_transport().await?;
            let transport = slot.as_mut().ok_or(GatewayError::NotConnected)?;

            let mut byte = [0u8; 1];
            let read_ok = transport.read_db(db, offset, &mut byte).await.is_ok();
            // The original value must have been read back before flipping.
            if !read_ok {
                return Err(GatewayError::Protocol(format!(
                    "negate bit DB{db}.DBX{offset}.{bit}: could not read original byte"
                )));
            }
            byte[0] ^= 1 << bit;
            transport.write_db(db, offset, &byte).await
        }
        .await;
        self.log_round_trip("negate_bit", db, offset, started.elapsed());
        result
    }

    async fn lock_transport(&self) -> Result<MutexGuard<'_, Option<S7Transport>>> {
        timeout(self.runtime.lock_timeout, self.transport.lock())
            .await
            .map_err(|_| GatewayError::LockTimeout)
    }

    fn log_round_trip(&self, op: &'static str, db: u16, offset: u16, elapsed: Duration) {
        debug!(session = self.label, op, db, offset, ?elapsed, "plc round trip");
        if elapsed > SLOW_OP {
            warn!(session = self.label, op, db, offset, ?elapsed, "slow plc round trip");
        }
    }
}
