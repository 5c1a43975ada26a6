// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ISO-on-TCP transport speaking the S7 job subset the gateway needs:
//! connection setup, PDU-length negotiation and chunked Read Var /
//! Write Var against the DB area.

pub mod telegram;

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;
use zerocopy::FromBytes as ZFromBytes;

use crate::{
    cfg::config::PlcConfig,
    error::{GatewayError, Result},
    transport::telegram::{
        READ_ACK_LEN, S7AckHeader, TPKT_COTP_LEN, TpktCotpHeader, WRITE_ACK_LEN, check_item_code,
        connect_request, is_connect_confirm, negotiate_request, parse_negotiate_ack, read_request,
        write_request,
    },
};

/// Local TSAP advertised by the gateway; the remote TSAP encodes a PG
/// connection to the CPU at the configured rack/slot.
const LOCAL_TSAP: u16 = 0x0100;

/// Upper bound on a single inbound telegram, defensive against a confused
/// peer flooding the length field.
const MAX_TELEGRAM: usize = 4096;

/// One live S7 connection. Not concurrency-safe by itself; the session
/// layer serialises access behind its mutex.
#[derive(Debug)]
pub struct S7Transport {
    stream: TcpStream,
    io_timeout: Duration,
    pdu_length: u16,
}

impl S7Transport {
    /// Establishes the TCP connection, performs the ISO handshake and
    /// negotiates the PDU length.
    pub async fn connect(plc: &PlcConfig, io_timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", plc.ip, plc.port);
        let stream = io_with_timeout("tcp connect", TcpStream::connect(&addr), io_timeout).await?;
        stream.set_nodelay(true)?;

        let mut transport = Self { stream, io_timeout, pdu_length: 0 };

        let remote_tsap = 0x0100 | (plc.rack * 0x20 + plc.slot);
        transport
            .send("iso connect", &connect_request(LOCAL_TSAP, remote_tsap))
            .await?;
        let confirm = transport.recv_raw_telegram().await?;
        if !is_connect_confirm(&confirm) {
            return Err(GatewayError::Protocol("ISO connection refused".into()));
        }

        transport.send("pdu negotiation", &negotiate_request()).await?;
        let body = transport.recv_job_body().await?;
        transport.pdu_length = parse_negotiate_ack(&body)?;
        debug!(pdu_length = transport.pdu_length, "S7 connection established");

        Ok(transport)
    }

    /// PDU length granted by the CPU during negotiation.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// Largest Read Var payload per job (the ack header costs 18 bytes).
    fn max_read_chunk(&self) -> usize {
        self.pdu_length.saturating_sub(18).max(1) as usize
    }

    /// Largest Write Var payload per job (the request header costs 28 bytes).
    fn max_write_chunk(&self) -> usize {
        self.pdu_length.saturating_sub(28).max(1) as usize
    }

    /// Fills `buf` from data block `db` starting at byte `start`, splitting
    /// into chunks on the negotiated PDU size.
    pub async fn read_db(&mut self, db: u16, start: u16, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0usize;
        let mut addr = start as u32;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(self.max_read_chunk());
            self.send("read var", &read_request(db, addr, chunk as u16)).await?;

            let body = self.recv_job_body().await?;
            S7AckHeader::parse(&body)?;
            // An error ack carries no payload, so the code comes first.
            check_item_code(*body.get(14).ok_or_else(|| {
                GatewayError::Protocol("truncated read ack".into())
            })?)?;
            if body.len() < READ_ACK_LEN + chunk {
                return Err(GatewayError::Protocol(format!(
                    "read ack too short: {} < {}",
                    body.len(),
                    READ_ACK_LEN + chunk
                )));
            }

            buf[offset..offset + chunk].copy_from_slice(&body[READ_ACK_LEN..READ_ACK_LEN + chunk]);
            offset += chunk;
            addr += chunk as u32;
        }
        Ok(())
    }

    /// Writes `data` into data block `db` at byte `start`, chunked like
    /// [`Self::read_db`]. A byte write never touches anything outside the
    /// addressed range.
    pub async fn write_db(&mut self, db: u16, start: u16, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        let mut addr = start as u32;
        while offset < data.len() {
            let chunk = (data.len() - offset).min(self.max_write_chunk());
            self.send(
                "write var",
                &write_request(db, addr, &data[offset..offset + chunk]),
            )
            .await?;

            let body = self.recv_job_body().await?;
            S7AckHeader::parse(&body)?;
            check_item_code(*body.get(14).ok_or_else(|| {
                GatewayError::Protocol(format!(
                    "write ack too short: {} < {WRITE_ACK_LEN}",
                    body.len()
                ))
            })?)?;

            offset += chunk;
            addr += chunk as u32;
        }
        Ok(())
    }

    /// Shuts the socket down; errors are ignored since the peer may already
    /// be gone.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn send(&mut self, label: &'static str, bytes: &[u8]) -> Result<()> {
        io_with_timeout(label, self.stream.write_all(bytes), self.io_timeout).await
    }

    /// Reads one telegram of any COTP type: TPKT prefix first, then however
    /// many bytes its length field announces. Used for the connect confirm,
    /// whose COTP header is not a data header.
    async fn recv_raw_telegram(&mut self) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        io_with_timeout("read tpkt", self.stream.read_exact(&mut head), self.io_timeout).await?;
        if head[0] != telegram::TPKT_ID {
            return Err(GatewayError::Protocol("not a TPKT frame".into()));
        }
        let total = u16::from_be_bytes([head[2], head[3]]) as usize;
        if !(4..=MAX_TELEGRAM).contains(&total) {
            return Err(GatewayError::Protocol(format!("bad telegram length {total}")));
        }
        let mut frame = vec![0u8; total];
        frame[..4].copy_from_slice(&head);
        io_with_timeout(
            "read telegram",
            self.stream.read_exact(&mut frame[4..]),
            self.io_timeout,
        )
        .await?;
        Ok(frame)
    }

    /// Reads one data telegram and returns its body (everything after the
    /// 7-byte TPKT + COTP prefix).
    async fn recv_job_body(&mut self) -> Result<Vec<u8>> {
        let mut prefix = [0u8; TPKT_COTP_LEN];
        io_with_timeout("read iso header", self.stream.read_exact(&mut prefix), self.io_timeout)
            .await?;
        let header = TpktCotpHeader::ref_from_bytes(&prefix)
            .map_err(|e| GatewayError::Protocol(format!("malformed ISO header: {e}")))?;
        let body_len = header.body_len()?;
        if body_len > MAX_TELEGRAM {
            return Err(GatewayError::Protocol(format!("oversized telegram body {body_len}")));
        }
        let mut body = vec![0u8; body_len];
        io_with_timeout("read body", self.stream.read_exact(&mut body), self.io_timeout).await?;
        Ok(body)
    }
}

/// Bounds a socket operation with the transport I/O timeout.
async fn io_with_timeout<F, T>(label: &'static str, fut: F, io_timeout: Duration) -> Result<T>
where F: Future<Output = std::io::Result<T>> {
    match timeout(io_timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(GatewayError::Protocol(format!("{label} timed out"))),
    }
}
