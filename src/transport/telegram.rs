// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16};

use crate::error::{GatewayError, Result};

/// RFC 1006 ID, first byte of every TPKT frame.
pub const TPKT_ID: u8 = 0x03;
/// TPKT (4 bytes) + COTP data header (3 bytes).
pub const TPKT_COTP_LEN: usize = 7;
/// S7 protocol ID.
pub const S7_ID: u8 = 0x32;
/// COTP connection request / confirm PDU types.
const COTP_CONNECT_REQUEST: u8 = 0xE0;
const COTP_CONNECT_CONFIRM: u8 = 0xD0;
/// ISO end-of-transmission marker.
const EOT: u8 = 0x80;

/// DB area identifier (process inputs/outputs and merkers are out of scope).
pub const AREA_DB: u8 = 0x84;
/// Byte access word length.
const WL_BYTE: u8 = 0x02;
/// Transport size for byte payloads in Write Var items.
const TS_BYTE: u8 = 0x04;

/// PDU length requested during negotiation; the CPU may answer with less.
pub const PDU_LEN_REQ: u16 = 480;

/// Read Var / Write Var function codes.
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;

/// Fixed sizes of the S7 job telegrams we exchange.
pub const CONNECT_REQ_LEN: usize = 22;
pub const NEGOTIATE_REQ_LEN: usize = 25;
pub const READ_REQ_LEN: usize = 31;
/// S7 header + parameters + data item header of a Read Var ack.
pub const READ_ACK_LEN: usize = 18;
/// S7 header + parameters + item return code of a Write Var ack.
pub const WRITE_ACK_LEN: usize = 15;

/// Item return codes.
const ITEM_OK: u8 = 0xFF;
const ITEM_INVALID_ADDRESS: u8 = 0x05;
const ITEM_NOT_FOUND: u8 = 0x0A;

/// TPKT + COTP data prefix of every job telegram.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TpktCotpHeader {
    pub tpkt_id: u8,              // 0
    reserved: u8,                 // 1
    pub length: U16<BigEndian>,   // 2..4, whole telegram
    pub cotp_len: u8,             // 4, always 0x02
    pub pdu_type: u8,             // 5, 0xF0 for data
    pub eot: u8,                  // 6, 0x80
}

impl TpktCotpHeader {
    /// Validates the prefix and returns how many body bytes follow it.
    pub fn body_len(&self) -> Result<usize> {
        if self.tpkt_id != TPKT_ID || self.cotp_len != 0x02 || self.pdu_type != 0xF0 {
            return Err(GatewayError::Protocol("invalid ISO header".into()));
        }
        if self.eot != EOT {
            return Err(GatewayError::Protocol("fragmented ISO packet".into()));
        }
        let total = self.length.get() as usize;
        if total <= TPKT_COTP_LEN {
            return Err(GatewayError::Protocol("empty ISO telegram".into()));
        }
        Ok(total - TPKT_COTP_LEN)
    }
}

/// Fixed 12-byte S7 header of an ack-data telegram.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct S7AckHeader {
    pub proto_id: u8,              // 0, 0x32
    pub rosctr: u8,                // 1, 3 = ack-data
    redundancy: U16<BigEndian>,    // 2..4
    pub pdu_ref: U16<BigEndian>,   // 4..6
    pub param_len: U16<BigEndian>, // 6..8
    pub data_len: U16<BigEndian>,  // 8..10
    pub err_class: u8,             // 10
    pub err_code: u8,              // 11
}

impl S7AckHeader {
    pub fn parse(body: &[u8]) -> Result<&Self> {
        let raw = body
            .get(..size_of::<Self>())
            .ok_or_else(|| GatewayError::Protocol("short S7 ack header".into()))?;
        let hdr = Self::ref_from_bytes(raw)
            .map_err(|e| GatewayError::Protocol(format!("malformed S7 ack header: {e}")))?;
        if hdr.proto_id != S7_ID {
            return Err(GatewayError::Protocol(format!(
                "unexpected protocol id 0x{:02x}",
                hdr.proto_id
            )));
        }
        if hdr.err_class != 0 || hdr.err_code != 0 {
            return Err(GatewayError::Protocol(format!(
                "job rejected: class=0x{:02x} code=0x{:02x}",
                hdr.err_class, hdr.err_code
            )));
        }
        Ok(hdr)
    }
}

/// COTP connection request with the TSAP pair derived from rack/slot.
pub fn connect_request(local_tsap: u16, remote_tsap: u16) -> [u8; CONNECT_REQ_LEN] {
    let [lt_hi, lt_lo] = local_tsap.to_be_bytes();
    let [rt_hi, rt_lo] = remote_tsap.to_be_bytes();
    [
        TPKT_ID, 0x00,                      // TPKT
        0x00, CONNECT_REQ_LEN as u8,        // telegram length
        0x11,                               // COTP header length
        COTP_CONNECT_REQUEST,
        0x00, 0x00,                         // dst reference
        0x00, 0x01,                         // src reference
        0x00,                               // class 0, no options
        0xC0, 0x01, 0x0A,                   // proposed TPDU size (1024)
        0xC1, 0x02, lt_hi, lt_lo,           // source TSAP
        0xC2, 0x02, rt_hi, rt_lo,           // destination TSAP
    ]
}

/// True when the peer answered the connection request with a confirm.
pub fn is_connect_confirm(telegram: &[u8]) -> bool {
    telegram.len() >= 6 && telegram[0] == TPKT_ID && telegram[5] == COTP_CONNECT_CONFIRM
}

/// S7 "setup communication" job proposing [`PDU_LEN_REQ`].
pub fn negotiate_request() -> [u8; NEGOTIATE_REQ_LEN] {
    let [pdu_hi, pdu_lo] = PDU_LEN_REQ.to_be_bytes();
    [
        TPKT_ID, 0x00, 0x00, NEGOTIATE_REQ_LEN as u8,
        0x02, 0xF0, EOT,
        S7_ID, 0x01,                        // job
        0x00, 0x00,                         // redundancy
        0x04, 0x00,                         // pdu reference
        0x00, 0x08,                         // parameter length
        0x00, 0x00,                         // data length
        0xF0, 0x00,                         // setup communication
        0x00, 0x01,                         // max AMQ calling
        0x00, 0x01,                         // max AMQ called
        pdu_hi, pdu_lo,
    ]
}

/// Extracts the PDU length granted by the CPU from a negotiation ack body
/// (the telegram without its 7-byte prefix).
pub fn parse_negotiate_ack(body: &[u8]) -> Result<u16> {
    S7AckHeader::parse(body)?;
    let raw = body
        .get(18..20)
        .ok_or_else(|| GatewayError::Protocol("short negotiation ack".into()))?;
    let pdu = u16::from_be_bytes([raw[0], raw[1]]);
    if pdu == 0 {
        return Err(GatewayError::Protocol("CPU granted zero PDU length".into()));
    }
    Ok(pdu)
}

/// Read Var request for `count` bytes of data block `db` starting at byte
/// `start`. The address field carries bit granularity, hence the `<< 3`.
pub fn read_request(db: u16, start: u32, count: u16) -> [u8; READ_REQ_LEN] {
    let [cnt_hi, cnt_lo] = count.to_be_bytes();
    let [db_hi, db_lo] = db.to_be_bytes();
    let address = start << 3;
    [
        TPKT_ID, 0x00, 0x00, READ_REQ_LEN as u8,
        0x02, 0xF0, EOT,
        S7_ID, 0x01,                        // job
        0x00, 0x00,                         // redundancy
        0x05, 0x00,                         // pdu reference
        0x00, 0x0E,                         // parameter length (14)
        0x00, 0x00,                         // data length
        FN_READ_VAR,
        0x01,                               // one item
        0x12, 0x0A, 0x10,                   // var spec, length, syntax id
        WL_BYTE,
        cnt_hi, cnt_lo,
        db_hi, db_lo,
        AREA_DB,
        (address >> 16) as u8, (address >> 8) as u8, address as u8,
    ]
}

/// Write Var request carrying `data` for data block `db` at byte `start`.
pub fn write_request(db: u16, start: u32, data: &[u8]) -> Vec<u8> {
    let count = data.len() as u16;
    let [cnt_hi, cnt_lo] = count.to_be_bytes();
    let [db_hi, db_lo] = db.to_be_bytes();
    let bits = count << 3;
    let [bits_hi, bits_lo] = bits.to_be_bytes();
    let address = start << 3;
    let total = (35 + data.len()) as u16;
    let [len_hi, len_lo] = total.to_be_bytes();
    let payload_len = count + 4;
    let [pl_hi, pl_lo] = payload_len.to_be_bytes();

    let mut req = Vec::with_capacity(total as usize);
    req.extend_from_slice(&[
        TPKT_ID, 0x00, len_hi, len_lo,
        0x02, 0xF0, EOT,
        S7_ID, 0x01,
        0x00, 0x00,
        0x05, 0x00,
        0x00, 0x0E,                         // parameter length (14)
        pl_hi, pl_lo,                       // data length (item header + payload)
        FN_WRITE_VAR,
        0x01,
        0x12, 0x0A, 0x10,
        WL_BYTE,
        cnt_hi, cnt_lo,
        db_hi, db_lo,
        AREA_DB,
        (address >> 16) as u8, (address >> 8) as u8, address as u8,
        0x00,                               // reserved
        TS_BYTE,
        bits_hi, bits_lo,                   // payload size in bits
    ]);
    req.extend_from_slice(data);
    req
}

/// Maps an item return code to a gateway error.
pub fn check_item_code(code: u8) -> Result<()> {
    match code {
        ITEM_OK => Ok(()),
        ITEM_NOT_FOUND => Err(GatewayError::Protocol("data block not found in CPU".into())),
        ITEM_INVALID_ADDRESS => Err(GatewayError::Protocol(
            "invalid address (out of range or optimized block)".into(),
        )),
        other => Err(GatewayError::Protocol(format!(
            "item failed with return code 0x{other:02x}"
        ))),
    }
}
