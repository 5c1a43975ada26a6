// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pure translation between typed tag values and data-block bytes.
//!
//! All multi-byte numbers follow the S7 big-endian layout. Strings use the
//! Siemens STRING format: one byte declared maximum, one byte actual length,
//! then the payload, GBK-encoded to support Chinese shop-floor labels.

use encoding_rs::GBK;
use tracing::warn;

use crate::{
    error::{GatewayError, Result},
    tags::value::{DataType, TagValue},
};

/// Extracts bit `bit` of byte 0 of the slice.
pub fn get_bit(buf: &[u8], bit: u8) -> Result<bool> {
    let byte = buf
        .first()
        .ok_or_else(|| GatewayError::Protocol("empty buffer for bit read".into()))?;
    Ok(byte & (1 << bit) != 0)
}

/// Sets or clears bit `bit` of `buf[offset]` in place, leaving every other
/// bit of the byte untouched.
pub fn set_bit(buf: &mut [u8], offset: usize, bit: u8, value: bool) -> Result<()> {
    let byte = buf.get_mut(offset).ok_or_else(|| {
        GatewayError::Protocol(format!("bit offset {offset} outside buffer"))
    })?;
    if value {
        *byte |= 1 << bit;
    } else {
        *byte &= !(1 << bit);
    }
    Ok(())
}

/// Decodes a value of the declared type from `buf`, which must cover the
/// tag's effective size (`size + 2` for strings).
pub fn decode(ty: DataType, bit_index: Option<u8>, size: u16, buf: &[u8]) -> Result<TagValue> {
    let need = ty.effective_size(size) as usize;
    let buf = buf.get(..need).ok_or_else(|| {
        GatewayError::Protocol(format!("buffer too short: {} < {need}", buf.len()))
    })?;
    match ty {
        DataType::Bool => {
            let bit = bit_index
                .ok_or_else(|| GatewayError::Config("bool tag without bit_index".into()))?;
            Ok(TagValue::Bool(get_bit(buf, bit)?))
        },
        DataType::Int => Ok(TagValue::Int(i16::from_be_bytes([buf[0], buf[1]]))),
        DataType::DInt => Ok(TagValue::DInt(i32::from_be_bytes([
            buf[0], buf[1], buf[2], buf[3],
        ]))),
        DataType::Real => Ok(TagValue::Real(f32::from_be_bytes([
            buf[0], buf[1], buf[2], buf[3],
        ]))),
        DataType::LReal => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[..8]);
            Ok(TagValue::LReal(f64::from_be_bytes(raw)))
        },
        DataType::Str => decode_string(buf, size).map(TagValue::Str),
    }
}

/// Encodes `value` into `buf` at `offset`, patching only the bytes the tag
/// owns (and for bools, only the addressed bit).
pub fn encode_at(
    buf: &mut [u8],
    offset: usize,
    bit_index: Option<u8>,
    size: u16,
    value: &TagValue,
) -> Result<()> {
    let need = value.data_type().effective_size(size) as usize;
    if offset + need > buf.len() {
        return Err(GatewayError::Protocol(format!(
            "tag range {offset}..{} outside block buffer of {}",
            offset + need,
            buf.len()
        )));
    }
    match value {
        TagValue::Bool(v) => {
            let bit = bit_index
                .ok_or_else(|| GatewayError::Config("bool tag without bit_index".into()))?;
            set_bit(buf, offset, bit, *v)
        },
        TagValue::Int(v) => {
            buf[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
            Ok(())
        },
        TagValue::DInt(v) => {
            buf[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
            Ok(())
        },
        TagValue::Real(v) => {
            buf[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
            Ok(())
        },
        TagValue::LReal(v) => {
            buf[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
            Ok(())
        },
        TagValue::Str(v) => {
            let encoded = encode_string(v, size)?;
            buf[offset..offset + encoded.len()].copy_from_slice(&encoded);
            Ok(())
        },
    }
}

/// Decodes an S7 string from a buffer starting at its two-byte header.
///
/// A PLC program may leave a half multibyte character at the end when it
/// truncates byte-wise; the declared actual length is retried one byte
/// shorter before giving up.
pub fn decode_string(buf: &[u8], size: u16) -> Result<String> {
    if buf.len() < 2 {
        return Err(GatewayError::Protocol("string buffer shorter than header".into()));
    }
    let actual = (buf[1] as usize).min(size as usize).min(buf.len() - 2);
    let payload = &buf[2..2 + actual];

    if let Some(s) = gbk_decode(payload) {
        return Ok(s);
    }
    if let Some(s) = payload.split_last().and_then(|(_, head)| gbk_decode(head)) {
        return Ok(s);
    }
    Err(GatewayError::Encoding(format!(
        "string payload of {actual} bytes is not valid GBK"
    )))
}

/// Builds the full `size + 2` byte S7 string image: header, GBK payload,
/// zero-filled remainder.
pub fn encode_string(value: &str, size: u16) -> Result<Vec<u8>> {
    let payload = gbk_encode_truncated(value, size as usize)?;
    let mut buf = vec![0u8; size as usize + 2];
    buf[0] = size.min(u8::MAX as u16) as u8;
    buf[1] = payload.len() as u8;
    buf[2..2 + payload.len()].copy_from_slice(&payload);
    Ok(buf)
}

/// GBK-encodes `value`, truncating to at most `max` bytes without splitting
/// a double-byte character.
fn gbk_encode_truncated(value: &str, max: usize) -> Result<Vec<u8>> {
    let (encoded, _, had_errors) = GBK.encode(value);
    if had_errors {
        return Err(GatewayError::Encoding(format!(
            "string {value:?} cannot be represented in GBK"
        )));
    }
    let mut bytes = encoded.into_owned();
    if bytes.len() > max {
        bytes.truncate(max);
        if gbk_decode(&bytes).is_none() {
            // The cut landed inside a double-byte character.
            bytes.pop();
            if gbk_decode(&bytes).is_none() {
                return Err(GatewayError::Encoding(format!(
                    "string {value:?} cannot be truncated to {max} GBK bytes"
                )));
            }
        }
        warn!(max, "string too long for tag, truncated");
    }
    Ok(bytes)
}

fn gbk_decode(bytes: &[u8]) -> Option<String> {
    let (decoded, had_errors) = GBK.decode_without_bom_handling(bytes);
    if had_errors { None } else { Some(decoded.into_owned()) }
}
