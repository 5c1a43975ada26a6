// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::Serialize;

use crate::error::{GatewayError, Result};

/// Data types a tag can carry, matching the S7 elementary types the gateway
/// mirrors. Dispatch is a tagged variant; each arm knows its byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int,
    DInt,
    Real,
    LReal,
    Str,
}

impl DataType {
    /// Parses the `data_type` column of the declaration store.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bool" => Ok(DataType::Bool),
            "int" => Ok(DataType::Int),
            "dint" => Ok(DataType::DInt),
            "real" => Ok(DataType::Real),
            "lreal" => Ok(DataType::LReal),
            "string" => Ok(DataType::Str),
            other => Err(GatewayError::Config(format!("unknown tag type: {other}"))),
        }
    }

    /// Fixed payload width in bytes; `None` for strings, whose width comes
    /// from the declaration.
    pub fn fixed_width(self) -> Option<u16> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int => Some(2),
            DataType::DInt => Some(4),
            DataType::Real => Some(4),
            DataType::LReal => Some(8),
            DataType::Str => None,
        }
    }

    /// Bytes the tag occupies in its data block. Strings carry a two-byte
    /// max-length/actual-length header in front of the payload.
    pub fn effective_size(self, declared_size: u16) -> u16 {
        match self {
            DataType::Str => declared_size + 2,
            _ => self.fixed_width().unwrap_or(declared_size),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::DInt => "dint",
            DataType::Real => "real",
            DataType::LReal => "lreal",
            DataType::Str => "string",
        })
    }
}

/// A typed tag value. Serialises to plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i16),
    DInt(i32),
    Real(f32),
    LReal(f64),
    Str(String),
}

impl TagValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TagValue::Bool(_) => DataType::Bool,
            TagValue::Int(_) => DataType::Int,
            TagValue::DInt(_) => DataType::DInt,
            TagValue::Real(_) => DataType::Real,
            TagValue::LReal(_) => DataType::LReal,
            TagValue::Str(_) => DataType::Str,
        }
    }

    /// Converts a JSON scalar into a value of the declared type. Mismatched
    /// or out-of-range inputs are rejected at the API boundary.
    pub fn from_json(ty: DataType, raw: &serde_json::Value) -> Result<Self> {
        let mismatch = || {
            GatewayError::Encoding(format!("value {raw} does not fit declared type {ty}"))
        };
        match ty {
            DataType::Bool => raw.as_bool().map(TagValue::Bool).ok_or_else(mismatch),
            DataType::Int => raw
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .map(TagValue::Int)
                .ok_or_else(mismatch),
            DataType::DInt => raw
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(TagValue::DInt)
                .ok_or_else(mismatch),
            DataType::Real => raw
                .as_f64()
                .map(|v| TagValue::Real(v as f32))
                .ok_or_else(mismatch),
            DataType::LReal => raw.as_f64().map(TagValue::LReal).ok_or_else(mismatch),
            DataType::Str => raw
                .as_str()
                .map(|s| TagValue::Str(s.to_string()))
                .ok_or_else(mismatch),
        }
    }

    /// Parses the textual `default_value` column of the declaration store.
    pub fn from_text(ty: DataType, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let bad = || {
            GatewayError::Config(format!("default value {raw:?} does not fit type {ty}"))
        };
        match ty {
            DataType::Bool => match raw {
                "1" | "true" | "True" => Ok(TagValue::Bool(true)),
                "0" | "false" | "False" => Ok(TagValue::Bool(false)),
                _ => Err(bad()),
            },
            DataType::Int => raw.parse().map(TagValue::Int).map_err(|_| bad()),
            DataType::DInt => raw.parse().map(TagValue::DInt).map_err(|_| bad()),
            DataType::Real => raw.parse().map(TagValue::Real).map_err(|_| bad()),
            DataType::LReal => raw.parse().map(TagValue::LReal).map_err(|_| bad()),
            DataType::Str => Ok(TagValue::Str(raw.to_string())),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::DInt(v) => write!(f, "{v}"),
            TagValue::Real(v) => write!(f, "{v}"),
            TagValue::LReal(v) => write!(f, "{v}"),
            TagValue::Str(v) => write!(f, "{v}"),
        }
    }
}
