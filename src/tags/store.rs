// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Loader for the tabular tag declaration store, a SQLite database with one
//! `config_plc_tags` table maintained by the commissioning tooling.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::{
    error::{GatewayError, Result},
    tags::{
        tag::TagDeclaration,
        value::{DataType, TagValue},
    },
};

const SELECT_TAGS: &str = "SELECT id, plc, \"group\", tagpath, name, description, \
                           default_value, config_monitor, data_type, db_number, \
                           byte_offset, bit_index, size FROM config_plc_tags ORDER BY id";

/// Reads every tag declaration from the store. Any malformed row is a fatal
/// configuration error; the gateway must not start with a partial tag set.
pub fn load_declarations<P: AsRef<Path>>(db_path: P) -> Result<Vec<TagDeclaration>> {
    let db_path = db_path.as_ref();
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| {
            GatewayError::Config(format!("cannot open tag store {}: {e}", db_path.display()))
        })?;
    let declarations = load_from_connection(&conn)?;
    info!(
        count = declarations.len(),
        store = %db_path.display(),
        "tag declarations loaded"
    );
    Ok(declarations)
}

/// Split out so tests can run against an in-memory database.
pub fn load_from_connection(conn: &Connection) -> Result<Vec<TagDeclaration>> {
    let mut stmt = conn
        .prepare(SELECT_TAGS)
        .map_err(|e| GatewayError::Config(format!("tag store query failed: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawDeclaration {
                plc: row.get(1)?,
                group: row.get(2)?,
                tag_path: row.get(3)?,
                name: row.get(4)?,
                description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                default_value: row.get(6)?,
                config_monitor: row.get::<_, i64>(7)? != 0,
                data_type: row.get(8)?,
                db_number: row.get::<_, i64>(9)?,
                byte_offset: row.get::<_, i64>(10)?,
                bit_index: row.get(11)?,
                size: row.get::<_, i64>(12)?,
            })
        })
        .map_err(|e| GatewayError::Config(format!("tag store query failed: {e}")))?;

    let mut declarations = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| GatewayError::Config(format!("bad tag row: {e}")))?;
        declarations.push(raw.into_declaration()?);
    }
    Ok(declarations)
}

struct RawDeclaration {
    plc: String,
    group: String,
    tag_path: String,
    name: String,
    description: String,
    default_value: Option<String>,
    config_monitor: bool,
    data_type: String,
    db_number: i64,
    byte_offset: i64,
    bit_index: Option<i64>,
    size: i64,
}

impl RawDeclaration {
    fn into_declaration(self) -> Result<TagDeclaration> {
        let data_type = DataType::parse(&self.data_type)
            .map_err(|e| GatewayError::Config(format!("tag {}: {e}", self.tag_path)))?;

        let default_value = match self.default_value.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(TagValue::from_text(data_type, raw).map_err(|e| {
                GatewayError::Config(format!("tag {}: {e}", self.tag_path))
            })?),
        };

        let decl = TagDeclaration {
            tag_path: self.tag_path,
            plc: self.plc,
            group: self.group,
            name: self.name,
            description: self.description,
            db_number: to_u16(self.db_number, "db_number")?,
            start_offset: to_u16(self.byte_offset, "byte_offset")?,
            size: to_u16(self.size, "size")?,
            data_type,
            bit_index: self
                .bit_index
                .map(|raw| {
                    u8::try_from(raw).map_err(|_| {
                        GatewayError::Config(format!("bit_index {raw} out of range"))
                    })
                })
                .transpose()?,
            default_value,
            config_monitor: self.config_monitor,
        };
        decl.validate()?;
        Ok(decl)
    }
}

fn to_u16(raw: i64, column: &str) -> Result<u16> {
    u16::try_from(raw)
        .map_err(|_| GatewayError::Config(format!("{column} {raw} out of range")))
}
