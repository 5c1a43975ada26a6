// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rusqlite::Connection;
use s7_gateway::tags::{DataType, TagValue, store::load_from_connection};

const SCHEMA: &str = "CREATE TABLE config_plc_tags (\
                      id INTEGER PRIMARY KEY, plc TEXT, \"group\" TEXT, \
                      tagpath TEXT, name TEXT, description TEXT, \
                      default_value TEXT, config_monitor INTEGER, \
                      data_type TEXT, db_number INTEGER, byte_offset INTEGER, \
                      bit_index INTEGER, size INTEGER)";

fn store_with(rows: &[&str]) -> Connection {
    let conn = Connection::open_in_memory().expect("open sqlite");
    conn.execute(SCHEMA, []).expect("create table");
    for row in rows {
        conn.execute(
            &format!(
                "INSERT INTO config_plc_tags (plc, \"group\", tagpath, name, description, \
                 default_value, config_monitor, data_type, db_number, byte_offset, \
                 bit_index, size) VALUES {row}"
            ),
            [],
        )
        .expect("insert row");
    }
    conn
}

#[test]
fn loads_declarations_in_column_order() {
    let conn = store_with(&[
        "('PLC1', 'motors', 'Motor1_Status', 'Motor1_Status', 'motor 1 state', \
          '0', 1, 'bool', 101, 0, 0, 1)",
        "('PLC1', 'motors', 'Motor1_Speed', 'Motor1_Speed', 'motor 1 speed', \
          NULL, 0, 'int', 101, 2, NULL, 2)",
        "('PLC1', 'labels', 'Machine_Name', 'Machine_Name', '', \
          NULL, 0, 'string', 102, 0, NULL, 20)",
    ]);

    let declarations = load_from_connection(&conn).expect("load");
    assert_eq!(declarations.len(), 3);

    let motor = &declarations[0];
    assert_eq!(motor.tag_path, "Motor1_Status");
    assert_eq!(motor.plc, "PLC1");
    assert_eq!(motor.group, "motors");
    assert_eq!(motor.data_type, DataType::Bool);
    assert_eq!(motor.db_number, 101);
    assert_eq!(motor.start_offset, 0);
    assert_eq!(motor.bit_index, Some(0));
    assert_eq!(motor.size, 1);
    assert_eq!(motor.default_value, Some(TagValue::Bool(false)));
    assert!(motor.config_monitor);

    let speed = &declarations[1];
    assert_eq!(speed.data_type, DataType::Int);
    assert_eq!(speed.bit_index, None);
    assert_eq!(speed.default_value, None);
    assert!(!speed.config_monitor);

    let label = &declarations[2];
    assert_eq!(label.data_type, DataType::Str);
    assert_eq!(label.size, 20);
    assert_eq!(label.effective_size(), 22);
}

#[test]
fn unknown_data_type_is_fatal() {
    let conn = store_with(&[
        "('PLC1', 'g', 'Bad_Tag', 'Bad_Tag', '', NULL, 0, 'word', 1, 0, NULL, 2)",
    ]);
    assert!(load_from_connection(&conn).is_err());
}

#[test]
fn bool_without_bit_index_is_fatal() {
    let conn = store_with(&[
        "('PLC1', 'g', 'Bad_Bool', 'Bad_Bool', '', NULL, 0, 'bool', 1, 0, NULL, 1)",
    ]);
    assert!(load_from_connection(&conn).is_err());
}

#[test]
fn mismatched_default_is_fatal() {
    let conn = store_with(&[
        "('PLC1', 'g', 'Bad_Default', 'Bad_Default', '', 'abc', 0, 'int', 1, 0, NULL, 2)",
    ]);
    assert!(load_from_connection(&conn).is_err());
}

#[test]
fn empty_store_yields_no_declarations() {
    let conn = store_with(&[]);
    assert!(load_from_connection(&conn).expect("load").is_empty());
}
