// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use s7_gateway::tags::{
    DataType, Tag,
    batch::{covering_range, group_by_db},
};

use super::{bool_decl, decl};

/// Three tags at offsets 0 (bool, 1), 2 (int, 2) and
/// 4 (real, 4) coalesce into one range read of (0, 8).
#[test]
fn covering_range_coalesces_a_block() {
    let tags = vec![
        Tag::new(bool_decl("motor", 101, 0, 0)),
        Tag::new(decl("speed", 101, 2, 2, DataType::Int, None)),
        Tag::new(decl("temp", 101, 4, 4, DataType::Real, None)),
    ];
    assert_eq!(covering_range(&tags), Some((0, 8)));
}

/// String tags extend the range by their two-byte header.
#[test]
fn covering_range_counts_string_headers() {
    let tags = vec![Tag::new(decl("label", 102, 0, 20, DataType::Str, None))];
    assert_eq!(covering_range(&tags), Some((0, 22)));

    let tags = vec![
        Tag::new(decl("speed", 102, 0, 2, DataType::Int, None)),
        Tag::new(decl("label", 102, 10, 20, DataType::Str, None)),
    ];
    assert_eq!(covering_range(&tags), Some((0, 32)));
}

#[test]
fn covering_range_starts_at_the_lowest_tag() {
    let tags = vec![
        Tag::new(decl("a", 7, 100, 4, DataType::DInt, None)),
        Tag::new(decl("b", 7, 96, 2, DataType::Int, None)),
        Tag::new(decl("c", 7, 120, 8, DataType::LReal, None)),
    ];
    // 96 ..= 127 inclusive.
    assert_eq!(covering_range(&tags), Some((96, 32)));
}

#[test]
fn covering_range_of_nothing_is_none() {
    assert_eq!(covering_range(&[]), None);
}

#[test]
fn grouping_splits_by_data_block() {
    let groups = group_by_db(vec![
        Tag::new(bool_decl("a", 101, 0, 0)),
        Tag::new(decl("b", 101, 2, 2, DataType::Int, None)),
        Tag::new(decl("c", 102, 0, 20, DataType::Str, None)),
    ]);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups.get(&101).map(Vec::len), Some(2));
    assert_eq!(groups.get(&102).map(Vec::len), Some(1));
}

#[test]
fn declaration_validation_catches_config_errors() {
    // bool without bit index
    assert!(decl("x", 1, 0, 1, DataType::Bool, None).validate().is_err());
    // bit index out of range
    assert!(decl("x", 1, 0, 1, DataType::Bool, Some(8)).validate().is_err());
    // bool with the wrong size
    assert!(decl("x", 1, 0, 2, DataType::Bool, Some(0)).validate().is_err());
    // int with the wrong width
    assert!(decl("x", 1, 0, 4, DataType::Int, None).validate().is_err());
    // oversized string
    assert!(decl("x", 1, 0, 255, DataType::Str, None).validate().is_err());
    // all fine
    assert!(decl("x", 1, 0, 2, DataType::Int, None).validate().is_ok());
    assert!(bool_decl("x", 1, 0, 7).validate().is_ok());
}
