// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use s7_gateway::error::GatewayError;

use super::{connected_session, mock_plc::MockPlc, session_for};

#[tokio::test]
async fn connect_read_write_round_trip() {
    let mock = MockPlc::start().await;
    mock.set_db(5, (0..16).collect());

    let session = connected_session(&mock, "sync").await;
    assert!(session.is_connected());

    let data = session.read_range(5, 0, 8).await.expect("read");
    assert_eq!(&data[..], &[0, 1, 2, 3, 4, 5, 6, 7]);

    session.write_range(5, 4, &[9, 9]).await.expect("write");
    assert_eq!(&mock.db(5)[4..6], &[9, 9]);
    // Bytes outside the written range are untouched.
    assert_eq!(mock.db(5)[3], 3);
    assert_eq!(mock.db(5)[6], 6);
}

#[tokio::test]
async fn negate_bit_flips_only_the_target_bit() {
    let mock = MockPlc::start().await;
    mock.set_db(5, vec![0b0000_0010]);

    let session = connected_session(&mock, "sync").await;
    session.negate_bit(5, 0, 0).await.expect("negate");
    assert_eq!(mock.db(5)[0], 0b0000_0011);

    session.negate_bit(5, 0, 0).await.expect("negate back");
    assert_eq!(mock.db(5)[0], 0b0000_0010);
}

#[tokio::test]
async fn unknown_data_block_is_a_protocol_error() {
    let mock = MockPlc::start().await;
    let session = connected_session(&mock, "sync").await;

    let err = session.read_range(77, 0, 4).await.expect_err("must fail");
    assert!(matches!(err, GatewayError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn operations_fail_not_connected_without_a_link() {
    let mock = MockPlc::start().await;
    let session = session_for(&mock, "sync");

    assert!(!session.is_connected());
    assert!(!session.wait_until_ready(Duration::from_millis(100)).await);

    let err = session.read_range(5, 0, 1).await.expect_err("must fail");
    assert!(matches!(err, GatewayError::NotConnected), "got {err:?}");
}

#[tokio::test]
async fn reconnect_recovers_after_the_peer_drops() {
    let mock = MockPlc::start().await;
    mock.set_db(5, vec![1, 2, 3, 4]);
    let session = connected_session(&mock, "sync").await;

    mock.set_online(false);
    assert!(session.read_range(5, 0, 4).await.is_err());
    assert!(session.reconnect().await.is_err(), "peer still down");

    mock.set_online(true);
    session.reconnect().await.expect("reconnect");
    assert!(session.is_connected());
    let data = session.read_range(5, 0, 4).await.expect("read after recovery");
    assert_eq!(&data[..], &[1, 2, 3, 4]);
}

#[tokio::test]
async fn disconnect_clears_the_cached_state() {
    let mock = MockPlc::start().await;
    let session = connected_session(&mock, "sync").await;
    assert!(session.is_connected());

    session.disconnect().await;
    assert!(!session.is_connected());
}

#[tokio::test]
async fn probe_reads_one_byte() {
    let mock = MockPlc::start().await;
    mock.set_db(1, vec![0, 0]);
    let session = connected_session(&mock, "sync").await;
    mock.clear_jobs();

    session.probe(1, 1).await.expect("probe");
    assert_eq!(mock.read_jobs(), vec![(1, 1, 1)]);
}
