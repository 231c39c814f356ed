//! Structural violations and their classification.

use h2_engine::frame::{flags, frame_type, parse, Reason, Verdict};

use crate::{raw, MAX_FRAME_SIZE};

fn expect_connection_error(bytes: &[u8], reason: Reason) {
    match parse(bytes, MAX_FRAME_SIZE) {
        Verdict::ConnectionError { reason: got, .. } => assert_eq!(got, reason),
        other => panic!("expected a connection error, got {other:?}"),
    }
}

#[test]
fn oversized_frame_is_a_connection_error() {
    let bytes = raw(frame_type::DATA, 0, 1, &vec![0; 20_000]);
    expect_connection_error(&bytes, Reason::FRAME_SIZE_ERROR);
}

#[test]
fn data_on_stream_zero() {
    expect_connection_error(
        &raw(frame_type::DATA, 0, 0, b"x"),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn headers_on_stream_zero() {
    expect_connection_error(
        &raw(frame_type::HEADERS, flags::END_HEADERS, 0, &[0x82]),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn settings_on_a_stream() {
    expect_connection_error(&raw(frame_type::SETTINGS, 0, 1, &[]), Reason::PROTOCOL_ERROR);
}

#[test]
fn settings_with_partial_entry() {
    expect_connection_error(
        &raw(frame_type::SETTINGS, 0, 0, &[0, 4, 0]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn settings_ack_with_payload() {
    expect_connection_error(
        &raw(frame_type::SETTINGS, flags::ACK, 0, &[0, 4, 0, 0, 0, 1]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn ping_with_wrong_length() {
    expect_connection_error(
        &raw(frame_type::PING, 0, 0, &[1, 2, 3]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn ping_on_a_stream() {
    expect_connection_error(
        &raw(frame_type::PING, 0, 1, &[0; 8]),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn rst_stream_with_wrong_length() {
    expect_connection_error(
        &raw(frame_type::RST_STREAM, 0, 1, &[0, 0, 8]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn rst_stream_on_stream_zero() {
    expect_connection_error(
        &raw(frame_type::RST_STREAM, 0, 0, &8u32.to_be_bytes()),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn goaway_too_short() {
    expect_connection_error(
        &raw(frame_type::GOAWAY, 0, 0, &[0, 0, 0, 1]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn goaway_on_a_stream() {
    let mut payload = 0u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    expect_connection_error(
        &raw(frame_type::GOAWAY, 0, 1, &payload),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn window_update_with_wrong_length() {
    expect_connection_error(
        &raw(frame_type::WINDOW_UPDATE, 0, 1, &[0, 0, 1]),
        Reason::FRAME_SIZE_ERROR,
    );
}

#[test]
fn zero_increment_on_the_connection() {
    expect_connection_error(
        &raw(frame_type::WINDOW_UPDATE, 0, 0, &0u32.to_be_bytes()),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn zero_increment_on_a_stream_is_a_stream_error() {
    let bytes = raw(frame_type::WINDOW_UPDATE, 0, 5, &0u32.to_be_bytes());
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::StreamError {
            id,
            reason,
            consumed,
            ..
        } => {
            assert_eq!(id, 5);
            assert_eq!(reason, Reason::PROTOCOL_ERROR);
            assert_eq!(consumed, bytes.len());
        }
        other => panic!("expected a stream error, got {other:?}"),
    }
}

#[test]
fn priority_with_wrong_length_is_a_stream_error() {
    let bytes = raw(frame_type::PRIORITY, 0, 3, &[0, 0, 0, 1]);
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::StreamError { id, reason, .. } => {
            assert_eq!(id, 3);
            assert_eq!(reason, Reason::FRAME_SIZE_ERROR);
        }
        other => panic!("expected a stream error, got {other:?}"),
    }
}

#[test]
fn priority_on_stream_zero() {
    expect_connection_error(
        &raw(frame_type::PRIORITY, 0, 0, &[0, 0, 0, 0, 16]),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn padding_longer_than_the_payload() {
    let mut payload = vec![200u8];
    payload.extend_from_slice(b"tiny");
    expect_connection_error(
        &raw(frame_type::DATA, flags::PADDED, 1, &payload),
        Reason::PROTOCOL_ERROR,
    );
}

#[test]
fn push_promise_too_short() {
    expect_connection_error(
        &raw(frame_type::PUSH_PROMISE, flags::END_HEADERS, 1, &[0, 0]),
        Reason::FRAME_SIZE_ERROR,
    );
}
