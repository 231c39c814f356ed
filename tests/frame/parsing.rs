//! Tests for the parser half (bytes -> verdicts).

use h2_engine::frame::{flags, frame_type, parse, Frame, Reason, Verdict};

use crate::{raw, MAX_FRAME_SIZE};

#[test]
fn parse_data_frame() {
    let bytes = raw(frame_type::DATA, flags::END_STREAM, 1, b"hello");
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame { frame, consumed } => {
            assert_eq!(consumed, bytes.len());
            assert_eq!(
                frame,
                Frame::Data {
                    id: 1,
                    end_stream: true,
                    payload: b"hello".as_ref().into(),
                }
            );
        }
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[test]
fn parse_empty_data_frame() {
    let bytes = raw(frame_type::DATA, flags::END_STREAM, 1, b"");
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Data { payload, end_stream, .. },
            ..
        } => {
            assert!(payload.is_empty());
            assert!(end_stream);
        }
        other => panic!("expected a DATA frame, got {other:?}"),
    }
}

#[test]
fn fragmented_frame_needs_more() {
    let bytes = raw(frame_type::DATA, 0, 1, b"hello");
    assert_eq!(parse(&bytes[..5], MAX_FRAME_SIZE), Verdict::More);
    assert_eq!(parse(&bytes[..9], MAX_FRAME_SIZE), Verdict::More);
    assert_eq!(parse(&bytes[..13], MAX_FRAME_SIZE), Verdict::More);
    assert!(matches!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Frame { .. }
    ));
}

#[test]
fn consumed_counts_let_the_caller_walk_the_buffer() {
    let mut bytes = raw(frame_type::HEADERS, flags::END_HEADERS, 1, &[0x82, 0x86]);
    bytes.extend(raw(frame_type::DATA, flags::END_STREAM, 1, b"world"));

    let first = match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame { frame, consumed } => {
            assert!(matches!(frame, Frame::Headers { id: 1, .. }));
            consumed
        }
        other => panic!("expected a frame, got {other:?}"),
    };
    match parse(&bytes[first..], MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Data { payload, .. },
            consumed,
        } => {
            assert_eq!(payload.as_ref(), b"world");
            assert_eq!(first + consumed, bytes.len());
        }
        other => panic!("expected a DATA frame, got {other:?}"),
    }
}

#[test]
fn parse_padded_data_frame() {
    // END_STREAM | PADDED, pad length 4.
    let mut payload = vec![4u8];
    payload.extend_from_slice(b"hello");
    payload.extend_from_slice(&[0, 0, 0, 0]);
    let bytes = raw(frame_type::DATA, flags::END_STREAM | flags::PADDED, 1, &payload);
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Data { payload, .. },
            ..
        } => assert_eq!(payload.as_ref(), b"hello"),
        other => panic!("expected a DATA frame, got {other:?}"),
    }
}

#[test]
fn parse_headers_with_priority_fields() {
    let mut payload = vec![0, 0, 0, 3, 255];
    payload.extend_from_slice(&[0x82, 0x86]);
    let bytes = raw(
        frame_type::HEADERS,
        flags::END_HEADERS | flags::PRIORITY,
        1,
        &payload,
    );
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Headers { block, .. },
            ..
        } => assert_eq!(block.as_ref(), &[0x82, 0x86]),
        other => panic!("expected a HEADERS frame, got {other:?}"),
    }
}

#[test]
fn parse_settings_entries() {
    let payload = [0, 4, 0, 1, 0, 0, 0, 5, 0, 0, 64, 0];
    let bytes = raw(frame_type::SETTINGS, 0, 0, &payload);
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Settings { ack, settings },
            ..
        } => {
            assert!(!ack);
            assert_eq!(settings, vec![(4, 65_536), (5, 16_384)]);
        }
        other => panic!("expected a SETTINGS frame, got {other:?}"),
    }
}

#[test]
fn parse_ping_and_ack() {
    let bytes = raw(frame_type::PING, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::Ping { ack, payload },
            ..
        } => {
            assert!(!ack);
            assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8]);
        }
        other => panic!("expected a PING frame, got {other:?}"),
    }

    let bytes = raw(frame_type::PING, flags::ACK, 0, &[0; 8]);
    assert!(matches!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Frame {
            frame: Frame::Ping { ack: true, .. },
            ..
        }
    ));
}

#[test]
fn parse_rst_stream() {
    let bytes = raw(frame_type::RST_STREAM, 0, 7, &8u32.to_be_bytes());
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::RstStream { id, reason },
            ..
        } => {
            assert_eq!(id, 7);
            assert_eq!(reason, Reason::CANCEL);
        }
        other => panic!("expected an RST_STREAM frame, got {other:?}"),
    }
}

#[test]
fn parse_goaway_with_debug_data() {
    let mut payload = 5u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(b"bye");
    let bytes = raw(frame_type::GOAWAY, 0, 0, &payload);
    match parse(&bytes, MAX_FRAME_SIZE) {
        Verdict::Frame {
            frame: Frame::GoAway {
                last_stream_id,
                reason,
                debug,
            },
            ..
        } => {
            assert_eq!(last_stream_id, 5);
            assert_eq!(reason, Reason::NO_ERROR);
            assert_eq!(debug.as_ref(), b"bye");
        }
        other => panic!("expected a GOAWAY frame, got {other:?}"),
    }
}

#[test]
fn parse_window_update() {
    let bytes = raw(frame_type::WINDOW_UPDATE, 0, 3, &1000u32.to_be_bytes());
    assert!(matches!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Frame {
            frame: Frame::WindowUpdate {
                id: 3,
                increment: 1000,
            },
            ..
        }
    ));
}

#[test]
fn unknown_frame_type_is_ignored() {
    let bytes = raw(0x42, 0, 1, b"whatever");
    assert_eq!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Ignore {
            consumed: bytes.len()
        }
    );
}

#[test]
fn priority_frame_is_ignored() {
    let bytes = raw(frame_type::PRIORITY, 0, 1, &[0, 0, 0, 0, 16]);
    assert_eq!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Ignore {
            consumed: bytes.len()
        }
    );
}

#[test]
fn reserved_stream_id_bit_is_cleared() {
    let bytes = raw(frame_type::DATA, 0, 0x8000_0001, b"x");
    assert!(matches!(
        parse(&bytes, MAX_FRAME_SIZE),
        Verdict::Frame {
            frame: Frame::Data { id: 1, .. },
            ..
        }
    ));
}
