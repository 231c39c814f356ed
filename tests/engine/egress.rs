//! Outbound request handling: authority computation, header hygiene,
//! bodies, cancellation, keepalive, options.

use std::sync::mpsc;
use std::time::Duration;

use h2_engine::frame::Frame;
use h2_engine::{
    Control, Engine, ErrorCause, Fin, Header, HpackDecoder, InitError, Keepalive, Message,
    Options, OptionsError, Reason, StreamRef,
};

use crate::{drain_wire, messages, rig, rig_with, submit_request, MockTransport, Rig, TestServer};

fn request_block(rig: &mut Rig) -> Vec<Header> {
    let frames = drain_wire(&mut rig.engine);
    for frame in frames {
        if let Frame::Headers { block, .. } = frame {
            let mut decoder = HpackDecoder::new();
            return decoder.decode(&block).unwrap();
        }
    }
    panic!("no HEADERS frame on the wire");
}

#[test]
fn host_header_becomes_the_authority() {
    let mut rig = rig();
    let (reply_to, _rx) = mpsc::channel();
    let ctrl = rig.engine.headers(
        StreamRef::new(),
        reply_to,
        "GET",
        "example.com",
        443,
        "/",
        vec![
            Header::new("Host", "override.example"),
            Header::new("accept", "*/*"),
        ],
        &mut rig.events,
    );
    assert_eq!(ctrl, Control::Continue);

    let headers = request_block(&mut rig);
    let authority = headers
        .iter()
        .find(|header| header.name == ":authority")
        .unwrap();
    assert_eq!(authority.value, "override.example");
    assert!(!headers.iter().any(|header| header.name == "host"));
    assert!(headers.iter().any(|header| header.name == "accept"));
}

#[test]
fn hop_by_hop_headers_never_reach_the_wire() {
    let mut rig = rig();
    let (reply_to, _rx) = mpsc::channel();
    let ctrl = rig.engine.headers(
        StreamRef::new(),
        reply_to,
        "GET",
        "example.com",
        443,
        "/",
        vec![
            Header::new("connection", "keep-alive"),
            Header::new("keep-alive", "timeout=5"),
            Header::new("proxy-connection", "keep-alive"),
            Header::new("transfer-encoding", "chunked"),
            Header::new("upgrade", "h2c"),
            Header::new("accept", "*/*"),
        ],
        &mut rig.events,
    );
    assert_eq!(ctrl, Control::Continue);

    let headers = request_block(&mut rig);
    let names: Vec<&str> = headers.iter().map(|header| header.name.as_str()).collect();
    assert_eq!(
        names,
        [":method", ":scheme", ":authority", ":path", "accept"]
    );
}

#[test]
fn non_default_port_appears_in_the_authority() {
    let mut rig = rig();
    let (reply_to, _rx) = mpsc::channel();
    let _ = rig.engine.headers(
        StreamRef::new(),
        reply_to,
        "GET",
        "example.com",
        8443,
        "/",
        vec![],
        &mut rig.events,
    );

    let headers = request_block(&mut rig);
    assert_eq!(headers[2].value, "example.com:8443");
}

#[test]
fn plain_tcp_maps_to_the_http_scheme() {
    let mut rig = rig_with(MockTransport::tcp(), Options::default());
    let (reply_to, _rx) = mpsc::channel();
    let _ = rig.engine.headers(
        StreamRef::new(),
        reply_to,
        "GET",
        "example.com",
        80,
        "/",
        vec![],
        &mut rig.events,
    );

    let headers = request_block(&mut rig);
    assert_eq!(headers[1].name, ":scheme");
    assert_eq!(headers[1].value, "http");
    assert_eq!(headers[2].value, "example.com");
}

#[test]
fn request_sends_content_length_and_body() {
    let mut rig = rig();
    let (reply_to, _rx) = mpsc::channel();
    let ctrl = rig.engine.request(
        StreamRef::new(),
        reply_to,
        "POST",
        "example.com",
        443,
        "/upload",
        vec![],
        b"hello".as_ref().into(),
        &mut rig.events,
    );
    assert_eq!(ctrl, Control::Continue);

    let frames = drain_wire(&mut rig.engine);
    let block = match &frames[1] {
        Frame::Headers {
            end_stream: false,
            block,
            ..
        } => block.clone(),
        other => panic!("expected the request HEADERS, got {other:?}"),
    };
    let mut decoder = HpackDecoder::new();
    let headers = decoder.decode(&block).unwrap();
    assert!(headers
        .iter()
        .any(|header| header.name == "content-length" && header.value == "5"));
    match &frames[2] {
        Frame::Data {
            end_stream: true,
            payload,
            ..
        } => assert_eq!(payload.as_ref(), b"hello"),
        other => panic!("expected the body DATA, got {other:?}"),
    }
    assert_eq!(
        rig.events.events.last().map(String::as_str),
        Some("request_end")
    );
}

#[test]
fn empty_body_request_elects_fin_on_headers() {
    let mut rig = rig();
    let (reply_to, _rx) = mpsc::channel();
    let _ = rig.engine.request(
        StreamRef::new(),
        reply_to,
        "GET",
        "example.com",
        443,
        "/",
        vec![],
        bytes::Bytes::new(),
        &mut rig.events,
    );

    let frames = drain_wire(&mut rig.engine);
    assert!(matches!(
        frames[1],
        Frame::Headers {
            end_stream: true,
            ..
        }
    ));
    assert_eq!(frames.len(), 2);
    assert_eq!(
        rig.events.events.last().map(String::as_str),
        Some("request_end")
    );
}

#[test]
fn data_on_an_unknown_ref_is_a_badstate_error() {
    let mut rig = rig();
    let (reply_to, rx) = mpsc::channel();
    let stream_ref = StreamRef::new();
    let ctrl = rig.engine.data(
        stream_ref,
        &reply_to,
        Fin::Fin,
        b"x".as_ref().into(),
        &mut rig.events,
    );
    assert_eq!(ctrl, Control::Continue);

    match messages(&rx).as_slice() {
        [Message::Error {
            stream_ref: got,
            cause: ErrorCause::BadState { message },
        }] => {
            assert_eq!(*got, stream_ref);
            assert_eq!(*message, "The stream cannot be found.");
        }
        other => panic!("expected a badstate error, got {other:?}"),
    }
}

#[test]
fn data_after_fin_is_a_badstate_error() {
    let mut rig = rig();
    let (reply_to, rx) = mpsc::channel();
    let stream_ref = StreamRef::new();
    let _ = rig.engine.request(
        stream_ref,
        reply_to.clone(),
        "POST",
        "example.com",
        443,
        "/",
        vec![],
        b"done".as_ref().into(),
        &mut rig.events,
    );

    let ctrl = rig.engine.data(
        stream_ref,
        &reply_to,
        Fin::Fin,
        b"more".as_ref().into(),
        &mut rig.events,
    );
    assert_eq!(ctrl, Control::Continue);

    match messages(&rx).as_slice() {
        [Message::Error {
            cause: ErrorCause::BadState { message },
            ..
        }] => assert_eq!(*message, "The stream has already been closed."),
        other => panic!("expected a badstate error, got {other:?}"),
    }
}

#[test]
fn cancel_resets_the_stream_and_is_idempotent() {
    let mut rig = rig();
    let (stream_ref, reply_to, rx) = submit_request(&mut rig);
    drain_wire(&mut rig.engine);

    assert_eq!(rig.engine.cancel(stream_ref, &reply_to), Control::Continue);
    assert_eq!(
        drain_wire(&mut rig.engine),
        vec![Frame::RstStream {
            id: 1,
            reason: Reason::CANCEL,
        }]
    );
    assert!(rig.engine.stream_info(stream_ref).is_none());
    assert!(messages(&rx).is_empty());

    // A second cancel only tells the caller the stream is unknown.
    assert_eq!(rig.engine.cancel(stream_ref, &reply_to), Control::Continue);
    match messages(&rx).as_slice() {
        [Message::Error {
            cause: ErrorCause::BadState { message },
            ..
        }] => assert_eq!(*message, "The stream cannot be found."),
        other => panic!("expected a badstate error, got {other:?}"),
    }

    // Frames for the cancelled stream no longer produce messages.
    let mut server = TestServer::new();
    let response = server.response(1, 200, &[], true);
    let _ = rig.engine.handle(&response, &mut rig.events);
    assert!(messages(&rx).is_empty());
}

#[test]
fn keepalive_sends_a_ping() {
    let mut rig = rig();
    drain_wire(&mut rig.engine);

    assert_eq!(rig.engine.keepalive(), Control::Continue);
    assert_eq!(
        drain_wire(&mut rig.engine),
        vec![Frame::Ping {
            ack: false,
            payload: [0; 8],
        }]
    );
}

#[test]
fn inbound_ping_is_acked_with_the_same_payload() {
    let mut rig = rig();
    drain_wire(&mut rig.engine);

    let ping = h2_engine::frame::build::ping([9; 8], false);
    assert_eq!(rig.engine.handle(&ping, &mut rig.events), Control::Continue);
    assert_eq!(
        drain_wire(&mut rig.engine),
        vec![Frame::Ping {
            ack: true,
            payload: [9; 8],
        }]
    );
}

#[test]
fn inbound_settings_are_acked() {
    let mut rig = rig();
    drain_wire(&mut rig.engine);

    let settings = h2_engine::frame::build::settings(&[(3, 100)]);
    assert_eq!(
        rig.engine.handle(&settings, &mut rig.events),
        Control::Continue
    );
    assert_eq!(
        drain_wire(&mut rig.engine),
        vec![Frame::Settings {
            ack: true,
            settings: vec![],
        }]
    );
}

#[test]
fn stream_info_reports_live_streams() {
    let mut rig = rig();
    let (stream_ref, _reply_to, _rx) = submit_request(&mut rig);

    let info = rig.engine.stream_info(stream_ref).unwrap();
    assert_eq!(info.stream_ref, stream_ref);
    assert!(info.running);
    assert!(rig.engine.stream_info(StreamRef::new()).is_none());
}

#[test]
fn keepalive_interval_comes_from_the_options() {
    let rig = rig();
    assert_eq!(rig.engine.keepalive_interval(), None);

    let opts = Options {
        keepalive: Keepalive::Interval(Duration::from_secs(30)),
        ..Options::default()
    };
    let rig = rig_with(MockTransport::tls(), opts);
    assert_eq!(
        rig.engine.keepalive_interval(),
        Some(Duration::from_secs(30))
    );
}

#[test]
fn zero_keepalive_interval_is_rejected() {
    let (owner, _owner_rx) = mpsc::channel();
    let opts = Options {
        keepalive: Keepalive::Interval(Duration::ZERO),
        ..Options::default()
    };
    let mut events = h2_engine::NoopEventHandler;
    let err = Engine::new(owner, MockTransport::tls(), opts, &mut events).unwrap_err();
    assert!(matches!(
        err,
        InitError::Options(OptionsError::Keepalive)
    ));
}

#[test]
fn chunked_ingress_is_equivalent_to_one_shot() {
    // Property: however the inbound byte stream is split, the observed
    // messages and events are identical.
    let mut server = TestServer::new();
    let mut inbound = server.response(1, 200, &[("content-type", "text/plain")], false);
    inbound.extend(TestServer::data(1, false, b"hel"));
    inbound.extend(TestServer::data(1, true, b"lo"));

    // Summarize without refs: each run mints fresh ones.
    fn summarize(msgs: &[Message]) -> Vec<String> {
        msgs.iter()
            .map(|msg| match msg {
                Message::Inform { status, .. } => format!("inform {status}"),
                Message::Response { fin, status, .. } => {
                    format!("response {status} fin={}", fin.is_fin())
                }
                Message::Data { fin, payload, .. } => {
                    format!("data {:?} fin={}", payload, fin.is_fin())
                }
                Message::Trailers { .. } => "trailers".to_string(),
                Message::Push { uri, .. } => format!("push {uri}"),
                Message::Error { cause, .. } => format!("error {cause}"),
                Message::Down { .. } => "down".to_string(),
            })
            .collect()
    }

    let run = |chunk_size: usize| {
        let mut rig = rig();
        let (_stream_ref, _reply_to, rx) = submit_request(&mut rig);
        drain_wire(&mut rig.engine);
        for chunk in inbound.chunks(chunk_size) {
            assert_eq!(rig.engine.handle(chunk, &mut rig.events), Control::Continue);
        }
        (summarize(&messages(&rx)), rig.events.events.clone())
    };

    let whole = run(inbound.len());
    for chunk_size in [1, 2, 3, 7, 10] {
        assert_eq!(run(chunk_size), whole);
    }
}
