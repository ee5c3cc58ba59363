//! Wire-level tests for the custom HTTP/2 transport, driven against a
//! scripted server over an in-memory pipe. Every assertion here is about
//! bytes: preface, SETTINGS order, window update, pseudo-header order,
//! DATA framing and control-frame handling.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use httpcall::akamai::AkamaiSpec;
use httpcall::http_client::hpack::{encode_block, ResponseDecoder};
use httpcall::http_client::http2_custom::{
    self, client_frames, flags, frame_types, put_frame, FrameHeader, HTTP2_PREFACE,
};
use httpcall::request::{assemble, HttpMethod, KvEntry, RequestSpec};
use httpcall::timing::TimingTracker;
use httpcall::EngineError;

const CHROME_AKAMAI: &str = "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p";

fn akamai(text: &str) -> AkamaiSpec {
    AkamaiSpec::parse(text).unwrap()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

async fn read_frame(io: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
    let mut head = [0u8; 9];
    io.read_exact(&mut head).await.unwrap();
    let header = FrameHeader::parse(&head);
    let mut payload = vec![0u8; header.length];
    io.read_exact(&mut payload).await.unwrap();
    (header, payload)
}

async fn write_frame(io: &mut DuplexStream, kind: u8, frame_flags: u8, stream: u32, payload: &[u8]) {
    let mut out = Vec::new();
    put_frame(&mut out, kind, frame_flags, stream, payload);
    io.write_all(&out).await.unwrap();
}

fn response_block(status: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let mut headers = vec![(":status".to_string(), status.to_string())];
    for (name, value) in extra {
        headers.push((name.to_string(), value.to_string()));
    }
    encode_block(&headers)
}

#[test]
fn test_client_frames_wire_layout() {
    let spec = akamai(CHROME_AKAMAI);
    let mut request_spec = RequestSpec::new(HttpMethod::Get, "https://example.com/path");
    request_spec
        .headers
        .push(KvEntry::new("X-Custom-Header", "test-value"));
    let request = assemble(&request_spec).unwrap();

    let bytes = client_frames(&spec, &request);
    assert!(bytes.starts_with(HTTP2_PREFACE));

    // SETTINGS: exactly the fingerprint's parameters, in order.
    let mut offset = HTTP2_PREFACE.len();
    let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
    let settings = FrameHeader::parse(&head);
    assert_eq!(settings.kind, frame_types::SETTINGS);
    assert_eq!(settings.stream_id, 0);
    assert_eq!(settings.flags, 0);
    assert_eq!(settings.length, 4 * 6);
    offset += 9;
    let expected = [(1u16, 65536u32), (2, 0), (4, 6291456), (6, 262144)];
    for (id, value) in expected {
        let got_id = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let got_value = u32::from_be_bytes([
            bytes[offset + 2],
            bytes[offset + 3],
            bytes[offset + 4],
            bytes[offset + 5],
        ]);
        assert_eq!((got_id, got_value), (id, value));
        offset += 6;
    }

    // WINDOW_UPDATE with the fingerprint increment.
    let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
    let window = FrameHeader::parse(&head);
    assert_eq!(window.kind, frame_types::WINDOW_UPDATE);
    assert_eq!(window.stream_id, 0);
    offset += 9;
    let increment = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
    assert_eq!(increment, 15663105);
    offset += 4;

    // HEADERS on stream 1, end of headers + stream (no body).
    let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
    let headers = FrameHeader::parse(&head);
    assert_eq!(headers.kind, frame_types::HEADERS);
    assert_eq!(headers.stream_id, 1);
    assert_eq!(headers.flags, flags::END_HEADERS | flags::END_STREAM);
    offset += 9;

    let mut decoder = ResponseDecoder::new();
    let fields = decoder.decode(&bytes[offset..offset + headers.length]).unwrap();
    let names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        &names[..4],
        &[":method", ":authority", ":scheme", ":path"]
    );
    assert!(names.contains(&"x-custom-header"));
    assert_eq!(fields[0].1, "GET");
    assert_eq!(fields[1].1, "example.com");
    assert_eq!(fields[2].1, "https");
    assert_eq!(fields[3].1, "/path");
}

#[test]
fn test_pseudo_header_order_follows_fingerprint() {
    let spec = akamai("1:65536|0|0|m,p,a,s");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/x")).unwrap();
    let list = http2_custom::h2_header_list(&spec, &request);
    let names: Vec<&str> = list.iter().take(4).map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec![":method", ":path", ":authority", ":scheme"]);
}

#[test]
fn test_zero_window_update_emits_no_frame() {
    let spec = akamai("1:65536;4:131072|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();
    let bytes = client_frames(&spec, &request);

    let mut offset = HTTP2_PREFACE.len();
    let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
    let settings = FrameHeader::parse(&head);
    offset += 9 + settings.length;

    let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
    let next = FrameHeader::parse(&head);
    assert_eq!(next.kind, frame_types::HEADERS);
}

#[test]
fn test_body_on_frame_boundary_gets_empty_end_stream() {
    let spec = akamai(CHROME_AKAMAI);
    let mut request_spec = RequestSpec::new(HttpMethod::Post, "https://example.com/upload");
    request_spec.body_type = httpcall::request::BodyType::Raw;
    request_spec.body = "x".repeat(16_384 * 2);
    let request = assemble(&request_spec).unwrap();

    let bytes = client_frames(&spec, &request);

    // Walk all frames and collect the DATA ones.
    let mut offset = HTTP2_PREFACE.len();
    let mut data_frames = Vec::new();
    while offset + 9 <= bytes.len() {
        let head: [u8; 9] = bytes[offset..offset + 9].try_into().unwrap();
        let frame = FrameHeader::parse(&head);
        if frame.kind == frame_types::DATA {
            data_frames.push(frame);
        }
        offset += 9 + frame.length;
    }

    assert_eq!(data_frames.len(), 3);
    assert_eq!(data_frames[0].length, 16_384);
    assert_eq!(data_frames[0].flags, 0);
    assert_eq!(data_frames[1].length, 16_384);
    assert_eq!(data_frames[1].flags, 0);
    assert_eq!(data_frames[2].length, 0);
    assert_eq!(data_frames[2].flags, flags::END_STREAM);
}

#[tokio::test]
async fn test_round_trip_with_scripted_server() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai(CHROME_AKAMAI);
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/data")).unwrap();

    let server_task = tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, HTTP2_PREFACE);

        let (settings, payload) = read_frame(&mut server).await;
        assert_eq!(settings.kind, frame_types::SETTINGS);
        let order: Vec<u16> = payload
            .chunks_exact(6)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        assert_eq!(order, vec![1, 2, 4, 6]);

        let (window, payload) = read_frame(&mut server).await;
        assert_eq!(window.kind, frame_types::WINDOW_UPDATE);
        assert_eq!(
            u32::from_be_bytes(payload.try_into().unwrap()),
            15663105
        );

        let (headers, _) = read_frame(&mut server).await;
        assert_eq!(headers.kind, frame_types::HEADERS);
        assert_eq!(headers.stream_id, 1);

        // Server preamble: SETTINGS, then the response.
        write_frame(&mut server, frame_types::SETTINGS, 0, 0, &[]).await;
        write_frame(
            &mut server,
            frame_types::HEADERS,
            flags::END_HEADERS,
            1,
            &response_block("200", &[("content-type", "text/plain"), ("server", "scripted")]),
        )
        .await;
        write_frame(&mut server, frame_types::DATA, 0, 1, b"hello ").await;
        write_frame(&mut server, frame_types::DATA, flags::END_STREAM, 1, b"world").await;

        // The client must ACK our SETTINGS and replenish windows for both
        // DATA frames.
        let mut acked = false;
        let mut window_updates = 0;
        while let Ok((frame, payload)) = tokio::time::timeout(
            Duration::from_secs(2),
            read_frame(&mut server),
        )
        .await
        .map_err(|_| ())
        {
            match frame.kind {
                frame_types::SETTINGS => {
                    assert_eq!(frame.flags & flags::ACK, flags::ACK);
                    acked = true;
                }
                frame_types::WINDOW_UPDATE => {
                    window_updates += 1;
                    assert!(!payload.is_empty());
                }
                _ => {}
            }
            if acked && window_updates >= 4 {
                break;
            }
        }
        assert!(acked);
        assert_eq!(window_updates, 4); // stream 0 + stream 1, twice
    });

    let mut timing = TimingTracker::new();
    let response = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.http_version, "HTTP/2.0");
    assert_eq!(response.body, b"hello world");
    assert!(response
        .headers
        .iter()
        .any(|(name, value)| name == "server" && value == "scripted"));
    assert!(timing.data().ttfb_ms < 5000);

    server_task.await.unwrap();
}

#[tokio::test]
async fn test_ping_is_echoed() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    let server_task = tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        let _settings = read_frame(&mut server).await;
        let _headers = read_frame(&mut server).await;

        write_frame(&mut server, frame_types::PING, 0, 0, b"12345678").await;

        // Expect the echo before we answer.
        let (pong, payload) = read_frame(&mut server).await;
        assert_eq!(pong.kind, frame_types::PING);
        assert_eq!(pong.flags & flags::ACK, flags::ACK);
        assert_eq!(payload, b"12345678");

        write_frame(
            &mut server,
            frame_types::HEADERS,
            flags::END_HEADERS | flags::END_STREAM,
            1,
            &response_block("204", &[]),
        )
        .await;
    });

    let mut timing = TimingTracker::new();
    let response = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap();
    assert_eq!(response.status, 204);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_graceful_goaway_keeps_reading() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    let server_task = tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        let _settings = read_frame(&mut server).await;
        let _headers = read_frame(&mut server).await;

        // NO_ERROR GOAWAY covering stream 1: the client must keep reading.
        let mut goaway = Vec::new();
        goaway.extend_from_slice(&1u32.to_be_bytes());
        goaway.extend_from_slice(&0u32.to_be_bytes());
        write_frame(&mut server, frame_types::GOAWAY, 0, 0, &goaway).await;

        write_frame(
            &mut server,
            frame_types::HEADERS,
            flags::END_HEADERS | flags::END_STREAM,
            1,
            &response_block("200", &[]),
        )
        .await;
    });

    let mut timing = TimingTracker::new();
    let response = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_goaway_with_error_fails() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        let _settings = read_frame(&mut server).await;
        let _headers = read_frame(&mut server).await;

        let mut goaway = Vec::new();
        goaway.extend_from_slice(&0u32.to_be_bytes());
        goaway.extend_from_slice(&11u32.to_be_bytes()); // ENHANCE_YOUR_CALM
        write_frame(&mut server, frame_types::GOAWAY, 0, 0, &goaway).await;
    });

    let mut timing = TimingTracker::new();
    let err = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Protocol(msg) if msg.contains("GOAWAY")));
}

#[tokio::test]
async fn test_rst_stream_before_headers_fails() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        let _settings = read_frame(&mut server).await;
        let _headers = read_frame(&mut server).await;
        write_frame(
            &mut server,
            frame_types::RST_STREAM,
            0,
            1,
            &8u32.to_be_bytes(), // CANCEL
        )
        .await;
    });

    let mut timing = TimingTracker::new();
    let err = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Protocol(msg) if msg.contains("RST_STREAM")));
}

#[tokio::test]
async fn test_eof_after_headers_returns_partial_body() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        let _settings = read_frame(&mut server).await;
        let _headers = read_frame(&mut server).await;

        write_frame(
            &mut server,
            frame_types::HEADERS,
            flags::END_HEADERS,
            1,
            &response_block("200", &[]),
        )
        .await;
        write_frame(&mut server, frame_types::DATA, 0, 1, b"partial").await;
        // Dropping the server closes the pipe mid-stream.
    });

    let mut timing = TimingTracker::new();
    let response = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"partial");
}

#[tokio::test]
async fn test_eof_before_headers_is_an_error() {
    let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
    let spec = akamai("1:65536|0|0|m,a,s,p");
    let request = assemble(&RequestSpec::new(HttpMethod::Get, "https://example.com/")).unwrap();

    tokio::spawn(async move {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        // Close without answering anything.
    });

    let mut timing = TimingTracker::new();
    let err = http2_custom::round_trip(&mut client, &spec, &request, &mut timing, deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}
