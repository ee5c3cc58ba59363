//! Standard HTTP/2 transport
//!
//! The h2 crate drives the connection here; it is the path taken when no
//! custom Akamai fingerprint was supplied (preset requests and the h2 leg
//! of the fallback). Settings values can still be applied through the
//! builder, but frame ordering is the library's own.

use std::time::Instant;

use bytes::Bytes;
use h2::client;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::akamai::{setting_ids, AkamaiSpec};
use crate::error::{EngineError, Result};
use crate::http_client::http2_custom::MAX_RESPONSE_BODY;
use crate::http_client::response::{status_text, RawResponse};
use crate::request::AssembledRequest;
use crate::timing::TimingTracker;

fn remaining(deadline: Instant, what: &str) -> Result<std::time::Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(EngineError::timeout(what));
    }
    Ok(left)
}

/// Execute one request over an established stream (typically TLS with ALPN
/// `h2`).
pub async fn round_trip<S>(
    io: S,
    akamai: Option<&AkamaiSpec>,
    request: &AssembledRequest,
    timing: &mut TimingTracker,
    deadline: Instant,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = client::Builder::new();
    if let Some(akamai) = akamai {
        for (id, value) in &akamai.settings {
            match *id {
                setting_ids::SETTINGS_HEADER_TABLE_SIZE => {
                    builder.header_table_size(*value);
                }
                setting_ids::SETTINGS_ENABLE_PUSH => {
                    builder.enable_push(*value != 0);
                }
                setting_ids::SETTINGS_INITIAL_WINDOW_SIZE => {
                    builder.initial_window_size(*value);
                }
                setting_ids::SETTINGS_MAX_FRAME_SIZE => {
                    // h2 rejects values outside the legal frame size range.
                    builder.max_frame_size((*value).clamp(16_384, 16_777_215));
                }
                setting_ids::SETTINGS_MAX_HEADER_LIST_SIZE => {
                    builder.max_header_list_size(*value);
                }
                _ => {}
            }
        }
    }

    let handshake = builder.handshake::<_, Bytes>(io);
    let (send_request, connection) =
        tokio::time::timeout(remaining(deadline, "h2 handshake")?, handshake)
            .await
            .map_err(|_| EngineError::timeout("h2 handshake"))?
            .map_err(map_h2)?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("h2 connection task ended: {}", e);
        }
    });

    let mut send_request = send_request.ready().await.map_err(map_h2)?;

    let mut req = http::Request::builder()
        .method(request.method.as_str())
        .uri(request.url.as_str());
    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "host" | "connection" | "proxy-connection" | "keep-alive" | "transfer-encoding" | "upgrade"
        ) {
            continue;
        }
        req = req.header(lower.as_str(), value.as_str());
    }
    let req = req
        .body(())
        .map_err(|e| EngineError::Protocol(format!("h2 request build: {}", e)))?;

    let end_of_stream = request.body.is_empty();
    let (response, mut send_stream) = send_request
        .send_request(req, end_of_stream)
        .map_err(map_h2)?;
    if !end_of_stream {
        send_stream
            .send_data(Bytes::from(request.body.clone()), true)
            .map_err(map_h2)?;
    }

    let response = tokio::time::timeout(remaining(deadline, "h2 response")?, response)
        .await
        .map_err(|_| EngineError::timeout("h2 response"))?
        .map_err(map_h2)?;
    timing.mark_first_byte();

    let status = response.status().as_u16();
    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, value) in response.headers() {
        headers.push((
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).to_string(),
        ));
    }

    let mut body_stream = response.into_body();
    let mut body: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::time::timeout(remaining(deadline, "h2 body")?, body_stream.data())
            .await
            .map_err(|_| EngineError::timeout("h2 body"))?;
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(map_h2)?;
        if body.len() + chunk.len() > MAX_RESPONSE_BODY {
            return Err(EngineError::Protocol(format!(
                "response body exceeds {} bytes",
                MAX_RESPONSE_BODY
            )));
        }
        let _ = body_stream.flow_control().release_capacity(chunk.len());
        body.extend_from_slice(&chunk);
    }
    if let Ok(Some(trailers)) = body_stream.trailers().await {
        for (name, value) in trailers.iter() {
            headers.push((
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            ));
        }
    }

    Ok(RawResponse {
        status,
        status_text: status_text(status).to_string(),
        http_version: "HTTP/2.0".to_string(),
        headers,
        body,
    })
}

fn map_h2(e: h2::Error) -> EngineError {
    if e.is_io() {
        match e.into_io() {
            Some(io) => EngineError::Io(io),
            None => EngineError::Protocol("h2 io error".to_string()),
        }
    } else {
        EngineError::Protocol(format!("h2: {}", e))
    }
}
