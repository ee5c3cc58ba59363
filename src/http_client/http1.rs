//! HTTP/1.1 transport
//!
//! Manual request emission and response parsing over any stream, plaintext
//! or TLS. Headers go out in the caller's order, the head is parsed with
//! httparse, and the body is framed by Content-Length, chunked encoding or
//! connection close, always under the 100 MiB cap.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, Result};
use crate::http_client::http2_custom::MAX_RESPONSE_BODY;
use crate::http_client::response::{header_value, RawResponse};
use crate::request::{AssembledRequest, HttpMethod};
use crate::timing::TimingTracker;

const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Serialize the request head and body.
pub fn request_bytes(request: &AssembledRequest) -> Vec<u8> {
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n",
        request.method.as_str(),
        request.path_and_query,
        request.authority
    );

    let mut has_connection = false;
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            has_connection = true;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    let needs_length = !request.body.is_empty()
        || matches!(
            request.method,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
        );
    if needs_length
        && !request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    {
        head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }

    // No pooling: one request per connection.
    if !has_connection {
        head.push_str("Connection: close\r\n");
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(&request.body);
    bytes
}

/// Execute one request over `io`.
pub async fn round_trip<S>(
    io: &mut S,
    request: &AssembledRequest,
    timing: &mut TimingTracker,
    deadline: Instant,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let out = request_bytes(request);
    log::debug!(
        "h1: {} {} ({} header bytes + {} body bytes)",
        request.method.as_str(),
        request.path_and_query,
        out.len() - request.body.len(),
        request.body.len()
    );
    write_all_deadline(io, &out, deadline).await?;
    io.flush().await?;

    // Read the head.
    let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);
    let mut first_byte_marked = false;
    let head_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(EngineError::Protocol(
                "http/1.1 response head too large".to_string(),
            ));
        }
        let read = read_some_deadline(io, &mut buf, deadline).await?;
        if read == 0 {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before response head",
            )));
        }
        if !first_byte_marked {
            first_byte_marked = true;
            timing.mark_first_byte();
        }
    };

    let (status, status_text, headers) = parse_head(&buf[..head_end])?;
    let leftover = buf[head_end..].to_vec();

    let body = if !expects_body(request.method, status) {
        Vec::new()
    } else if let Some(length) = header_value(&headers, "content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if length > MAX_RESPONSE_BODY {
            return Err(EngineError::Protocol(format!(
                "content-length {} exceeds {} bytes",
                length, MAX_RESPONSE_BODY
            )));
        }
        read_exact_body(io, leftover, length, deadline).await?
    } else if header_value(&headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
    {
        read_chunked_body(io, leftover, deadline).await?
    } else {
        read_to_eof(io, leftover, deadline).await?
    };

    Ok(RawResponse {
        status,
        status_text,
        http_version: "HTTP/1.1".to_string(),
        headers,
        body,
    })
}

fn parse_head(head: &[u8]) -> Result<(u16, String, Vec<(String, String)>)> {
    let mut header_storage = [httparse::EMPTY_HEADER; 100];
    let mut response = httparse::Response::new(&mut header_storage);
    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(EngineError::Protocol(
                "incomplete http/1.1 response head".to_string(),
            ));
        }
        Err(e) => {
            return Err(EngineError::Protocol(format!(
                "invalid http/1.1 response head: {}",
                e
            )));
        }
    }

    let status = response
        .code
        .ok_or_else(|| EngineError::Protocol("response head without status".to_string()))?;
    let status_text = response.reason.unwrap_or("").to_string();
    let headers = response
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    Ok((status, status_text, headers))
}

fn expects_body(method: HttpMethod, status: u16) -> bool {
    if method == HttpMethod::Head {
        return false;
    }
    !(status < 200 || status == 204 || status == 304)
}

async fn read_exact_body<S>(
    io: &mut S,
    mut buf: Vec<u8>,
    length: usize,
    deadline: Instant,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < length {
        let read = read_some_deadline(io, &mut buf, deadline).await?;
        if read == 0 {
            // Short body on close: return what arrived.
            break;
        }
    }
    buf.truncate(length.min(buf.len()));
    Ok(buf)
}

async fn read_chunked_body<S>(io: &mut S, mut buf: Vec<u8>, deadline: Instant) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        // Chunk size line.
        let line_end = loop {
            if let Some(pos) = find_subsequence(&buf, b"\r\n") {
                break pos;
            }
            if read_some_deadline(io, &mut buf, deadline).await? == 0 {
                return Ok(body);
            }
        };

        let size_text = String::from_utf8_lossy(&buf[..line_end]).to_string();
        let size_text = size_text.split(';').next().unwrap_or("").trim().to_string();
        let size = usize::from_str_radix(&size_text, 16).map_err(|_| {
            EngineError::Protocol(format!("invalid chunk size {:?}", size_text))
        })?;
        buf.drain(..line_end + 2);

        if size == 0 {
            // Consume the trailer terminator when present.
            while find_subsequence(&buf, b"\r\n").is_none() {
                if read_some_deadline(io, &mut buf, deadline).await? == 0 {
                    break;
                }
            }
            return Ok(body);
        }

        if body.len() + size > MAX_RESPONSE_BODY {
            return Err(EngineError::Protocol(format!(
                "chunked body exceeds {} bytes",
                MAX_RESPONSE_BODY
            )));
        }

        while buf.len() < size + 2 {
            if read_some_deadline(io, &mut buf, deadline).await? == 0 {
                // Truncated chunk on close.
                body.extend_from_slice(&buf);
                return Ok(body);
            }
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
}

async fn read_to_eof<S>(io: &mut S, mut buf: Vec<u8>, deadline: Instant) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    loop {
        if buf.len() > MAX_RESPONSE_BODY {
            return Err(EngineError::Protocol(format!(
                "response body exceeds {} bytes",
                MAX_RESPONSE_BODY
            )));
        }
        if read_some_deadline(io, &mut buf, deadline).await? == 0 {
            return Ok(buf);
        }
    }
}

async fn read_some_deadline<S>(io: &mut S, buf: &mut Vec<u8>, deadline: Instant) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(EngineError::timeout("http/1.1 read"));
    }
    let mut chunk = [0u8; 8192];
    let read = tokio::time::timeout(remaining, io.read(&mut chunk))
        .await
        .map_err(|_| EngineError::timeout("http/1.1 read"))??;
    buf.extend_from_slice(&chunk[..read]);
    Ok(read)
}

async fn write_all_deadline<S>(io: &mut S, bytes: &[u8], deadline: Instant) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(EngineError::timeout("http/1.1 write"));
    }
    tokio::time::timeout(remaining, io.write_all(bytes))
        .await
        .map_err(|_| EngineError::timeout("http/1.1 write"))??;
    Ok(())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{assemble, KvEntry, RequestSpec};

    fn assembled(url: &str) -> AssembledRequest {
        assemble(&RequestSpec::new(HttpMethod::Get, url)).unwrap()
    }

    #[test]
    fn test_request_bytes_shape() {
        let mut spec = RequestSpec::new(HttpMethod::Get, "http://example.com/path?a=1");
        spec.headers.push(KvEntry::new("X-First", "1"));
        spec.headers.push(KvEntry::new("X-Second", "2"));
        let request = assemble(&spec).unwrap();

        let text = String::from_utf8(request_bytes(&request)).unwrap();
        assert!(text.starts_with("GET /path?a=1 HTTP/1.1\r\nHost: example.com\r\n"));
        let first = text.find("X-First").unwrap();
        let second = text.find("X-Second").unwrap();
        assert!(first < second);
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_post_gets_content_length() {
        let mut spec = RequestSpec::new(HttpMethod::Post, "http://example.com/");
        spec.body_type = crate::request::BodyType::Raw;
        spec.body = "hello".to_string();
        let request = assemble(&spec).unwrap();

        let text = String::from_utf8(request_bytes(&request)).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_head_expects_no_body() {
        assert!(!expects_body(HttpMethod::Head, 200));
        assert!(!expects_body(HttpMethod::Get, 204));
        assert!(!expects_body(HttpMethod::Get, 304));
        assert!(expects_body(HttpMethod::Get, 200));
        let _ = assembled("http://example.com/");
    }

    #[tokio::test]
    async fn test_round_trip_content_length() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = assembled("http://example.com/data");
        let mut timing = TimingTracker::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let n = server.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /data HTTP/1.1"));
            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-One: a\r\n\r\nhello")
                .await
                .unwrap();
        });

        let response = round_trip(&mut client, &request, &mut timing, deadline)
            .await
            .unwrap();
        server_task.await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.body, b"hello");
        assert_eq!(response.headers[1], ("X-One".to_string(), "a".to_string()));
        assert!(timing.data().ttfb_ms < 5000);
    }

    #[tokio::test]
    async fn test_round_trip_chunked() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = assembled("http://example.com/chunked");
        let mut timing = TimingTracker::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let response = round_trip(&mut client, &request, &mut timing, deadline)
            .await
            .unwrap();
        assert_eq!(response.body, b"hello world");
    }

    #[tokio::test]
    async fn test_round_trip_eof_body() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = assembled("http://example.com/stream");
        let mut timing = TimingTracker::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 200 OK\r\n\r\nuntil-close")
                .await
                .unwrap();
            // Dropping the stream closes it.
        });

        let response = round_trip(&mut client, &request, &mut timing, deadline)
            .await
            .unwrap();
        assert_eq!(response.body, b"until-close");
    }
}
