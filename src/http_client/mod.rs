//! The request engine
//!
//! Wires the pieces together for one `execute` call: resolve the
//! fingerprint, assemble the request, dial (proxy-aware), tap the
//! connection, handshake, pick a transport (wire-controlled HTTP/2 when a
//! custom Akamai fingerprint is present, otherwise HTTP/2 with an HTTP/1.1
//! fallback), follow redirects, and assemble the final response record
//! with timings, TLS info and the annotated byte timeline.
//!
//! The public `execute` is synchronous; internally it runs on a
//! process-global tokio runtime.

pub mod hpack;
pub mod http1;
pub mod http2;
pub mod http2_custom;
pub mod io;
pub mod proxy;
pub mod response;
pub mod tls;

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::error::{EngineError, Result};
use crate::http_client::io::{merge_taps, Tap, TapStream};
use crate::http_client::proxy::ProxySpec;
use crate::http_client::response::{
    assemble_body, flatten_headers, header_value, RawResponse, RedirectHop, ResponseRecord,
};
use crate::http_client::tls::TlsInfo;
use crate::presets::{ResolvedFingerprint, TlsFingerprintSpec};
use crate::request::{assemble, AssembledRequest, HttpMethod, RequestSpec};
use crate::timing::TimingTracker;
use crate::tls_parser::{annotate_entries, ConnTrace};

static RUNTIME: Lazy<tokio::runtime::Runtime> =
    Lazy::new(|| tokio::runtime::Runtime::new().expect("failed to create tokio runtime"));

/// Engine-level defaults; per-request values take precedence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Certificate verification against the SNI name. On by default.
    pub verify_tls: bool,
    /// Deadline for the whole request when the spec carries none.
    pub timeout: Duration,
    /// Redirect cap used when the request says 0.
    pub max_redirects: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// The request engine. Cheap to create; holds no cross-request state.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

struct HopResult {
    raw: RawResponse,
    tls: Option<TlsInfo>,
    target_addr: String,
    remote_addr: String,
    local_addr: String,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Execute one request synchronously.
    pub fn execute(
        &self,
        request: &RequestSpec,
        fingerprint: &TlsFingerprintSpec,
    ) -> Result<ResponseRecord> {
        RUNTIME.block_on(self.execute_async(request, fingerprint))
    }

    /// The JSON boundary used by the front-end: two JSON inputs, one JSON
    /// output; failures come back as `{"error": "..."}`.
    pub fn execute_json(&self, request_json: &str, fingerprint_json: &str) -> String {
        let request: RequestSpec = match serde_json::from_str(request_json) {
            Ok(request) => request,
            Err(e) => return error_blob(&format!("invalid request: {}", e)),
        };
        let fingerprint: TlsFingerprintSpec = match serde_json::from_str(fingerprint_json) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return error_blob(&format!("invalid fingerprint: {}", e)),
        };
        match self.execute(&request, &fingerprint) {
            Ok(record) => serde_json::to_string(&record)
                .unwrap_or_else(|e| error_blob(&format!("serialize response: {}", e))),
            Err(e) => error_blob(&e.to_string()),
        }
    }

    /// Execute one request on the caller's runtime.
    pub async fn execute_async(
        &self,
        request: &RequestSpec,
        fingerprint: &TlsFingerprintSpec,
    ) -> Result<ResponseRecord> {
        let resolved = fingerprint.resolve()?;
        let mut current = assemble(request)?;

        if let Some(user_agent) = &resolved.default_user_agent {
            if !current
                .headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            {
                current
                    .headers
                    .push(("User-Agent".to_string(), user_agent.clone()));
            }
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.timeout);
        let deadline = Instant::now() + timeout;

        let max_redirects = if request.max_redirects == 0 {
            self.config.max_redirects
        } else {
            request.max_redirects
        };

        let mut timing = TimingTracker::new();
        let mut taps: Vec<Tap> = Vec::new();
        let mut redirects: Vec<RedirectHop> = Vec::new();

        let (raw, hop_tls, target_addr, remote_addr, local_addr) = loop {
            let hop = self
                .execute_once(&current, &resolved, &request.proxy, &mut timing, &mut taps, deadline)
                .await?;

            let is_redirect = (300..400).contains(&hop.raw.status);
            if !request.follow_redirects || !is_redirect {
                break (hop.raw, hop.tls, hop.target_addr, hop.remote_addr, hop.local_addr);
            }
            let location = header_value(&hop.raw.headers, "location")
                .unwrap_or("")
                .trim()
                .to_string();
            if location.is_empty() {
                break (hop.raw, hop.tls, hop.target_addr, hop.remote_addr, hop.local_addr);
            }
            if redirects.len() as u32 >= max_redirects {
                return Err(EngineError::Redirect("too many redirects".to_string()));
            }

            log::debug!(
                "redirect {} -> {} ({})",
                current.url,
                location,
                hop.raw.status
            );
            redirects.push(RedirectHop {
                url: current.url.to_string(),
                status: hop.raw.status,
                status_text: hop.raw.status_text.clone(),
                headers: flatten_headers(&hop.raw.headers),
            });

            let next = current.url.join(&location).map_err(|e| {
                EngineError::Redirect(format!("invalid Location {:?}: {}", location, e))
            })?;
            current = redirect_request(&current, next)?;
        };
        timing.mark_body_done();

        let content_encoding =
            header_value(&raw.headers, "content-encoding").unwrap_or("").to_string();
        let assembled_body = assemble_body(&raw.body, &content_encoding);

        let trace = if taps.is_empty() {
            None
        } else {
            Some(ConnTrace {
                events: annotate_entries(&merge_taps(&taps)),
                target_addr,
                remote_addr,
                local_addr,
            })
        };

        Ok(ResponseRecord {
            status: raw.status,
            status_text: raw.status_text,
            http_version: raw.http_version,
            headers: flatten_headers(&raw.headers),
            body: assembled_body.body,
            is_base64: assembled_body.is_base64,
            content_encoding: assembled_body.content_encoding,
            size: assembled_body.size,
            timing: timing.data(),
            tls: hop_tls,
            ja4: resolved.ja4.clone(),
            redirects,
            trace,
        })
    }

    /// One exchange on a fresh connection.
    async fn execute_once(
        &self,
        request: &AssembledRequest,
        resolved: &ResolvedFingerprint,
        proxy: &ProxySpec,
        timing: &mut TimingTracker,
        taps: &mut Vec<Tap>,
        deadline: Instant,
    ) -> Result<HopResult> {
        let target_addr = format!("{}:{}", request.host, request.port);

        if request.scheme == "http" {
            timing.mark_tcp_start();
            let mut stream = proxy::dial(
                &request.host,
                request.port,
                proxy,
                deadline.saturating_duration_since(Instant::now()),
            )
            .await?;
            timing.mark_tcp_done();
            let (remote_addr, local_addr) = peer_addrs(&stream);

            let raw = http1::round_trip(&mut stream, request, timing, deadline).await?;
            return Ok(HopResult {
                raw,
                tls: None,
                target_addr,
                remote_addr,
                local_addr,
            });
        }

        // HTTPS: try the negotiated protocol first, fall back to a fresh
        // HTTP/1.1 connection on transport failure.
        match self
            .https_once(request, resolved, proxy, timing, taps, deadline, false)
            .await
        {
            Ok(hop) => Ok(hop),
            Err(e) if fallback_worthy(&e) => {
                log::debug!("h2 attempt failed ({}), retrying over http/1.1", e);
                self.https_once(request, resolved, proxy, timing, taps, deadline, true)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn https_once(
        &self,
        request: &AssembledRequest,
        resolved: &ResolvedFingerprint,
        proxy: &ProxySpec,
        timing: &mut TimingTracker,
        taps: &mut Vec<Tap>,
        deadline: Instant,
        force_http1: bool,
    ) -> Result<HopResult> {
        let target_addr = format!("{}:{}", request.host, request.port);

        let alpn: Vec<Vec<u8>> = if force_http1 {
            vec![b"http/1.1".to_vec()]
        } else {
            let offered = resolved.hello.alpn_protocols();
            if offered.is_empty() {
                vec![b"h2".to_vec(), b"http/1.1".to_vec()]
            } else {
                offered.into_iter().map(|p| p.into_bytes()).collect()
            }
        };
        let config = Arc::new(tls::build_client_config(
            &resolved.hello,
            alpn,
            self.config.verify_tls,
        ));

        timing.mark_tcp_start();
        let tcp = proxy::dial(
            &request.host,
            request.port,
            proxy,
            deadline.saturating_duration_since(Instant::now()),
        )
        .await?;
        timing.mark_tcp_done();
        let (remote_addr, local_addr) = peer_addrs(&tcp);

        let tap = Tap::new();
        taps.push(tap.clone());
        let tapped = TapStream::new(tcp, tap);

        timing.mark_tls_start();
        let (mut stream, info) = tls::connect(
            tapped,
            &request.host,
            config,
            deadline.saturating_duration_since(Instant::now()),
        )
        .await?;
        timing.mark_tls_done();

        let negotiated_h2 = info.alpn == "h2";
        let raw = if force_http1 || !negotiated_h2 {
            http1::round_trip(&mut stream, request, timing, deadline).await?
        } else if let Some(akamai) = &resolved.akamai {
            http2_custom::round_trip(&mut stream, akamai, request, timing, deadline).await?
        } else {
            http2::round_trip(stream, None, request, timing, deadline).await?
        };

        Ok(HopResult {
            raw,
            tls: Some(info),
            target_addr,
            remote_addr,
            local_addr,
        })
    }
}

/// Transport-level failures that warrant the HTTP/1.1 retry. Dial, TLS and
/// configuration errors are not retried: the second attempt would fail the
/// same way.
fn fallback_worthy(error: &EngineError) -> bool {
    matches!(error, EngineError::Protocol(_) | EngineError::Io(_))
}

/// Build the follow-up request for a redirect: method downgraded to GET and
/// the body dropped, for every redirect status. Deliberate divergence from
/// RFC 7231 §6.4.7/§6.4.8 for 307/308; see DESIGN.md.
fn redirect_request(current: &AssembledRequest, next: url::Url) -> Result<AssembledRequest> {
    let scheme = next.scheme().to_string();
    if scheme != "http" && scheme != "https" {
        return Err(EngineError::Redirect(format!(
            "unsupported redirect scheme {:?}",
            scheme
        )));
    }
    let host = next
        .host_str()
        .ok_or_else(|| EngineError::Redirect("redirect target has no host".to_string()))?
        .to_string();
    let port = next
        .port_or_known_default()
        .ok_or_else(|| EngineError::Redirect("redirect target has no port".to_string()))?;

    let default_port = if scheme == "https" { 443 } else { 80 };
    let authority = if port == default_port {
        host.clone()
    } else {
        format!("{}:{}", host, port)
    };
    let path_and_query = match next.query() {
        Some(query) => format!("{}?{}", next.path(), query),
        None => next.path().to_string(),
    };

    // The body is gone, so its descriptors go too.
    let headers = current
        .headers
        .iter()
        .filter(|(name, _)| {
            !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length")
        })
        .cloned()
        .collect();

    Ok(AssembledRequest {
        method: HttpMethod::Get,
        scheme,
        host,
        port,
        authority,
        path_and_query,
        headers,
        body: Vec::new(),
        url: next,
    })
}

fn peer_addrs(stream: &tokio::net::TcpStream) -> (String, String) {
    let remote = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let local = stream
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    (remote, local)
}

fn error_blob(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
