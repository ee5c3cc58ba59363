//! Request model and assembly
//!
//! `RequestSpec` is the JSON shape the front-end hands over per request.
//! Assembly turns it into concrete wire inputs: a parsed URL with merged
//! query entries, an ordered header list (insertion order is semantically
//! significant and survives to the wire), the encoded body, cookies and
//! auth applied, and content-type inference when the caller set none.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineError, Result};
use crate::http_client::proxy::ProxySpec;

fn default_true() -> bool {
    true
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }
}

/// One key/value row from the front-end editors. Disabled rows are carried
/// but never emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl KvEntry {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            enabled: true,
        }
    }
}

/// Body encoding selector. Multipart is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    None,
    Raw,
    Json,
    Urlencoded,
    Multipart,
}

/// Where an API key goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Request authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSpec {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Apikey {
        key: String,
        value: String,
        location: ApiKeyLocation,
    },
}

/// The per-request input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub query: Vec<KvEntry>,
    #[serde(default)]
    pub headers: Vec<KvEntry>,
    #[serde(default)]
    pub cookies: Vec<KvEntry>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub form: Vec<KvEntry>,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default)]
    pub proxy: ProxySpec,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// 0 means the engine default of 10.
    #[serde(default)]
    pub max_redirects: u32,
    /// Per-request deadline; engine default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body_type: BodyType::None,
            body: String::new(),
            form: Vec::new(),
            auth: AuthSpec::None,
            proxy: ProxySpec::None,
            follow_redirects: true,
            max_redirects: 0,
            timeout_ms: None,
        }
    }
}

/// A request reduced to wire inputs.
#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// `host` or `host:port` for non-default ports.
    pub authority: String,
    /// Request-URI, `/` minimum.
    pub path_and_query: String,
    /// Final ordered header list, original casing.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Apply the assembly rules of the engine to a request spec.
pub fn assemble(spec: &RequestSpec) -> Result<AssembledRequest> {
    let mut url = Url::parse(spec.url.trim())
        .map_err(|e| EngineError::Config(format!("invalid url {:?}: {}", spec.url, e)))?;

    let scheme = url.scheme().to_string();
    if scheme != "http" && scheme != "https" {
        return Err(EngineError::Config(format!(
            "unsupported scheme {:?}",
            scheme
        )));
    }

    // Merge enabled query entries, preserving duplicates and order.
    {
        let mut pairs = url.query_pairs_mut();
        for entry in spec.query.iter().filter(|e| e.enabled) {
            pairs.append_pair(&entry.key, &entry.value);
        }
        if let AuthSpec::Apikey {
            key,
            value,
            location: ApiKeyLocation::Query,
        } = &spec.auth
        {
            pairs.append_pair(key, value);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    // Ordered headers: later entries replace earlier ones within a key but
    // keep the first occurrence's position.
    let mut headers: Vec<(String, String)> = Vec::new();
    for entry in spec.headers.iter().filter(|e| e.enabled) {
        set_header(&mut headers, &entry.key, &entry.value);
    }

    // One Cookie header from the enabled cookie rows.
    let cookie_line = spec
        .cookies
        .iter()
        .filter(|e| e.enabled)
        .map(|e| format!("{}={}", e.key, e.value))
        .collect::<Vec<_>>()
        .join("; ");
    if !cookie_line.is_empty() {
        set_header(&mut headers, "Cookie", &cookie_line);
    }

    match &spec.auth {
        AuthSpec::None => {}
        AuthSpec::Bearer { token } => {
            set_header(&mut headers, "Authorization", &format!("Bearer {}", token));
        }
        AuthSpec::Basic { username, password } => {
            let credentials = BASE64.encode(format!("{}:{}", username, password));
            set_header(
                &mut headers,
                "Authorization",
                &format!("Basic {}", credentials),
            );
        }
        AuthSpec::Apikey {
            key,
            value,
            location: ApiKeyLocation::Header,
        } => {
            set_header(&mut headers, key, value);
        }
        AuthSpec::Apikey {
            location: ApiKeyLocation::Query,
            ..
        } => {} // already merged into the URL
    }

    // Body per type.
    let body: Vec<u8> = match spec.body_type {
        BodyType::None => Vec::new(),
        BodyType::Raw | BodyType::Json => spec.body.clone().into_bytes(),
        BodyType::Urlencoded => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for entry in spec.form.iter().filter(|e| e.enabled) {
                serializer.append_pair(&entry.key, &entry.value);
            }
            serializer.finish().into_bytes()
        }
        BodyType::Multipart => {
            return Err(EngineError::Config(
                "multipart bodies are reserved and not implemented".to_string(),
            ));
        }
    };

    // Content-Type inference when the caller set none.
    if !has_header(&headers, "content-type") {
        match spec.body_type {
            BodyType::Json => set_header(&mut headers, "Content-Type", "application/json"),
            BodyType::Urlencoded => set_header(
                &mut headers,
                "Content-Type",
                "application/x-www-form-urlencoded",
            ),
            _ => {}
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| EngineError::Config("url has no host".to_string()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| EngineError::Config("url has no port".to_string()))?;

    let default_port = if scheme == "https" { 443 } else { 80 };
    let authority = if port == default_port {
        host.clone()
    } else {
        format!("{}:{}", host, port)
    };

    let path_and_query = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    Ok(AssembledRequest {
        method: spec.method,
        scheme,
        host,
        port,
        authority,
        path_and_query,
        headers,
        body,
        url,
    })
}

fn set_header(headers: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(existing) = headers
        .iter_mut()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
    {
        existing.1 = value.to_string();
    } else {
        headers.push((key.to_string(), value.to_string()));
    }
}

fn has_header(headers: &[(String, String)], key: &str) -> bool {
    headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_merge_preserves_duplicates() {
        let mut spec = RequestSpec::new(HttpMethod::Get, "https://example.com/api?x=1");
        spec.query.push(KvEntry::new("x", "2"));
        spec.query.push(KvEntry::new("y", "3"));
        spec.query.push(KvEntry {
            enabled: false,
            ..KvEntry::new("z", "nope")
        });

        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.path_and_query, "/api?x=1&x=2&y=3");
    }

    #[test]
    fn test_header_order_and_replacement() {
        let mut spec = RequestSpec::new(HttpMethod::Get, "https://example.com/");
        spec.headers.push(KvEntry::new("X-First", "1"));
        spec.headers.push(KvEntry::new("X-Second", "2"));
        spec.headers.push(KvEntry::new("x-first", "override"));

        let assembled = assemble(&spec).unwrap();
        assert_eq!(
            assembled.headers,
            vec![
                ("X-First".to_string(), "override".to_string()),
                ("X-Second".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_cookie_line() {
        let mut spec = RequestSpec::new(HttpMethod::Get, "https://example.com/");
        spec.cookies.push(KvEntry::new("a", "1"));
        spec.cookies.push(KvEntry::new("b", "2"));
        spec.cookies.push(KvEntry {
            enabled: false,
            ..KvEntry::new("c", "3")
        });

        let assembled = assemble(&spec).unwrap();
        assert_eq!(
            assembled.headers,
            vec![("Cookie".to_string(), "a=1; b=2".to_string())]
        );
    }

    #[test]
    fn test_auth_variants() {
        let mut spec = RequestSpec::new(HttpMethod::Get, "https://example.com/");
        spec.auth = AuthSpec::Bearer {
            token: "tok".to_string(),
        };
        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.headers[0].1, "Bearer tok");

        spec.auth = AuthSpec::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.headers[0].1, "Basic dXNlcjpwYXNz");

        spec.auth = AuthSpec::Apikey {
            key: "X-Api-Key".to_string(),
            value: "secret".to_string(),
            location: ApiKeyLocation::Header,
        };
        let assembled = assemble(&spec).unwrap();
        assert_eq!(
            assembled.headers[0],
            ("X-Api-Key".to_string(), "secret".to_string())
        );

        spec.auth = AuthSpec::Apikey {
            key: "api_key".to_string(),
            value: "secret".to_string(),
            location: ApiKeyLocation::Query,
        };
        let assembled = assemble(&spec).unwrap();
        assert!(assembled.path_and_query.contains("api_key=secret"));
        assert!(assembled.headers.is_empty());
    }

    #[test]
    fn test_urlencoded_body_and_content_type() {
        let mut spec = RequestSpec::new(HttpMethod::Post, "https://example.com/post");
        spec.body_type = BodyType::Urlencoded;
        spec.form.push(KvEntry::new("a", "1"));
        spec.form.push(KvEntry::new("b", "2"));

        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.body, b"a=1&b=2");
        assert!(assembled
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/x-www-form-urlencoded"));
    }

    #[test]
    fn test_json_content_type_not_overridden() {
        let mut spec = RequestSpec::new(HttpMethod::Post, "https://example.com/");
        spec.body_type = BodyType::Json;
        spec.body = "{}".to_string();
        spec.headers
            .push(KvEntry::new("Content-Type", "application/vnd.custom+json"));

        let assembled = assemble(&spec).unwrap();
        let content_types: Vec<_> = assembled
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(content_types[0].1, "application/vnd.custom+json");
    }

    #[test]
    fn test_authority_and_path_defaults() {
        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com");
        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.authority, "example.com");
        assert_eq!(assembled.path_and_query, "/");

        let spec = RequestSpec::new(HttpMethod::Get, "http://example.com:8080/x");
        let assembled = assemble(&spec).unwrap();
        assert_eq!(assembled.authority, "example.com:8080");
        assert_eq!(assembled.port, 8080);
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(assemble(&RequestSpec::new(HttpMethod::Get, "notaurl")).is_err());
        assert!(assemble(&RequestSpec::new(HttpMethod::Get, "ftp://example.com/")).is_err());
    }

    #[test]
    fn test_multipart_reserved() {
        let mut spec = RequestSpec::new(HttpMethod::Post, "https://example.com/");
        spec.body_type = BodyType::Multipart;
        assert!(matches!(
            assemble(&spec),
            Err(EngineError::Config(_))
        ));
    }
}
