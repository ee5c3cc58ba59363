//! Proxy-aware dialing
//!
//! Produces a raw TCP stream to the target, either directly or through an
//! HTTP CONNECT or SOCKS5 (RFC 1928, with RFC 1929 user/pass auth) proxy.
//! Proxying is strictly per-request: the process environment is never
//! consulted.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{EngineError, Result};

/// Per-request proxy selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProxySpec {
    #[default]
    None,
    Http {
        host: String,
        port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Socks5 {
        host: String,
        port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

/// Dial `host:port` under `timeout`, honouring the proxy spec.
pub async fn dial(
    host: &str,
    port: u16,
    proxy: &ProxySpec,
    timeout: Duration,
) -> Result<TcpStream> {
    tokio::time::timeout(timeout, dial_inner(host, port, proxy))
        .await
        .map_err(|_| EngineError::timeout("dial"))?
}

async fn dial_inner(host: &str, port: u16, proxy: &ProxySpec) -> Result<TcpStream> {
    match proxy {
        ProxySpec::None => {
            let addr = format!("{}:{}", host, port);
            log::debug!("dialing {} directly", addr);
            TcpStream::connect(&addr)
                .await
                .map_err(|e| EngineError::Dial(format!("connect {}: {}", addr, e)))
        }
        ProxySpec::Http {
            host: proxy_host,
            port: proxy_port,
            username,
            password,
        } => {
            connect_http_proxy(
                proxy_host,
                *proxy_port,
                host,
                port,
                username.as_deref(),
                password.as_deref(),
            )
            .await
        }
        ProxySpec::Socks5 {
            host: proxy_host,
            port: proxy_port,
            username,
            password,
        } => {
            connect_socks5_proxy(
                proxy_host,
                *proxy_port,
                host,
                port,
                username.as_deref(),
                password.as_deref(),
            )
            .await
        }
    }
}

async fn connect_http_proxy(
    proxy_host: &str,
    proxy_port: u16,
    target_host: &str,
    target_port: u16,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<TcpStream> {
    let proxy_addr = format!("{}:{}", proxy_host, proxy_port);
    log::debug!("dialing {} via http proxy {}", target_host, proxy_addr);
    let mut stream = TcpStream::connect(&proxy_addr)
        .await
        .map_err(|e| EngineError::Dial(format!("connect proxy {}: {}", proxy_addr, e)))?;

    let mut request = format!(
        "CONNECT {0}:{1} HTTP/1.1\r\nHost: {0}:{1}\r\n",
        target_host, target_port
    );
    if let Some(username) = username {
        let credentials = BASE64.encode(format!("{}:{}", username, password.unwrap_or("")));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", credentials));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;

    // Read the response head one byte at a time so no tunnel bytes are
    // consumed past the blank line.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 16 * 1024 {
            return Err(EngineError::Dial(
                "proxy CONNECT response head too large".to_string(),
            ));
        }
        let read = stream.read(&mut byte).await?;
        if read == 0 {
            return Err(EngineError::Dial(
                "proxy closed connection during CONNECT".to_string(),
            ));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("");
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if status != "200" {
        return Err(EngineError::Dial(format!(
            "proxy refused CONNECT: {}",
            status_line
        )));
    }

    Ok(stream)
}

async fn connect_socks5_proxy(
    proxy_host: &str,
    proxy_port: u16,
    target_host: &str,
    target_port: u16,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<TcpStream> {
    let proxy_addr = format!("{}:{}", proxy_host, proxy_port);
    log::debug!("dialing {} via socks5 proxy {}", target_host, proxy_addr);
    let mut stream = TcpStream::connect(&proxy_addr)
        .await
        .map_err(|e| EngineError::Dial(format!("connect proxy {}: {}", proxy_addr, e)))?;

    // Greeting: no-auth, plus user/pass when credentials are present.
    let greeting: &[u8] = if username.is_some() {
        &[0x05, 0x02, 0x00, 0x02]
    } else {
        &[0x05, 0x01, 0x00]
    };
    stream.write_all(greeting).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 {
        return Err(EngineError::Dial("socks5: bad version in reply".to_string()));
    }

    match reply[1] {
        0x00 => {}
        0x02 => {
            let (Some(username), Some(password)) = (username, password.or(Some(""))) else {
                return Err(EngineError::Dial(
                    "socks5: proxy requires auth but no credentials given".to_string(),
                ));
            };
            let mut auth = vec![0x01];
            auth.push(username.len() as u8);
            auth.extend_from_slice(username.as_bytes());
            auth.push(password.len() as u8);
            auth.extend_from_slice(password.as_bytes());
            stream.write_all(&auth).await?;

            let mut auth_reply = [0u8; 2];
            stream.read_exact(&mut auth_reply).await?;
            if auth_reply[1] != 0x00 {
                return Err(EngineError::Dial("socks5: authentication failed".to_string()));
            }
        }
        other => {
            return Err(EngineError::Dial(format!(
                "socks5: unsupported auth method {}",
                other
            )));
        }
    }

    // CONNECT to the target by domain name.
    let mut connect = vec![0x05, 0x01, 0x00, 0x03];
    connect.push(target_host.len() as u8);
    connect.extend_from_slice(target_host.as_bytes());
    connect.extend_from_slice(&target_port.to_be_bytes());
    stream.write_all(&connect).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(EngineError::Dial(format!(
            "socks5: connect failed, reply code {}",
            head[1]
        )));
    }

    // Drain the bound address so no payload bytes are consumed.
    match head[3] {
        0x01 => {
            let mut rest = [0u8; 6];
            stream.read_exact(&mut rest).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x04 => {
            let mut rest = [0u8; 18];
            stream.read_exact(&mut rest).await?;
        }
        other => {
            return Err(EngineError::Dial(format!(
                "socks5: unsupported address type {}",
                other
            )));
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_proxy_spec_json() {
        let json = r#"{"type":"socks5","host":"127.0.0.1","port":1080,"username":"u","password":"p"}"#;
        let spec: ProxySpec = serde_json::from_str(json).unwrap();
        assert!(matches!(spec, ProxySpec::Socks5 { port: 1080, .. }));

        let spec: ProxySpec = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert!(matches!(spec, ProxySpec::None));
    }

    #[tokio::test]
    async fn test_direct_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dial(
            "127.0.0.1",
            addr.port(),
            &ProxySpec::None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_http_connect_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nPAYLOAD")
                .await
                .unwrap();
            request
        });

        let mut stream = dial(
            "target.example",
            443,
            &ProxySpec::Http {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                username: Some("user".to_string()),
                password: Some("pass".to_string()),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT target.example:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: target.example:443"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz"));

        // The tunnel must deliver exactly the bytes after the blank line.
        let mut payload = [0u8; 7];
        stream.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"PAYLOAD");
    }

    #[tokio::test]
    async fn test_http_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });

        let err = dial(
            "target.example",
            443,
            &ProxySpec::Http {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                username: None,
                password: None,
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Dial(msg) if msg.contains("407")));
    }

    #[tokio::test]
    async fn test_socks5_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // greeting
            let mut greeting = [0u8; 3];
            socket.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            socket.write_all(&[0x05, 0x00]).await.unwrap();
            // connect request: domain type
            let mut head = [0u8; 5];
            socket.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut name = vec![0u8; head[4] as usize + 2];
            socket.read_exact(&mut name).await.unwrap();
            // success reply, IPv4 bound address
            socket
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            socket.write_all(b"OK").await.unwrap();
        });

        let mut stream = dial(
            "example.com",
            80,
            &ProxySpec::Socks5 {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                username: None,
                password: None,
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"OK");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_socks5_rejects_bad_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            let _ = socket.read_exact(&mut greeting).await;
            let _ = socket.write_all(&[0x05, 0x00]).await;
            let mut buf = vec![0u8; 64];
            let _ = socket.read(&mut buf).await;
            // host unreachable
            let _ = socket
                .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await;
        });

        let err = dial(
            "example.com",
            80,
            &ProxySpec::Socks5 {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                username: None,
                password: None,
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Dial(msg) if msg.contains("reply code 4")));
    }
}
