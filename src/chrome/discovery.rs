use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::Deserialize;

use super::ChromeError;

/// Browser metadata from `/json/version`.
#[derive(Debug, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// One debuggable target from `/json/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: Option<String>,
}

/// GET `/json/version`: returns the browser-level WebSocket URL.
///
/// # Errors
///
/// Returns `ChromeError::Http` when the endpoint is unreachable or
/// `ChromeError::Parse` when the payload is malformed.
pub async fn query_version(host: &str, port: u16) -> Result<BrowserVersion, ChromeError> {
    let body = http_request(host, port, "GET", "/json/version").await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::Parse(e.to_string()))
}

/// GET `/json/list`: enumerate debuggable targets.
///
/// # Errors
///
/// Same failure modes as [`query_version`].
pub async fn query_targets(host: &str, port: u16) -> Result<Vec<TargetInfo>, ChromeError> {
    let body = http_request(host, port, "GET", "/json/list").await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::Parse(e.to_string()))
}

/// PUT `/json/new?url=…`: create a tab, optionally pre-navigated.
///
/// Newer Chrome requires PUT for this endpoint; older builds accept both.
///
/// # Errors
///
/// Same failure modes as [`query_version`].
pub async fn open_target(
    host: &str,
    port: u16,
    url: Option<&str>,
) -> Result<TargetInfo, ChromeError> {
    let path = match url {
        Some(u) => format!("/json/new?{}", urlencoding::encode(u)),
        None => "/json/new".to_owned(),
    };
    let body = http_request(host, port, "PUT", &path).await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::Parse(e.to_string()))
}

/// GET `/json/close/{targetId}`: close one tab.
///
/// # Errors
///
/// Returns `ChromeError::Http` when the endpoint is unreachable or reports
/// a non-200 status (unknown target ids answer 404).
pub async fn close_target(host: &str, port: u16, target_id: &str) -> Result<(), ChromeError> {
    let path = format!("/json/close/{target_id}");
    http_request(host, port, "GET", &path).await.map(|_| ())
}

/// Split a raw reply into status code and body. The framing is trivial
/// because the exchange is HTTP/1.0: one request, one reply, connection
/// closed by the server, body bounded by EOF.
fn split_reply(raw: &[u8]) -> Result<(u16, String), ChromeError> {
    let text = String::from_utf8_lossy(raw);
    let Some((head, body)) = text.split_once("\r\n\r\n") else {
        return Err(ChromeError::Http("reply has no header/body boundary".into()));
    };
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ChromeError::Http("reply has no HTTP status line".into()))?;
    Ok((status, body.to_owned()))
}

/// One HTTP/1.0 exchange against the loopback debug endpoint, blocking in
/// `spawn_blocking`. Speaking 1.0 sidesteps chunked encoding and keep-alive
/// entirely — the server closes the connection when it has answered.
async fn http_request(
    host: &str,
    port: u16,
    method: &str,
    path: &str,
) -> Result<String, ChromeError> {
    let addr = format!("{host}:{port}");
    let request = format!("{method} {path} HTTP/1.0\r\nHost: {addr}\r\n\r\n");
    let label = format!("{method} {path}");

    tokio::task::spawn_blocking(move || {
        let parsed = addr
            .parse()
            .map_err(|e| ChromeError::Http(format!("invalid address {addr}: {e}")))?;
        let mut stream = TcpStream::connect_timeout(&parsed, Duration::from_secs(2))
            .map_err(|e| ChromeError::Http(format!("connection failed to {addr}: {e}")))?;
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

        stream
            .write_all(request.as_bytes())
            .map_err(|e| ChromeError::Http(format!("write failed: {e}")))?;

        let mut raw = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => raw.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) && !raw.is_empty() =>
                {
                    // Some builds linger before closing; whatever arrived
                    // is the complete reply.
                    break;
                }
                Err(e) => return Err(ChromeError::Http(format!("read failed: {e}"))),
            }
        }

        let (status, body) = split_reply(&raw)?;
        if status != 200 {
            return Err(ChromeError::Http(format!(
                "{label} answered HTTP {status}"
            )));
        }
        Ok(body)
    })
    .await
    .map_err(|e| ChromeError::Http(format!("task join failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_version_payload() {
        let json = r#"{
            "Browser": "Chrome/126.0.6478.55",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/uid"
        }"#;
        let v: BrowserVersion = serde_json::from_str(json).unwrap();
        assert_eq!(v.protocol_version, "1.3");
        assert!(v.ws_debugger_url.starts_with("ws://"));
    }

    #[test]
    fn parse_target_list_payload() {
        let json = r#"[{
            "id": "T1",
            "type": "page",
            "title": "Example Domain",
            "url": "https://example.com/",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/T1"
        }, {
            "id": "SW",
            "type": "service_worker",
            "title": "worker",
            "url": "https://example.com/sw.js"
        }]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].target_type, "page");
        assert!(targets[1].ws_debugger_url.is_none());
    }

    #[test]
    fn split_reply_extracts_status_and_body() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}";
        let (status, body) = split_reply(raw).unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "{\"ok\":true}");
    }

    #[test]
    fn split_reply_reports_non_200_statuses() {
        let raw = b"HTTP/1.0 404 Not Found\r\n\r\nno such target";
        let (status, body) = split_reply(raw).unwrap();
        assert_eq!(status, 404);
        assert_eq!(body, "no such target");
    }

    #[test]
    fn split_reply_allows_empty_body() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\n";
        let (status, body) = split_reply(raw).unwrap();
        assert_eq!(status, 200);
        assert!(body.is_empty());
    }

    #[test]
    fn split_reply_without_boundary_is_an_error() {
        assert!(split_reply(b"HTTP/1.0 200 OK\r\nstill in headers").is_err());
    }

    #[test]
    fn split_reply_without_status_line_is_an_error() {
        assert!(split_reply(b"garbage\r\n\r\nbody").is_err());
        assert!(split_reply(b"\r\n\r\nbody").is_err());
    }

    #[test]
    fn split_reply_tolerates_non_utf8_bytes() {
        let mut raw = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        let (status, _) = split_reply(&raw).unwrap();
        assert_eq!(status, 200);
    }
}
