use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::error::SkillError;
use crate::steps::{Step, parse_steps};

/// Default per-step ceiling.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Absolute ceiling a step timeout may be raised to.
pub const MAX_STEP_TIMEOUT_MS: u64 = 300_000;

/// How long to wait for piped stdin before concluding there is none.
const STDIN_GRACE: Duration = Duration::from_millis(100);

/// One parsed invocation.
#[derive(Debug)]
pub struct Request {
    /// Tab alias or targetId; optional for registry-free programs.
    pub tab: Option<String>,
    /// Per-step timeout ceiling in milliseconds.
    pub timeout_ms: u64,
    pub steps: Vec<Step>,
    /// Raw input size for metrics.
    pub input_bytes: usize,
}

/// Read the command payload: the first non-flag argument wins, otherwise
/// stdin. Only the wait for the first byte is bounded by the grace period,
/// so interactive TTYs never hang but large piped payloads still read to
/// EOF.
///
/// # Errors
///
/// `PARSE` when no payload is available at all or stdin is not UTF-8.
pub async fn read_payload(args: &[String]) -> Result<String, SkillError> {
    if let Some(json_arg) = args.iter().find(|a| !a.starts_with("--")) {
        return Ok(json_arg.clone());
    }

    let mut stdin = tokio::io::stdin();
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let first = tokio::time::timeout(STDIN_GRACE, stdin.read(&mut chunk)).await;
    match first {
        Ok(Ok(n)) if n > 0 => buffer.extend_from_slice(&chunk[..n]),
        Ok(Ok(_)) | Err(_) => {
            return Err(SkillError::parse(
                "no command supplied; pass a JSON argument or pipe JSON on stdin",
            ));
        }
        Ok(Err(e)) => {
            return Err(SkillError::parse(format!("could not read stdin: {e}")));
        }
    }

    stdin
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| SkillError::parse(format!("could not read stdin: {e}")))?;

    String::from_utf8(buffer).map_err(|_| SkillError::parse("stdin payload is not valid UTF-8"))
}

/// Parse and validate the request envelope.
///
/// # Errors
///
/// `PARSE` for malformed JSON, `VALIDATION` for schema problems (including
/// the removed top-level `config` key).
pub fn parse_request(raw: &str) -> Result<Request, SkillError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| SkillError::parse(format!("invalid JSON command: {e}")))?;
    let map = value
        .as_object()
        .ok_or_else(|| SkillError::validation("command must be a JSON object"))?;

    if map.contains_key("config") {
        return Err(SkillError::validation(
            "top-level \"config\" is no longer supported; pass host/port/headless inside the \
             first openTab step instead",
        ));
    }

    for key in map.keys() {
        if !["tab", "timeout", "steps"].contains(&key.as_str()) {
            return Err(SkillError::validation(format!(
                "unknown top-level key {key:?}; expected tab, timeout, steps"
            )));
        }
    }

    let tab = match map.get("tab") {
        None => None,
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(other) => {
            return Err(SkillError::validation(format!(
                "tab must be a non-empty string, got {other}"
            )));
        }
    };

    let timeout_ms = match map.get("timeout") {
        None => DEFAULT_STEP_TIMEOUT_MS,
        Some(v) => v
            .as_u64()
            .filter(|&t| t > 0)
            .ok_or_else(|| {
                SkillError::validation(format!("timeout must be a positive integer, got {v}"))
            })?
            .min(MAX_STEP_TIMEOUT_MS),
    };

    let raw_steps = map
        .get("steps")
        .ok_or_else(|| SkillError::validation("steps is required"))?
        .as_array()
        .ok_or_else(|| SkillError::validation("steps must be an array"))?;
    let steps = parse_steps(raw_steps)?;

    Ok(Request {
        tab,
        timeout_ms,
        steps,
        input_bytes: raw.len(),
    })
}
