use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

/// Append one JSONL usage record when `CDP_METRICS_FILE` is set.
/// Best-effort: metrics must never fail an invocation.
pub fn record(input_bytes: usize, output_bytes: usize, steps: usize, time_ms: u128) {
    let Ok(path) = std::env::var("CDP_METRICS_FILE") else {
        return;
    };
    if path.is_empty() {
        return;
    }
    let _ = append(Path::new(&path), input_bytes, output_bytes, steps, time_ms);
}

fn append(
    path: &Path,
    input_bytes: usize,
    output_bytes: usize,
    steps: usize,
    time_ms: u128,
) -> std::io::Result<()> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let line = json!({
        "ts": ts,
        "input_bytes": input_bytes,
        "output_bytes": output_bytes,
        "steps": steps,
        "time_ms": u64::try_from(time_ms).unwrap_or(u64::MAX),
    });
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        append(&path, 120, 4096, 3, 842).unwrap();
        append(&path, 80, 2048, 1, 120).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["input_bytes"], 120);
        assert_eq!(first["output_bytes"], 4096);
        assert_eq!(first["steps"], 3);
        assert_eq!(first["time_ms"], 842);
        assert!(first["ts"].as_u64().is_some());
    }
}
