use std::path::{Path, PathBuf};

use serde_json::Value;

/// Cap on action names in the log filename; the rest collapse to `+K`.
const MAX_ACTION_NAMES: usize = 3;

/// Compose the debug-log filename: `{NNN}-{alias}-{actions}.{status}.json`.
#[must_use]
pub fn file_name(sequence: u32, alias: &str, actions: &[&str], ok: bool) -> String {
    let shown = actions.iter().take(MAX_ACTION_NAMES).copied().collect::<Vec<_>>();
    let mut action_part = shown.join("+");
    if actions.len() > MAX_ACTION_NAMES {
        action_part.push_str(&format!("+{}", actions.len() - MAX_ACTION_NAMES));
    }
    if action_part.is_empty() {
        action_part.push_str("none");
    }
    let status = if ok { "ok" } else { "error" };
    format!("{sequence:03}-{alias}-{action_part}.{status}.json")
}

/// Next sequence number: one past the highest `NNN-` prefix already in the
/// log directory.
#[must_use]
pub fn next_sequence(dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 1;
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.split('-').next()?.parse::<u32>().ok()
        })
        .max()
        .map_or(1, |max| max + 1)
}

/// Write one debug-log record under `./log/`. Best-effort; failures only
/// warn on stderr so the response on stdout stays intact.
pub fn write_log(alias: &str, actions: &[&str], ok: bool, record: &Value) {
    let dir = PathBuf::from("log");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("warning: could not create log directory: {e}");
        return;
    }
    let name = file_name(next_sequence(&dir), alias, actions, ok);
    let pretty = serde_json::to_string_pretty(record).unwrap_or_else(|_| record.to_string());
    if let Err(e) = std::fs::write(dir.join(&name), pretty) {
        eprintln!("warning: could not write debug log {name}: {e}");
    }
}
