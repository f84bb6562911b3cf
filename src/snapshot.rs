use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::SkillError;
use crate::page::PageController;
use crate::steps::{Detail, FindParams, MatchMode, SnapshotParams};

/// The browser-side engine: semantic tree walk, ref assignment, YAML
/// rendering, content hashing, and search. State persists on the page's
/// window between invocations; the host holds no mirror.
pub const ARIA_JS: &str = include_str!("js/aria.js");

/// Snapshots larger than this stay on disk; the response carries the path.
pub const INLINE_LIMIT_BYTES: usize = 9_000;

/// Ref-map size that forces a spill regardless of YAML size.
pub const REF_SPILL_LIMIT: u64 = 1_000;

/// Upper bound on rendered lines per snapshot.
const MAX_LINES: usize = 5_000;

/// Outcome of one snapshot capture.
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    /// `since` matched: content unchanged, no YAML produced.
    pub unchanged: bool,
    pub snapshot_id: String,
    pub yaml: String,
    pub ref_count: u64,
    pub truncated: bool,
}

/// How a capture is being used; internal captures never advance the
/// agent-facing generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Agent-issued `snapshot` step: advances the generation.
    Agent,
    /// Pre/post-command and search captures: generation untouched.
    Internal,
}

fn detail_str(detail: Detail) -> &'static str {
    match detail {
        Detail::Summary => "summary",
        Detail::Interactive => "interactive",
        Detail::Full => "full",
    }
}

fn match_mode_str(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Substring => "substring",
        MatchMode::Word => "word",
        MatchMode::Exact => "exact",
    }
}

/// Build the snapshot invocation expression for the embedded engine.
fn snapshot_expression(params: &SnapshotParams, kind: CaptureKind, viewport_only: bool) -> String {
    let advance = kind == CaptureKind::Agent && !params.preserve_refs;
    let mut opts = json!({
        "mode": if params.since.is_some() { "since" } else { "snapshot" },
        "detail": detail_str(params.detail),
        "advanceGen": advance,
        "viewportOnly": viewport_only,
        "pierceShadow": params.pierce_shadow,
        "includeFrames": params.include_frames,
        "maxLines": MAX_LINES,
    });
    if let Some(root) = &params.root {
        opts["root"] = json!(root);
    }
    if let Some(since) = &params.since {
        opts["since"] = json!(since);
    }
    format!("{ARIA_JS}({opts})")
}

/// Take a snapshot in the current frame.
///
/// # Errors
///
/// Surfaces engine-reported problems (bad root selector, bad pattern) as
/// `ElementNotFoundError`/`StepValidationError` and CDP failures as-is.
pub async fn capture(
    page: &PageController,
    params: &SnapshotParams,
    kind: CaptureKind,
    viewport_only: bool,
) -> Result<SnapshotOutcome, SkillError> {
    let expression = snapshot_expression(params, kind, viewport_only);
    let value = page.eval(&expression).await?;
    parse_outcome(&value)
}

fn parse_outcome(value: &Value) -> Result<SnapshotOutcome, SkillError> {
    if let Some(error) = value["error"].as_str() {
        if error.starts_with("invalid selector") || error.starts_with("root not found") {
            return Err(SkillError::element_not_found(error));
        }
        return Err(SkillError::step_validation(error));
    }
    if value["unchanged"].as_bool() == Some(true) {
        return Ok(SnapshotOutcome {
            unchanged: true,
            snapshot_id: value["snapshotId"].as_str().unwrap_or_default().to_owned(),
            yaml: String::new(),
            ref_count: 0,
            truncated: false,
        });
    }
    Ok(SnapshotOutcome {
        unchanged: false,
        snapshot_id: value["snapshotId"].as_str().unwrap_or_default().to_owned(),
        yaml: value["yaml"].as_str().unwrap_or_default().to_owned(),
        ref_count: value["refCount"].as_u64().unwrap_or(0),
        truncated: value["truncated"].as_bool().unwrap_or(false),
    })
}

/// Whether a snapshot must be spilled to a file instead of inlined.
#[must_use]
pub fn needs_spill(yaml: &str, ref_count: u64, inline_limit: usize) -> bool {
    yaml.len() > inline_limit || ref_count > REF_SPILL_LIMIT
}

/// Artifact directory: `{temp}/cdp-skill/`.
#[must_use]
pub fn artifact_dir() -> PathBuf {
    std::env::temp_dir().join("cdp-skill")
}

/// Spill a snapshot to `{dir}/{stem}.yaml`.
///
/// # Errors
///
/// Returns an execution error when the artifact directory is unwritable.
pub fn spill(dir: &Path, stem: &str, yaml: &str) -> Result<PathBuf, SkillError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SkillError::navigation(format!("cannot create artifact dir: {e}")))?;
    let path = dir.join(format!("{stem}.yaml"));
    std::fs::write(&path, yaml)
        .map_err(|e| SkillError::navigation(format!("cannot write snapshot file: {e}")))?;
    Ok(path)
}

/// Run a snapshot search in the current frame.
///
/// # Errors
///
/// Bad regex patterns surface as `StepValidationError`; CDP failures as-is.
pub async fn search(page: &PageController, params: &FindParams) -> Result<Value, SkillError> {
    let mut opts = json!({
        "mode": "search",
        "matchMode": match_mode_str(params.match_mode),
        "limit": params.limit,
    });
    if let Some(text) = &params.text {
        opts["text"] = json!(text);
    }
    if let Some(pattern) = &params.pattern {
        opts["pattern"] = json!(pattern);
    }
    if let Some(role) = &params.role {
        opts["role"] = json!(role);
    }
    if let Some((x, y, radius)) = params.near {
        opts["near"] = json!({ "x": x, "y": y, "radius": radius });
    }
    let value = page.eval(&format!("{ARIA_JS}({opts})")).await?;
    if let Some(error) = value["error"].as_str() {
        return Err(SkillError::step_validation(error.to_owned()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expression_embeds_the_engine_and_options() {
        let params = SnapshotParams {
            root: Some("#app".into()),
            ..SnapshotParams::default()
        };
        let expr = snapshot_expression(&params, CaptureKind::Agent, false);
        assert!(expr.starts_with("(function"));
        assert!(expr.contains("\"root\":\"#app\""));
        assert!(expr.contains("\"advanceGen\":true"));
        assert!(expr.contains("\"mode\":\"snapshot\""));
    }

    #[test]
    fn internal_captures_never_advance_generation() {
        let params = SnapshotParams::default();
        let expr = snapshot_expression(&params, CaptureKind::Internal, true);
        assert!(expr.contains("\"advanceGen\":false"));
        assert!(expr.contains("\"viewportOnly\":true"));
    }

    #[test]
    fn preserve_refs_suppresses_generation_advance() {
        let params = SnapshotParams {
            preserve_refs: true,
            ..SnapshotParams::default()
        };
        let expr = snapshot_expression(&params, CaptureKind::Agent, false);
        assert!(expr.contains("\"advanceGen\":false"));
    }

    #[test]
    fn since_switches_mode() {
        let params = SnapshotParams {
            since: Some("s2".into()),
            ..SnapshotParams::default()
        };
        let expr = snapshot_expression(&params, CaptureKind::Agent, false);
        assert!(expr.contains("\"mode\":\"since\""));
        assert!(expr.contains("\"since\":\"s2\""));
    }

    #[test]
    fn outcome_parses_unchanged_contract() {
        let value = json!({ "unchanged": true, "snapshotId": "s1" });
        let outcome = parse_outcome(&value).unwrap();
        assert!(outcome.unchanged);
        assert_eq!(outcome.snapshot_id, "s1");
        assert!(outcome.yaml.is_empty());
    }

    #[test]
    fn outcome_parses_fresh_snapshot() {
        let value = json!({
            "yaml": "- heading \"Example Domain\" [level=1]",
            "snapshotId": "s2",
            "refCount": 12,
            "truncated": false,
            "hash": "abc123"
        });
        let outcome = parse_outcome(&value).unwrap();
        assert!(!outcome.unchanged);
        assert_eq!(outcome.snapshot_id, "s2");
        assert_eq!(outcome.ref_count, 12);
        assert!(outcome.yaml.contains("Example Domain"));
    }

    #[test]
    fn outcome_maps_engine_errors() {
        let bad_root = json!({ "error": "root not found: #missing" });
        let err = parse_outcome(&bad_root).unwrap_err();
        assert_eq!(err.type_name(), "ElementNotFoundError");

        let bad_selector = json!({ "error": "invalid selector: unexpected token" });
        let err = parse_outcome(&bad_selector).unwrap_err();
        assert_eq!(err.type_name(), "ElementNotFoundError");
    }

    #[test]
    fn spill_decision_respects_both_limits() {
        assert!(!needs_spill("short", 10, INLINE_LIMIT_BYTES));
        let long = "x".repeat(INLINE_LIMIT_BYTES + 1);
        assert!(needs_spill(&long, 10, INLINE_LIMIT_BYTES));
        assert!(needs_spill("short", REF_SPILL_LIMIT + 1, INLINE_LIMIT_BYTES));
    }

    #[test]
    fn spill_writes_stem_scoped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = spill(dir.path(), "t3.after", "- document \"x\"").unwrap();
        assert!(path.ends_with("t3.after.yaml"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "- document \"x\"");
    }

    #[test]
    fn embedded_engine_mentions_persistent_state() {
        // The engine must keep its state browser-side.
        assert!(ARIA_JS.contains("__ariaRefs"));
        assert!(ARIA_JS.contains("__ariaSnapshotGen"));
        assert!(ARIA_JS.contains("__ariaHashes"));
    }
}
