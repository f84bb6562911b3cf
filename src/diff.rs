use std::collections::BTreeMap;

use serde::Serialize;

/// State attributes tracked for change detection.
const TRACKED_STATES: &[&str] = &[
    "checked", "expanded", "disabled", "selected", "pressed", "required", "readonly", "focused",
];

/// Cap on YAML lines reported per category and on change records.
const MAX_REPORTED: usize = 10;

/// One ref-bearing line parsed out of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RefLine {
    pub reference: String,
    pub role: String,
    pub name: String,
    /// state → value ("true" for bare flags, the literal for `key=value`).
    pub states: BTreeMap<String, String>,
    pub raw: String,
}

/// One changed field on a surviving ref.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeRecord {
    #[serde(rename = "ref")]
    pub reference: String,
    pub field: String,
    pub from: String,
    pub to: String,
}

/// The diff body placed in the response `changes` field.
#[derive(Debug, Serialize)]
pub struct ViewportDiff {
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<ChangeRecord>,
}

/// Parse every line carrying a `[ref=…]` annotation.
#[must_use]
pub fn parse_ref_lines(yaml: &str) -> Vec<RefLine> {
    yaml.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<RefLine> {
    let marker = line.find("[ref=")?;
    let after = &line[marker + 5..];
    let close = after.find(']')?;
    let reference = after[..close].to_owned();

    let trimmed = line.trim_start();
    let body = trimmed.strip_prefix("- ")?;

    let role_end = body.find(' ').unwrap_or(body.len());
    let role = body[..role_end].to_owned();

    let name = extract_quoted(&body[role_end..]).unwrap_or_default();

    let mut states = BTreeMap::new();
    for token in bracket_tokens(body) {
        if token.starts_with("ref=") {
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) => {
                states.insert(key.to_owned(), value.trim_matches('"').to_owned());
            }
            None => {
                states.insert(token.to_owned(), "true".to_owned());
            }
        }
    }

    Some(RefLine {
        reference,
        role,
        name,
        states,
        raw: trimmed.to_owned(),
    })
}

/// The first double-quoted run, honoring backslash escapes.
fn extract_quoted(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let mut out = String::new();
    let mut escaped = false;
    for c in text[start + 1..].chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(out);
        } else {
            out.push(c);
        }
    }
    None
}

/// All `[…]` groups after the quoted name.
fn bracket_tokens(body: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else { break };
        tokens.push(&after[..close]);
        rest = &after[close + 1..];
    }
    tokens
}

/// Map a command's step kinds to the summary's action-context prefix.
#[must_use]
pub fn action_context(actions: &[&str]) -> &'static str {
    for action in actions {
        match *action {
            "click" | "doubleClick" => return "Clicked",
            "scroll" => return "Scrolled",
            "type" => return "Typed",
            "fill" | "fillForm" => return "Filled",
            "press" => return "Pressed",
            "select" => return "Selected",
            "hover" => return "Hovered",
            "goto" | "back" | "forward" | "reload" | "openTab" => return "Navigated",
            _ => {}
        }
    }
    "Performed"
}

/// Compare the bracketing internal snapshots. Returns `None` when nothing
/// significant changed (the response omits `changes` entirely).
#[must_use]
pub fn compute(before_yaml: &str, after_yaml: &str, actions: &[&str]) -> Option<ViewportDiff> {
    let before: BTreeMap<String, RefLine> = parse_ref_lines(before_yaml)
        .into_iter()
        .map(|l| (l.reference.clone(), l))
        .collect();
    let after: BTreeMap<String, RefLine> = parse_ref_lines(after_yaml)
        .into_iter()
        .map(|l| (l.reference.clone(), l))
        .collect();

    let added: Vec<String> = after
        .values()
        .filter(|l| !before.contains_key(&l.reference))
        .map(|l| l.raw.clone())
        .collect();
    let removed: Vec<String> = before
        .values()
        .filter(|l| !after.contains_key(&l.reference))
        .map(|l| l.raw.clone())
        .collect();

    let mut changed = Vec::new();
    for (reference, old) in &before {
        let Some(new) = after.get(reference) else {
            continue;
        };
        for state in TRACKED_STATES {
            let from = old.states.get(*state);
            let to = new.states.get(*state);
            if from != to {
                changed.push(ChangeRecord {
                    reference: reference.clone(),
                    field: (*state).to_owned(),
                    from: from.cloned().unwrap_or_else(|| "false".to_owned()),
                    to: to.cloned().unwrap_or_else(|| "false".to_owned()),
                });
            }
        }
        // Input value flips matter to the agent as much as state bits.
        let from_value = old.states.get("value");
        let to_value = new.states.get("value");
        if from_value != to_value {
            changed.push(ChangeRecord {
                reference: reference.clone(),
                field: "value".to_owned(),
                from: from_value.cloned().unwrap_or_default(),
                to: to_value.cloned().unwrap_or_default(),
            });
        }
    }

    if added.is_empty() && removed.is_empty() && changed.is_empty() {
        return None;
    }

    let summary = format!(
        "{}: {} added, {} removed, {} changed",
        action_context(actions),
        added.len(),
        removed.len(),
        changed.len()
    );

    Some(ViewportDiff {
        summary,
        added: added.into_iter().take(MAX_REPORTED).collect(),
        removed: removed.into_iter().take(MAX_REPORTED).collect(),
        changed: changed.into_iter().take(MAX_REPORTED).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEFORE: &str = r#"# scope: main
- heading "Settings" [level=1]
- checkbox "Email alerts" [ref=s1e1]
- button "Save" [disabled] [ref=s1e2]
- link "Help" [href=/help] [ref=s1e3]
"#;

    const AFTER: &str = r#"# scope: main
- heading "Settings" [level=1]
- checkbox "Email alerts" [checked] [ref=s1e1]
- button "Save" [ref=s1e2]
- textbox "Reason" [value="because"] [ref=s1e4]
"#;

    #[test]
    fn parses_only_ref_bearing_lines() {
        let lines = parse_ref_lines(BEFORE);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].reference, "s1e1");
        assert_eq!(lines[0].role, "checkbox");
        assert_eq!(lines[0].name, "Email alerts");
    }

    #[test]
    fn parses_states_and_key_values() {
        let lines = parse_ref_lines(BEFORE);
        let save = &lines[1];
        assert_eq!(save.states.get("disabled").map(String::as_str), Some("true"));
        let help = &lines[2];
        assert_eq!(help.states.get("href").map(String::as_str), Some("/help"));
    }

    #[test]
    fn parses_escaped_quotes_in_names() {
        let line = r#"- button "Say \"hi\"" [ref=s1e9]"#;
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.name, r#"Say "hi""#);
    }

    #[test]
    fn diff_reports_added_removed_changed() {
        let diff = compute(BEFORE, AFTER, &["click"]).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert!(diff.added[0].contains("s1e4"));
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.removed[0].contains("s1e3"));

        let fields: Vec<(&str, &str)> = diff
            .changed
            .iter()
            .map(|c| (c.reference.as_str(), c.field.as_str()))
            .collect();
        assert!(fields.contains(&("s1e1", "checked")));
        assert!(fields.contains(&("s1e2", "disabled")));
    }

    #[test]
    fn change_records_carry_from_and_to() {
        let diff = compute(BEFORE, AFTER, &["click"]).unwrap();
        let checked = diff
            .changed
            .iter()
            .find(|c| c.reference == "s1e1" && c.field == "checked")
            .unwrap();
        assert_eq!(checked.from, "false");
        assert_eq!(checked.to, "true");
    }

    #[test]
    fn identical_snapshots_produce_no_diff() {
        assert!(compute(BEFORE, BEFORE, &["click"]).is_none());
    }

    #[test]
    fn empty_iff_no_state_or_membership_change() {
        // Name text drift without state change is not significant.
        let a = "- button \"Save\" [ref=s1e1]\n";
        let b = "- button \"Save now\" [ref=s1e1]\n";
        assert!(compute(a, b, &["click"]).is_none());
    }

    #[test]
    fn summary_uses_action_context() {
        let diff = compute(BEFORE, AFTER, &["snapshot", "type"]).unwrap();
        assert!(diff.summary.starts_with("Typed:"), "{}", diff.summary);
    }

    #[test]
    fn action_context_priority() {
        assert_eq!(action_context(&["click"]), "Clicked");
        assert_eq!(action_context(&["scroll"]), "Scrolled");
        assert_eq!(action_context(&["goto"]), "Navigated");
        assert_eq!(action_context(&["evaluate"]), "Performed");
        assert_eq!(action_context(&[]), "Performed");
    }

    #[test]
    fn caps_reported_lines() {
        let mut before = String::new();
        let mut after = String::new();
        for i in 0..25 {
            after.push_str(&format!("- button \"B{i}\" [ref=s1e{i}]\n"));
        }
        for i in 25..55 {
            before.push_str(&format!("- button \"B{i}\" [ref=s1e{i}]\n"));
        }
        let diff = compute(&before, &after, &["click"]).unwrap();
        assert_eq!(diff.added.len(), MAX_REPORTED);
        assert_eq!(diff.removed.len(), MAX_REPORTED);
        assert!(diff.summary.contains("25 added"));
        assert!(diff.summary.contains("30 removed"));
    }

    #[test]
    fn value_changes_are_tracked() {
        let a = "- textbox \"Email\" [ref=s1e1]\n";
        let b = "- textbox \"Email\" [value=\"x@y.test\"] [ref=s1e1]\n";
        let diff = compute(a, b, &["fill"]).unwrap();
        assert_eq!(diff.changed[0].field, "value");
        assert_eq!(diff.changed[0].to, "x@y.test");
        assert!(diff.summary.starts_with("Filled:"));
    }
}
