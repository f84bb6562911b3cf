use serde_json::{Value, json};

use crate::page::PageController;

/// Browser-side capture of page context and the failure sweep.
pub const CONTEXT_JS: &str = include_str!("js/context.js");

/// Near-match candidates surfaced on failure.
const MAX_NEAR_MATCHES: usize = 5;

/// Capture the command-envelope page context (url, title, scroll, viewport,
/// active element, modal). Best-effort: failures yield `None`.
pub async fn capture(page: &PageController) -> Option<Value> {
    let expr = format!("{CONTEXT_JS}({{}})");
    page.eval(&expr).await.ok().filter(Value::is_object)
}

/// Capture the richer failure context; when the failed step carried a
/// selector or text argument, score near-matches host-side.
///
/// Every exception along the way is swallowed so the primary step error
/// survives intact.
pub async fn capture_failure(page: &PageController, search_term: Option<&str>) -> Option<Value> {
    let expr = format!("{CONTEXT_JS}({{\"failure\": true}})");
    let mut context = page.eval(&expr).await.ok().filter(Value::is_object)?;

    if let Some(term) = search_term {
        let candidates = context["candidates"].as_array().cloned().unwrap_or_default();
        let near = near_matches(term, &candidates);
        if !near.is_empty() {
            context["nearMatches"] = json!(near);
        }
    }
    if let Some(map) = context.as_object_mut() {
        map.remove("candidates");
    }
    Some(context)
}

/// Score a candidate text against the failed search term.
///
/// 100 exact (case-insensitive), 80 term ⊂ text, 70 text ⊂ term (text of 3+
/// chars), 50 a shared word of 3+ chars, 0 otherwise.
#[must_use]
pub fn score_match(term: &str, text: &str) -> u32 {
    let term_lower = term.trim().to_lowercase();
    let text_lower = text.trim().to_lowercase();
    if term_lower.is_empty() || text_lower.is_empty() {
        return 0;
    }
    if term_lower == text_lower {
        return 100;
    }
    if text_lower.contains(&term_lower) {
        return 80;
    }
    if text_lower.len() >= 3 && term_lower.contains(&text_lower) {
        return 70;
    }
    let term_words: Vec<&str> = term_lower
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .collect();
    let shares_word = text_lower
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .any(|w| term_words.contains(&w));
    if shares_word { 50 } else { 0 }
}

/// Rank the browser-collected candidates and keep the best five.
fn near_matches(term: &str, candidates: &[Value]) -> Vec<Value> {
    let mut scored: Vec<(u32, Value)> = candidates
        .iter()
        .filter_map(|candidate| {
            let text = candidate["text"].as_str()?;
            let score = score_match(term, text);
            if score == 0 {
                return None;
            }
            let mut item = json!({
                "text": text,
                "selector": candidate["selector"],
                "score": score,
            });
            if let Some(reference) = candidate["ref"].as_str() {
                item["ref"] = json!(reference);
            }
            Some((score, item))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(MAX_NEAR_MATCHES)
        .map(|(_, item)| item)
        .collect()
}
