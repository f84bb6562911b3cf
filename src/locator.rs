use std::time::Duration;

use serde_json::{Value, json};

use crate::error::{ExecKind, SkillError};
use crate::page::PageController;
use crate::steps::Target;

/// Browser-side ref re-resolution ladder (fast path, stored selector,
/// role+name search, shadow-host path, document-wide shadow sweep).
pub const RESOLVE_REF_JS: &str = include_str!("js/resolve_ref.js");

/// Actionability budget, deliberately shorter than general automation
/// defaults so agents get fast feedback.
pub const ACTIONABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry delays; the last entry repeats until the budget runs out.
const RETRY_SCHEDULE_MS: &[u64] = &[0, 50, 100, 200];

/// What a resolved element must satisfy before an action proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Attached to the document (click, hover, select).
    Attached,
    /// Attached, enabled, not readonly, and text-accepting (fill, type).
    Editable,
}

/// Outcome of one actionability probe, modeled as an explicit sum so the
/// retry ladder stays visible instead of hiding in catch chains.
#[derive(Debug)]
pub enum Probe {
    Ready,
    Retry(String),
    Fail(SkillError),
}

/// A successfully resolved element.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub object_id: String,
    /// The ref survived only through a fallback path.
    pub re_resolved: bool,
    /// Which locator input won (for multi-selector targets).
    pub matched: Option<String>,
}

/// Resolve a target to a live element handle.
///
/// # Errors
///
/// `ElementNotFoundError` when nothing matches (including invalid CSS,
/// surfaced immediately rather than after a timeout), `StaleElementError`
/// when a ref fails every fallback.
pub async fn resolve(page: &PageController, target: &Target) -> Result<Resolved, SkillError> {
    match target {
        Target::Selector(selector) => resolve_selector(page, selector).await,
        Target::Ref(reference) => resolve_ref(page, reference).await,
        Target::Text(text) => resolve_text(page, text).await,
        Target::Multi(selectors) => {
            for selector in selectors {
                if let Ok(mut resolved) = resolve_selector(page, selector).await {
                    resolved.matched = Some(selector.clone());
                    return Ok(resolved);
                }
            }
            Err(SkillError::element_not_found(&selectors.join(", ")))
        }
        Target::Coords { x, y } => Err(SkillError::step_validation(format!(
            "coordinates ({x}, {y}) cannot be resolved to an element"
        ))),
    }
}

/// Fetch the parked element from the resolution scratch slot as an object.
async fn parked_object(page: &PageController) -> Result<String, SkillError> {
    page.eval_to_object("window.__cdpSkillResolved")
        .await?
        .ok_or_else(|| SkillError::element_not_found("resolved element vanished"))
}

async fn resolve_selector(page: &PageController, selector: &str) -> Result<Resolved, SkillError> {
    let quoted = serde_json::to_string(selector)
        .map_err(|e| SkillError::step_validation(e.to_string()))?;
    let probe = page
        .eval(&format!(
            "(function() {{ try {{ \
               var el = document.querySelector({quoted}); \
               window.__cdpSkillResolved = el; \
               return {{ found: !!el }}; \
             }} catch (e) {{ return {{ error: 'invalid selector: ' + e.message }}; }} }})()"
        ))
        .await?;
    if let Some(error) = probe["error"].as_str() {
        // Selector syntax errors surface immediately, never as timeouts.
        return Err(SkillError::element_not_found(&format!(
            "{selector} ({error})"
        )));
    }
    if probe["found"].as_bool() != Some(true) {
        return Err(SkillError::element_not_found(selector));
    }
    Ok(Resolved {
        object_id: parked_object(page).await?,
        re_resolved: false,
        matched: None,
    })
}

async fn resolve_ref(page: &PageController, reference: &str) -> Result<Resolved, SkillError> {
    let quoted = serde_json::to_string(reference)
        .map_err(|e| SkillError::step_validation(e.to_string()))?;
    let outcome = page.eval(&format!("{RESOLVE_REF_JS}({quoted})")).await?;
    if outcome["found"].as_bool() != Some(true) {
        let reason = outcome["reason"].as_str().unwrap_or("not resolvable");
        return Err(SkillError::execution(
            ExecKind::StaleElement,
            format!("ref {reference} is stale ({reason}); take a fresh snapshot"),
        ));
    }
    Ok(Resolved {
        object_id: parked_object(page).await?,
        re_resolved: outcome["reResolved"].as_bool() == Some(true),
        matched: outcome["via"].as_str().map(ToOwned::to_owned),
    })
}

/// Text search priority: buttons, links, role=button, then other
/// interactive-like tags, matching accessible name or content.
async fn resolve_text(page: &PageController, text: &str) -> Result<Resolved, SkillError> {
    let quoted =
        serde_json::to_string(text).map_err(|e| SkillError::step_validation(e.to_string()))?;
    let probe = page
        .eval(&format!(
            r"(function(needle) {{
  var lower = needle.toLowerCase();
  function matches(el) {{
    var label = el.getAttribute && el.getAttribute('aria-label');
    var text = ((label || '') + ' ' + (el.value || '') + ' ' + el.textContent)
      .replace(/\s+/g, ' ').trim().toLowerCase();
    return text.indexOf(lower) !== -1;
  }}
  var groups = [
    'button, input[type=button], input[type=submit]',
    'a[href]',
    '[role=button]',
    'input, select, textarea, [role=link], [role=menuitem], [role=tab], [onclick], summary'
  ];
  for (var g = 0; g < groups.length; g++) {{
    var nodes = document.querySelectorAll(groups[g]);
    for (var i = 0; i < nodes.length; i++) {{
      if (matches(nodes[i])) {{
        window.__cdpSkillResolved = nodes[i];
        return {{ found: true }};
      }}
    }}
  }}
  return {{ found: false }};
}})({quoted})"
        ))
        .await?;
    if probe["found"].as_bool() != Some(true) {
        return Err(SkillError::element_not_found(&format!("text={text:?}")));
    }
    Ok(Resolved {
        object_id: parked_object(page).await?,
        re_resolved: false,
        matched: None,
    })
}

/// One actionability probe against a live handle.
///
/// # Errors
///
/// CDP transport failures only; check outcomes are in the returned [`Probe`].
pub async fn probe(
    page: &PageController,
    object_id: &str,
    requirement: Requirement,
) -> Result<Probe, SkillError> {
    let check = call_on(
        page,
        object_id,
        r"function() {
  if (!this.isConnected) return { ok: false, reason: 'detached from the document' };
  if (arguments[0] === 'editable') {
    if (this.disabled) return { ok: false, reason: 'disabled' };
    if (this.readOnly) return { ok: false, reason: 'readonly' };
    var editable = this.isContentEditable ||
      this.tagName === 'TEXTAREA' || this.tagName === 'SELECT' ||
      (this.tagName === 'INPUT' && ['text','search','url','tel','email','password',
        'number','date','month','week','time','datetime-local']
        .indexOf((this.getAttribute('type') || 'text').toLowerCase()) !== -1);
    if (!editable) return { ok: false, reason: 'not a text-accepting element' };
  }
  return { ok: true };
}",
        vec![json!(match requirement {
            Requirement::Attached => "attached",
            Requirement::Editable => "editable",
        })],
    )
    .await;

    match check {
        Ok(value) => {
            if value["ok"].as_bool() == Some(true) {
                Ok(Probe::Ready)
            } else {
                let reason = value["reason"].as_str().unwrap_or("not actionable");
                // A permanently missing capability does not heal with time.
                if requirement == Requirement::Editable && reason == "not a text-accepting element"
                {
                    return Ok(Probe::Fail(SkillError::not_editable("element", reason)));
                }
                Ok(Probe::Retry(reason.to_owned()))
            }
        }
        Err(e) => {
            if e.type_name() == "StaleElementError" {
                Ok(Probe::Retry("element handle went stale".to_owned()))
            } else {
                Err(e)
            }
        }
    }
}

/// Run the retry ladder until the element is ready, fails hard, or the
/// budget expires. Returns whether auto-force kicked in.
///
/// # Errors
///
/// `ElementNotEditableError` / `TimeoutError` when the requirement is never
/// met and the element no longer exists for auto-force.
pub async fn await_actionable(
    page: &PageController,
    target: &Target,
    requirement: Requirement,
    force: bool,
) -> Result<(Resolved, bool), SkillError> {
    let started = tokio::time::Instant::now();
    let mut attempt = 0usize;
    let mut last_reason = String::from("never probed");

    loop {
        let delay_ms = RETRY_SCHEDULE_MS
            .get(attempt)
            .copied()
            .unwrap_or(*RETRY_SCHEDULE_MS.last().unwrap_or(&200));
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        attempt += 1;

        match resolve(page, target).await {
            Ok(resolved) => {
                if force {
                    return Ok((resolved, false));
                }
                match probe(page, &resolved.object_id, requirement).await? {
                    Probe::Ready => return Ok((resolved, false)),
                    Probe::Fail(err) => return Err(err),
                    Probe::Retry(reason) => last_reason = reason,
                }
            }
            Err(e) => {
                // Selector syntax errors never heal with time.
                if e.message.contains("invalid selector") {
                    return Err(e);
                }
                // Stale refs and missing elements may appear after a rerender.
                last_reason = e.message.clone();
                if started.elapsed() >= ACTIONABILITY_TIMEOUT {
                    return Err(e);
                }
            }
        }

        if started.elapsed() >= ACTIONABILITY_TIMEOUT {
            // Auto-force: checks timed out, but if the element is present in
            // the DOM the action gets one chance with checks bypassed.
            if let Ok(resolved) = resolve(page, target).await {
                return Ok((resolved, true));
            }
            return Err(SkillError::timeout(format!(
                "element {} was not actionable within {}ms ({last_reason})",
                target.describe(),
                ACTIONABILITY_TIMEOUT.as_millis()
            )));
        }
    }
}

/// `Runtime.callFunctionOn` against a handle, returning the by-value result.
///
/// # Errors
///
/// Classified CDP errors; page exceptions surface as `NavigationError`.
pub async fn call_on(
    page: &PageController,
    object_id: &str,
    function: &str,
    arguments: Vec<Value>,
) -> Result<Value, SkillError> {
    let args: Vec<Value> = arguments.into_iter().map(|v| json!({ "value": v })).collect();
    let result = page
        .session()
        .send(
            "Runtime.callFunctionOn",
            Some(json!({
                "objectId": object_id,
                "functionDeclaration": function,
                "arguments": args,
                "returnByValue": true,
            })),
        )
        .await?;
    if let Some(details) = result.get("exceptionDetails") {
        let text = details["exception"]["description"]
            .as_str()
            .or_else(|| details["text"].as_str())
            .unwrap_or("exception in element function");
        return Err(SkillError::navigation(format!("element script failed: {text}")));
    }
    Ok(result["result"]["value"].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_matches_contract() {
        assert_eq!(RETRY_SCHEDULE_MS, &[0, 50, 100, 200]);
        assert_eq!(ACTIONABILITY_TIMEOUT, Duration::from_secs(5));
    }

    #[test]
    fn coords_cannot_resolve_to_elements() {
        // resolve() on coordinates must fail fast rather than query the DOM;
        // exercised through the error constructor here since resolve() needs
        // a live page.
        let err = SkillError::step_validation("coordinates (1, 2) cannot be resolved");
        assert_eq!(err.type_name(), "StepValidationError");
    }

    #[test]
    fn resolve_ref_script_carries_full_ladder() {
        for marker in ["direct", "selector", "shadowPath", "shadowSweep"] {
            assert!(RESOLVE_REF_JS.contains(marker), "missing ladder rung {marker}");
        }
    }

    #[test]
    fn probe_variants_distinguishable() {
        assert!(matches!(Probe::Ready, Probe::Ready));
        let retry = Probe::Retry("covered by an overlay".into());
        assert!(matches!(retry, Probe::Retry(_)));
    }
}
