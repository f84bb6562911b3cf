use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::cdp::CdpEvent;
use crate::error::{ExecKind, SkillError};
use crate::keys::{self, KeyCombo};
use crate::locator::{self, Requirement, Resolved};
use crate::page::{PageController, is_navigation};
use crate::snapshot::artifact_dir;
use crate::steps::{
    ClickParams, FillFormParams, FillParams, PressParams, ScrollParams, SelectParams, Target,
    TypeParams, WaitForParams,
};

/// Hook/predicate polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait after a click for navigations and new tabs to announce themselves.
const CLICK_SETTLE: Duration = Duration::from_millis(100);

/// Interceptor families recognized when a click point is covered.
const INTERCEPTOR_PATTERNS: &[(&str, &str)] = &[
    ("cookie", "cookie banner"),
    ("consent", "consent dialog"),
    ("gdpr", "consent dialog"),
    ("modal", "modal"),
    ("dialog", "modal"),
    ("overlay", "overlay"),
    ("backdrop", "overlay"),
    ("popup", "popup"),
    ("notification", "notification"),
    ("toast", "notification"),
];

/// Classify an interceptor by its class/role string.
#[must_use]
pub fn classify_interceptor(descriptor: &str) -> &'static str {
    let lower = descriptor.to_lowercase();
    for (needle, label) in INTERCEPTOR_PATTERNS {
        if lower.contains(needle) {
            return label;
        }
    }
    "element"
}

/// Center of an element's bounding rect in viewport coordinates, after
/// scrolling it into view.
async fn center_of(page: &PageController, object_id: &str) -> Result<(f64, f64), SkillError> {
    let rect = locator::call_on(
        page,
        object_id,
        r"function() {
  if (this.scrollIntoViewIfNeeded) this.scrollIntoViewIfNeeded(true);
  else this.scrollIntoView({ block: 'center', inline: 'center' });
  var r = this.getBoundingClientRect();
  return { x: r.left + r.width / 2, y: r.top + r.height / 2,
           width: r.width, height: r.height };
}",
        vec![],
    )
    .await?;
    let width = rect["width"].as_f64().unwrap_or(0.0);
    let height = rect["height"].as_f64().unwrap_or(0.0);
    if width < 1.0 || height < 1.0 {
        return Err(SkillError::element_not_found("element has zero size"));
    }
    Ok((
        rect["x"].as_f64().unwrap_or(0.0),
        rect["y"].as_f64().unwrap_or(0.0),
    ))
}

/// Hit-test the click point. `Ok(None)` means the target (or a descendant)
/// owns the point; otherwise the interceptor's descriptor is returned.
async fn hit_test(
    page: &PageController,
    object_id: &str,
    x: f64,
    y: f64,
) -> Result<Option<String>, SkillError> {
    let result = locator::call_on(
        page,
        object_id,
        r"function(x, y) {
  var hit = document.elementFromPoint(x, y);
  if (!hit) return { clear: false, descriptor: 'nothing (point off-viewport)' };
  if (hit === this || this.contains(hit) || hit.contains(this)) return { clear: true };
  var descriptor = hit.tagName.toLowerCase();
  if (hit.id) descriptor += '#' + hit.id;
  var cls = (hit.getAttribute('class') || '').trim();
  if (cls) descriptor += '.' + cls.split(/\s+/).join('.');
  var role = hit.getAttribute && hit.getAttribute('role');
  if (role) descriptor += '[role=' + role + ']';
  return { clear: false, descriptor: descriptor };
}",
        vec![json!(x), json!(y)],
    )
    .await?;
    if result["clear"].as_bool() == Some(true) {
        Ok(None)
    } else {
        Ok(result["descriptor"].as_str().map(ToOwned::to_owned))
    }
}

async fn mouse_event(
    page: &PageController,
    kind: &str,
    x: f64,
    y: f64,
    click_count: u8,
) -> Result<(), SkillError> {
    let mut params = json!({ "type": kind, "x": x, "y": y });
    if kind != "mouseMoved" {
        params["button"] = json!("left");
        params["clickCount"] = json!(click_count);
    }
    page.session()
        .send("Input.dispatchMouseEvent", Some(params))
        .await?;
    Ok(())
}

/// Dispatch a full CDP click sequence at a point.
async fn dispatch_mouse_click(
    page: &PageController,
    x: f64,
    y: f64,
    double: bool,
) -> Result<(), SkillError> {
    mouse_event(page, "mouseMoved", x, y, 0).await?;
    mouse_event(page, "mousePressed", x, y, 1).await?;
    mouse_event(page, "mouseReleased", x, y, 1).await?;
    if double {
        mouse_event(page, "mousePressed", x, y, 2).await?;
        mouse_event(page, "mouseReleased", x, y, 2).await?;
    }
    Ok(())
}

/// Outcome of a click, assembled into the step output.
pub struct ClickOutcome {
    pub output: Value,
    pub warning: Option<String>,
    pub navigated: bool,
}

/// Execute a click (or double click) with interception detection, CDP
/// dispatch, event-reception verification, and JS fallback.
///
/// `new_tab_events` drains `Target.targetCreated` notifications collected
/// during the click window.
///
/// # Errors
///
/// Locator and actionability failures; transport errors.
#[allow(clippy::too_many_lines)]
pub async fn click(
    page: &PageController,
    params: &ClickParams,
    double: bool,
    new_tab_events: Option<&mut mpsc::Receiver<CdpEvent>>,
) -> Result<ClickOutcome, SkillError> {
    let (url_before, _) = page.page_info().await.unwrap_or_default();
    let mut warning = None;

    // Coordinate clicks skip element resolution entirely.
    if let Target::Coords { x, y } = params.target {
        dispatch_mouse_click(page, x, y, double).await?;
        tokio::time::sleep(CLICK_SETTLE).await;
        let (url_after, _) = page.page_info().await.unwrap_or_default();
        let navigated = is_navigation(&url_before, &url_after);
        let mut output = json!({ "method": "cdp", "x": x, "y": y });
        attach_new_tabs(&mut output, new_tab_events);
        if navigated {
            output["navigated"] = json!(true);
        }
        return Ok(ClickOutcome {
            output,
            warning: None,
            navigated,
        });
    }

    let (resolved, auto_forced) =
        locator::await_actionable(page, &params.target, Requirement::Attached, params.force)
            .await?;
    let Resolved {
        object_id,
        re_resolved,
        ..
    } = resolved;

    let (x, y) = center_of(page, &object_id).await?;

    // Verify the point actually lands on the target before dispatching.
    let mut intercepted = false;
    if !params.force && !auto_forced {
        if let Some(descriptor) = hit_test(page, &object_id, x, y).await? {
            intercepted = true;
            warning = Some(format!(
                "click point is covered by a {} ({descriptor}); CDP events may not reach the target",
                classify_interceptor(&descriptor)
            ));
        }
    }

    // Arm the reception check: a trusted click must produce pointerdown on
    // the target.
    locator::call_on(
        page,
        &object_id,
        r"function() {
  window.__cdpSkillClickSeen = false;
  var mark = function() { window.__cdpSkillClickSeen = true; };
  this.addEventListener('pointerdown', mark, { once: true, capture: true });
}",
        vec![],
    )
    .await?;

    dispatch_mouse_click(page, x, y, double).await?;

    let seen = page
        .eval("window.__cdpSkillClickSeen === true")
        .await
        .map(|v| v.as_bool() == Some(true))
        .unwrap_or(false);

    let mut method = "cdp";
    let mut cdp_attempted = false;
    if !seen {
        // CDP events landed elsewhere (interception, custom hit-testing):
        // fall back to the programmatic click.
        cdp_attempted = true;
        method = "jsClick-auto";
        locator::call_on(page, &object_id, "function() { this.click(); }", vec![]).await?;
        if warning.is_none() {
            warning = Some(
                "CDP click was not received by the target; fell back to element.click()".to_owned(),
            );
        }
    } else if intercepted {
        // The overlay let the event through after all; keep the note mild.
        warning = warning.map(|w| format!("{w} (click was received anyway)"));
    }

    tokio::time::sleep(CLICK_SETTLE).await;

    let (url_after, _) = page.page_info().await.unwrap_or_default();
    let navigated = is_navigation(&url_before, &url_after);

    let mut output = json!({ "method": method });
    if cdp_attempted {
        output["cdpAttempted"] = json!(true);
    }
    if re_resolved {
        output["reResolved"] = json!(true);
    }
    if auto_forced {
        output["autoForced"] = json!(true);
    }
    if navigated {
        output["navigated"] = json!(true);
    }
    attach_new_tabs(&mut output, new_tab_events);

    Ok(ClickOutcome {
        output,
        warning,
        navigated,
    })
}

/// Drain buffered `Target.targetCreated` events into `newTabs`.
fn attach_new_tabs(output: &mut Value, events: Option<&mut mpsc::Receiver<CdpEvent>>) {
    let Some(rx) = events else { return };
    let mut tabs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        let info = &event.params["targetInfo"];
        if info["type"].as_str() == Some("page") {
            tabs.push(json!({
                "targetId": info["targetId"],
                "url": info["url"],
                "title": info["title"],
            }));
        }
    }
    if !tabs.is_empty() {
        output["newTabs"] = json!(tabs);
    }
}

/// Resolve a fill target: direct target, or the label chain (`<label for>`,
/// nested label, aria-label, aria-labelledby, placeholder).
async fn resolve_fill_target(
    page: &PageController,
    params: &FillParams,
) -> Result<(Resolved, bool), SkillError> {
    if let Some(target) = &params.target {
        return locator::await_actionable(page, target, Requirement::Editable, false).await;
    }
    let label = params
        .label
        .as_deref()
        .ok_or_else(|| SkillError::step_validation("fill needs a target or a label"))?;
    let quoted =
        serde_json::to_string(label).map_err(|e| SkillError::step_validation(e.to_string()))?;
    let probe = page
        .eval(&format!(
            r"(function(wanted) {{
  var lower = wanted.toLowerCase();
  function textMatches(text) {{
    return (text || '').replace(/\s+/g, ' ').trim().toLowerCase().indexOf(lower) !== -1;
  }}
  var labels = document.querySelectorAll('label');
  for (var i = 0; i < labels.length; i++) {{
    if (!textMatches(labels[i].textContent)) continue;
    var forId = labels[i].getAttribute('for');
    if (forId) {{
      var byFor = document.getElementById(forId);
      if (byFor) {{ window.__cdpSkillResolved = byFor; return {{ found: true }}; }}
    }}
    var nested = labels[i].querySelector('input, textarea, select');
    if (nested) {{ window.__cdpSkillResolved = nested; return {{ found: true }}; }}
  }}
  var fields = document.querySelectorAll('input, textarea, select, [contenteditable=true]');
  for (var j = 0; j < fields.length; j++) {{
    var el = fields[j];
    if (textMatches(el.getAttribute('aria-label')) ||
        textMatches(el.getAttribute('placeholder'))) {{
      window.__cdpSkillResolved = el;
      return {{ found: true }};
    }}
    var labelledBy = el.getAttribute('aria-labelledby');
    if (labelledBy) {{
      var joined = labelledBy.split(/\s+/).map(function(id) {{
        var t = document.getElementById(id);
        return t ? t.textContent : '';
      }}).join(' ');
      if (textMatches(joined)) {{
        window.__cdpSkillResolved = el;
        return {{ found: true }};
      }}
    }}
  }}
  return {{ found: false }};
}})({quoted})"
        ))
        .await?;
    if probe["found"].as_bool() != Some(true) {
        return Err(SkillError::element_not_found(&format!("label={label:?}")));
    }
    let object_id = page
        .eval_to_object("window.__cdpSkillResolved")
        .await?
        .ok_or_else(|| SkillError::element_not_found(label))?;
    Ok((
        Resolved {
            object_id,
            re_resolved: false,
            matched: None,
        },
        false,
    ))
}

/// Fill one field: focus, optionally clear, insert text, fire events.
///
/// # Errors
///
/// `ElementNotEditableError` when preconditions fail, locator errors
/// otherwise.
pub async fn fill(page: &PageController, params: &FillParams) -> Result<Value, SkillError> {
    let (resolved, auto_forced) = resolve_fill_target(page, params).await?;

    // Focus through a real click so focus/blur handlers fire.
    let (x, y) = center_of(page, &resolved.object_id).await?;
    dispatch_mouse_click(page, x, y, false).await?;

    if params.clear {
        locator::call_on(
            page,
            &resolved.object_id,
            r"function() {
  if (this.select) this.select();
  else if (this.isContentEditable) {
    var range = document.createRange();
    range.selectNodeContents(this);
    var sel = window.getSelection();
    sel.removeAllRanges();
    sel.addRange(range);
  }
}",
            vec![],
        )
        .await?;
        // Selected content is replaced by the inserted text; an empty value
        // still needs explicit deletion.
        if params.value.is_empty() {
            page.session()
                .send(
                    "Input.dispatchKeyEvent",
                    Some(json!({ "type": "keyDown", "key": "Delete", "code": "Delete" })),
                )
                .await?;
            page.session()
                .send(
                    "Input.dispatchKeyEvent",
                    Some(json!({ "type": "keyUp", "key": "Delete", "code": "Delete" })),
                )
                .await?;
        }
    }

    if !params.value.is_empty() {
        page.session()
            .send("Input.insertText", Some(json!({ "text": params.value })))
            .await?;
    }

    // Synthetic input/change events for frameworks listening above the
    // native input; React mode writes through the native value setter first.
    locator::call_on(
        page,
        &resolved.object_id,
        r"function(value, react) {
  if (react && (this.tagName === 'INPUT' || this.tagName === 'TEXTAREA')) {
    var proto = this.tagName === 'INPUT'
      ? window.HTMLInputElement.prototype
      : window.HTMLTextAreaElement.prototype;
    var setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
    setter.call(this, value);
  }
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}",
        vec![json!(params.value), json!(params.react)],
    )
    .await?;

    let mut output = json!({ "value": params.value });
    if resolved.re_resolved {
        output["reResolved"] = json!(true);
    }
    if auto_forced {
        output["autoForced"] = json!(true);
    }
    Ok(output)
}

/// Batch form fill: every field is attempted; per-field success/failure is
/// reported and a single failing field does not stop the batch.
pub async fn fill_form(page: &PageController, params: &FillFormParams) -> Result<Value, SkillError> {
    let mut results = Vec::with_capacity(params.fields.len());
    let mut failures = 0usize;
    for (selector, value) in &params.fields {
        let field_params = FillParams {
            target: Some(if crate::steps::is_ref(selector) {
                Target::Ref(selector.clone())
            } else {
                Target::Selector(selector.clone())
            }),
            label: None,
            value: value.clone(),
            clear: true,
            react: params.react,
        };
        match fill(page, &field_params).await {
            Ok(_) => results.push(json!({ "field": selector, "status": "ok" })),
            Err(e) => {
                failures += 1;
                results.push(json!({
                    "field": selector,
                    "status": "error",
                    "error": e.message,
                }));
            }
        }
    }
    if failures == params.fields.len() {
        return Err(SkillError::execution(
            ExecKind::ElementNotFound,
            format!("all {failures} fields failed to fill"),
        ));
    }
    Ok(json!({ "fields": results, "failed": failures }))
}

/// Select `<option>` values on a `<select>` element.
///
/// # Errors
///
/// `ElementNotFoundError` when no option matches.
pub async fn select(page: &PageController, params: &SelectParams) -> Result<Value, SkillError> {
    let (resolved, _) =
        locator::await_actionable(page, &params.target, Requirement::Attached, false).await?;
    let outcome = locator::call_on(
        page,
        &resolved.object_id,
        r"function(values) {
  if (this.tagName !== 'SELECT') return { error: 'not a select element' };
  var matched = [];
  for (var i = 0; i < this.options.length; i++) {
    var option = this.options[i];
    var hit = values.indexOf(option.value) !== -1 ||
      values.indexOf(option.textContent.trim()) !== -1;
    if (this.multiple) option.selected = hit;
    else if (hit) this.selectedIndex = i;
    if (hit) matched.push(option.value);
  }
  if (matched.length) {
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
  }
  return { selected: matched };
}",
        vec![json!(params.values)],
    )
    .await?;
    if let Some(error) = outcome["error"].as_str() {
        return Err(SkillError::not_editable(&params.target.describe(), error));
    }
    let selected = outcome["selected"].as_array().cloned().unwrap_or_default();
    if selected.is_empty() {
        return Err(SkillError::element_not_found(&format!(
            "option {:?} in {}",
            params.values,
            params.target.describe()
        )));
    }
    let mut output = json!({ "selected": selected });
    if resolved.re_resolved {
        output["reResolved"] = json!(true);
    }
    Ok(output)
}

/// Type text into the focused element, one char event per character.
///
/// # Errors
///
/// Transport failures only.
pub async fn type_text(page: &PageController, params: &TypeParams) -> Result<Value, SkillError> {
    for c in params.text.chars() {
        page.session()
            .send(
                "Input.dispatchKeyEvent",
                Some(json!({ "type": "char", "text": c.to_string() })),
            )
            .await?;
        if params.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(params.delay_ms)).await;
        }
    }
    Ok(json!({ "length": params.text.chars().count() }))
}

/// Press a key combination: modifiers down, key down/up, modifiers up.
///
/// # Errors
///
/// `StepValidationError` for unknown keys.
pub async fn press(page: &PageController, params: &PressParams) -> Result<Value, SkillError> {
    let combo = keys::parse_combo(&params.keys)?;
    for _ in 0..params.repeat {
        press_once(page, &combo).await?;
    }
    let mut output = json!({ "pressed": params.keys });
    if params.repeat > 1 {
        output["repeat"] = json!(params.repeat);
    }
    Ok(output)
}

async fn press_once(page: &PageController, combo: &KeyCombo) -> Result<(), SkillError> {
    for (key, code) in keys::modifier_sequence(combo.modifiers) {
        key_event(page, "keyDown", key, code, combo.modifiers, None).await?;
    }
    let key = keys::cdp_key(&combo.key);
    let code = keys::cdp_code(&combo.key);
    let vk = keys::windows_vk(&combo.key);
    key_event(page, "keyDown", key, &code, combo.modifiers, vk).await?;
    key_event(page, "keyUp", key, &code, combo.modifiers, vk).await?;
    for (key, code) in keys::modifier_sequence(combo.modifiers).into_iter().rev() {
        key_event(page, "keyUp", key, code, 0, None).await?;
    }
    Ok(())
}

async fn key_event(
    page: &PageController,
    kind: &str,
    key: &str,
    code: &str,
    modifiers: u8,
    vk: Option<u32>,
) -> Result<(), SkillError> {
    let mut params = json!({
        "type": kind,
        "key": key,
        "code": code,
        "modifiers": modifiers,
    });
    if let Some(vk) = vk {
        params["windowsVirtualKeyCode"] = json!(vk);
        params["nativeVirtualKeyCode"] = json!(vk);
    }
    page.session()
        .send("Input.dispatchKeyEvent", Some(params))
        .await?;
    Ok(())
}

/// Hover the element's center.
///
/// # Errors
///
/// Locator failures.
pub async fn hover(page: &PageController, target: &Target) -> Result<Value, SkillError> {
    let (resolved, _) = locator::await_actionable(page, target, Requirement::Attached, false).await?;
    let (x, y) = center_of(page, &resolved.object_id).await?;
    mouse_event(page, "mouseMoved", x, y, 0).await?;
    let mut output = json!({ "x": x, "y": y });
    if resolved.re_resolved {
        output["reResolved"] = json!(true);
    }
    Ok(output)
}

/// Scroll the page or a container.
///
/// # Errors
///
/// Locator failures for target scrolls; transport failures otherwise.
pub async fn scroll(page: &PageController, params: &ScrollParams) -> Result<Value, SkillError> {
    match params {
        ScrollParams::ToTarget(target) => {
            let (resolved, _) =
                locator::await_actionable(page, target, Requirement::Attached, false).await?;
            locator::call_on(
                page,
                &resolved.object_id,
                "function() { this.scrollIntoView({ block: 'center' }); }",
                vec![],
            )
            .await?;
        }
        ScrollParams::ToEdge { bottom } => {
            let expr = if *bottom {
                "window.scrollTo(0, document.documentElement.scrollHeight)"
            } else {
                "window.scrollTo(0, 0)"
            };
            page.eval(expr).await?;
        }
        ScrollParams::By { dx, dy } => {
            page.eval(&format!("window.scrollBy({dx}, {dy})")).await?;
        }
        ScrollParams::Direction { direction, amount } => {
            let viewport = page
                .eval("JSON.stringify({w: window.innerWidth, h: window.innerHeight})")
                .await?;
            let dims: Value =
                serde_json::from_str(viewport.as_str().unwrap_or("{}")).unwrap_or_default();
            let page_w = dims["w"].as_f64().unwrap_or(1280.0);
            let page_h = dims["h"].as_f64().unwrap_or(720.0);
            let (dx, dy) = match direction.as_str() {
                "up" => (0.0, -amount.unwrap_or(page_h)),
                "down" => (0.0, amount.unwrap_or(page_h)),
                "left" => (-amount.unwrap_or(page_w), 0.0),
                _ => (amount.unwrap_or(page_w), 0.0),
            };
            page.eval(&format!("window.scrollBy({dx}, {dy})")).await?;
        }
    }
    let position = page
        .eval("JSON.stringify({x: window.scrollX, y: window.scrollY})")
        .await?;
    let parsed: Value = serde_json::from_str(position.as_str().unwrap_or("{}")).unwrap_or_default();
    Ok(json!({
        "x": parsed["x"].as_f64().unwrap_or(0.0),
        "y": parsed["y"].as_f64().unwrap_or(0.0),
    }))
}

/// Poll a JavaScript predicate until truthy.
///
/// # Errors
///
/// `TimeoutError` with the last value when it never turns truthy.
pub async fn wait_for_predicate(
    page: &PageController,
    predicate: &str,
    timeout: Duration,
) -> Result<Value, SkillError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last;
    loop {
        last = page.eval(predicate).await.unwrap_or(Value::Null);
        if is_truthy(&last) {
            return Ok(last);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SkillError::timeout(format!(
                "predicate stayed falsy for {}ms (last value: {last})",
                timeout.as_millis()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// JavaScript truthiness over the JSON-serialized predicate result.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The `waitFor` step: selector states or raw predicate.
///
/// # Errors
///
/// `TimeoutError` when the condition is not met in time.
pub async fn wait_for(
    page: &PageController,
    params: &WaitForParams,
    default_timeout: Duration,
) -> Result<Value, SkillError> {
    let timeout = params
        .timeout_ms
        .map_or(default_timeout, Duration::from_millis);
    if let Some(predicate) = &params.predicate {
        let value = wait_for_predicate(page, predicate, timeout).await?;
        return Ok(json!({ "value": value }));
    }
    let selector = params
        .selector
        .as_deref()
        .ok_or_else(|| SkillError::step_validation("waitFor needs a selector or predicate"))?;
    let quoted =
        serde_json::to_string(selector).map_err(|e| SkillError::step_validation(e.to_string()))?;
    // Selector syntax is checked once up front so a typo fails immediately
    // instead of polling into a timeout.
    let syntax = page
        .eval(&format!(
            "(function() {{ try {{ document.querySelector({quoted}); return null; }} \
             catch (e) {{ return 'invalid selector: ' + e.message; }} }})()"
        ))
        .await?;
    if let Some(error) = syntax.as_str() {
        return Err(SkillError::element_not_found(&format!("{selector} ({error})")));
    }
    let predicate = match params.state.as_str() {
        // Stable: position unchanged for three consecutive animation frames.
        "stable" => format!(
            "(function() {{ var el = document.querySelector({quoted}); \
             if (!el) return Promise.resolve(false); \
             return new Promise(function(resolve) {{ \
               var last = null, same = 0, frames = 0; \
               function tick() {{ \
                 var r = el.getBoundingClientRect(); \
                 var key = r.left + ',' + r.top + ',' + r.width + ',' + r.height; \
                 if (key === last) same += 1; else {{ same = 0; last = key; }} \
                 if (same >= 3) return resolve(true); \
                 if (frames++ > 120) return resolve(false); \
                 requestAnimationFrame(tick); \
               }} \
               requestAnimationFrame(tick); \
             }}); }})()"
        ),
        "hidden" => format!(
            "(function() {{ var el = document.querySelector({quoted}); \
             if (!el) return true; var s = getComputedStyle(el); \
             return s.display === 'none' || s.visibility === 'hidden' || \
               el.getBoundingClientRect().width === 0; }})()"
        ),
        "visible" => format!(
            "(function() {{ var el = document.querySelector({quoted}); \
             if (!el) return false; var s = getComputedStyle(el); \
             if (s.display === 'none' || s.visibility === 'hidden') return false; \
             var r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0; }})()"
        ),
        _ => format!("!!document.querySelector({quoted})"),
    };
    wait_for_predicate(page, &predicate, timeout).await?;
    Ok(json!({ "selector": selector, "state": params.state }))
}

/// Capture a screenshot to `{dir}/{name}.png`; returns the path.
///
/// # Errors
///
/// CDP failure or unwritable artifact directory.
pub async fn screenshot(
    page: &PageController,
    name: &str,
    full_page: bool,
) -> Result<PathBuf, SkillError> {
    let mut params = json!({ "format": "png" });
    if full_page {
        params["captureBeyondViewport"] = json!(true);
    }
    let result = page
        .session()
        .send("Page.captureScreenshot", Some(params))
        .await?;
    let data = result["data"]
        .as_str()
        .ok_or_else(|| SkillError::navigation("captureScreenshot returned no data"))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| SkillError::navigation(format!("bad screenshot payload: {e}")))?;
    let dir = artifact_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| SkillError::navigation(format!("cannot create artifact dir: {e}")))?;
    let path = dir.join(format!("{name}.png"));
    std::fs::write(&path, bytes)
        .map_err(|e| SkillError::navigation(format!("cannot write screenshot: {e}")))?;
    Ok(path)
}

/// Print the page to `{dir}/{name}.pdf`; returns the path.
///
/// # Errors
///
/// CDP failure or unwritable artifact directory.
pub async fn pdf(
    page: &PageController,
    name: &str,
    landscape: bool,
    scale: Option<f64>,
) -> Result<PathBuf, SkillError> {
    let mut params = json!({ "landscape": landscape });
    if let Some(scale) = scale {
        params["scale"] = json!(scale);
    }
    let result = page.session().send("Page.printToPDF", Some(params)).await?;
    let data = result["data"]
        .as_str()
        .ok_or_else(|| SkillError::navigation("printToPDF returned no data"))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| SkillError::navigation(format!("bad PDF payload: {e}")))?;
    let dir = artifact_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| SkillError::navigation(format!("cannot create artifact dir: {e}")))?;
    let path = dir.join(format!("{name}.pdf"));
    std::fs::write(&path, bytes)
        .map_err(|e| SkillError::navigation(format!("cannot write PDF: {e}")))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interceptor_classification() {
        assert_eq!(
            classify_interceptor("div#onetrust-banner.cookie-notice"),
            "cookie banner"
        );
        assert_eq!(classify_interceptor("div.consent-wall"), "consent dialog");
        assert_eq!(classify_interceptor("div.modal-backdrop"), "modal");
        assert_eq!(classify_interceptor("div.page-overlay"), "overlay");
        assert_eq!(classify_interceptor("div.toast-container"), "notification");
        assert_eq!(classify_interceptor("span.whatever"), "element");
    }

    #[test]
    fn truthiness_mirrors_javascript() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn new_tabs_filter_to_pages() {
        // attach_new_tabs drains a channel; simulate with a small buffer.
        let (tx, mut rx) = mpsc::channel(8);
        for (kind, id) in [("page", "T1"), ("service_worker", "SW"), ("page", "T2")] {
            tx.try_send(CdpEvent {
                method: "Target.targetCreated".into(),
                params: json!({ "targetInfo": {
                    "type": kind, "targetId": id, "url": "https://x.test", "title": "t",
                }}),
                session_id: None,
            })
            .unwrap();
        }
        let mut output = json!({});
        attach_new_tabs(&mut output, Some(&mut rx));
        let tabs = output["newTabs"].as_array().unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0]["targetId"], "T1");
        assert_eq!(tabs[1]["targetId"], "T2");
    }

    #[test]
    fn no_new_tabs_leaves_output_untouched() {
        let (_tx, mut rx) = mpsc::channel::<CdpEvent>(1);
        let mut output = json!({});
        attach_new_tabs(&mut output, Some(&mut rx));
        assert!(output.get("newTabs").is_none());
    }
}
