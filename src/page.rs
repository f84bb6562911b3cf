use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::cdp::{CdpEvent, Session};
use crate::devices;
use crate::error::{ExecKind, SkillError};
use crate::steps::{FrameSelector, ViewportParams, WaitUntil};

/// Strict network idle: a 500ms window with zero in-flight requests,
/// enforced with a hard timeout.
const IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Network settle: best-effort, a 300ms quiet window within a 2s budget.
const SETTLE_WINDOW: Duration = Duration::from_millis(300);
const SETTLE_BUDGET: Duration = Duration::from_secs(2);

/// Resource types that stay open for the lifetime of the page and must not
/// count as in-flight traffic.
const LONG_LIVED_TYPES: &[&str] = &["WebSocket", "EventSource"];

/// URL shapes for analytics heartbeats and push channels that never settle.
fn long_lived_urls() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in [
        "*google-analytics.com*",
        "*analytics*collect*",
        "*/beacon*",
        "*/heartbeat*",
        "*/sse*",
        "*/socket.io/*",
        "*hotjar.com*",
        "*segment.io*",
        "*doubleclick.net*",
    ] {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Whether a request should be excluded from in-flight counting.
fn is_long_lived(resource_type: &str, url: &str, exclusions: &GlobSet) -> bool {
    LONG_LIVED_TYPES.contains(&resource_type) || exclusions.is_match(url)
}

/// The request/finished/failed event streams driving in-flight tracking.
type NetworkEvents = (
    mpsc::Receiver<CdpEvent>,
    mpsc::Receiver<CdpEvent>,
    mpsc::Receiver<CdpEvent>,
);

/// Per-invocation page controller: evaluation routing for the current
/// frame, navigation, waiting, and emulation overrides.
pub struct PageController {
    session: Session,
    /// Execution context of the current frame; `None` targets the main frame.
    context_id: Option<i64>,
    exclusions: GlobSet,
    /// Warnings accumulated by frame switching and settle timeouts.
    pub warnings: Vec<String>,
}

impl PageController {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            context_id: None,
            exclusions: long_lived_urls(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Enable the CDP domains every command relies on and install the SPA
    /// route instrumentation.
    ///
    /// # Errors
    ///
    /// Propagates CDP failures from the enable calls.
    pub async fn prepare(&self) -> Result<(), SkillError> {
        self.session.send("Page.enable", None).await?;
        self.session.send("DOM.enable", None).await?;
        self.session.send("Network.enable", None).await?;
        // Viewport starts clean each invocation.
        let _ = self
            .session
            .send("Emulation.clearDeviceMetricsOverride", None)
            .await;
        self.install_route_tracker().await;
        Ok(())
    }

    /// Wrap `history.pushState`/`replaceState` so client-side route changes
    /// are observable; runs now and on every new document.
    async fn install_route_tracker(&self) {
        const TRACKER: &str = r"(function(){
if (window.__cdpSkillRoutes) return;
window.__cdpSkillRoutes = [];
var push = history.pushState, replace = history.replaceState;
history.pushState = function(){ var r = push.apply(this, arguments);
  window.__cdpSkillRoutes.push(location.href); return r; };
history.replaceState = function(){ var r = replace.apply(this, arguments);
  window.__cdpSkillRoutes.push(location.href); return r; };
window.addEventListener('popstate', function(){
  window.__cdpSkillRoutes.push(location.href); });
})();";
        let _ = self
            .session
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                Some(json!({ "source": TRACKER })),
            )
            .await;
        let _ = self
            .session
            .send("Runtime.evaluate", Some(json!({ "expression": TRACKER })))
            .await;
    }

    /// Evaluate an expression in the current frame context, returning the
    /// unwrapped value.
    ///
    /// # Errors
    ///
    /// CDP errors are classified (context destroyed, stale node); page-side
    /// exceptions surface as `NavigationError` text.
    pub async fn eval(&self, expression: &str) -> Result<Value, SkillError> {
        self.eval_with_timeout(expression, None).await
    }

    /// Evaluate with an explicit command deadline.
    ///
    /// # Errors
    ///
    /// Same as [`eval`](Self::eval).
    pub async fn eval_with_timeout(
        &self,
        expression: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, SkillError> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": true,
            "awaitPromise": true,
        });
        if let Some(ctx) = self.context_id {
            params["contextId"] = json!(ctx);
        }
        let result = match timeout {
            Some(t) => {
                self.session
                    .send_with_timeout("Runtime.evaluate", Some(params), t)
                    .await?
            }
            None => self.session.send("Runtime.evaluate", Some(params)).await?,
        };
        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("JavaScript exception");
            return Err(SkillError::execution(
                ExecKind::Navigation,
                format!("page script failed: {text}"),
            ));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Evaluate an expression and keep the result as a remote object,
    /// returning its objectId (used to act on resolved elements).
    ///
    /// # Errors
    ///
    /// Same classification as [`eval`](Self::eval); missing objectId means
    /// the expression produced no object.
    pub async fn eval_to_object(&self, expression: &str) -> Result<Option<String>, SkillError> {
        let mut params = json!({ "expression": expression, "returnByValue": false });
        if let Some(ctx) = self.context_id {
            params["contextId"] = json!(ctx);
        }
        let result = self.session.send("Runtime.evaluate", Some(params)).await?;
        Ok(result["result"]["objectId"].as_str().map(ToOwned::to_owned))
    }

    /// Current URL and title.
    ///
    /// # Errors
    ///
    /// Propagates evaluation failures.
    pub async fn page_info(&self) -> Result<(String, String), SkillError> {
        let value = self
            .eval("JSON.stringify({url: location.href, title: document.title})")
            .await?;
        let parsed: Value =
            serde_json::from_str(value.as_str().unwrap_or("{}")).unwrap_or_default();
        Ok((
            parsed["url"].as_str().unwrap_or_default().to_owned(),
            parsed["title"].as_str().unwrap_or_default().to_owned(),
        ))
    }

    /// Navigate with the requested wait condition. Same-origin hash-only
    /// targets skip the full navigation and assign `location.hash`.
    ///
    /// # Errors
    ///
    /// `NavigationError` for load failures, `NavigationAbortedError` when
    /// the navigation is superseded, `TimeoutError` when the wait condition
    /// never fires.
    pub async fn navigate(
        &self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<(), SkillError> {
        let (current_url, _) = self.page_info().await.unwrap_or_default();
        if let Some(fragment) = hash_only_target(&current_url, url) {
            self.eval(&format!(
                "location.hash = {};",
                serde_json::to_string(&fragment).unwrap_or_else(|_| "''".into())
            ))
            .await?;
            self.settle().await;
            return Ok(());
        }

        let load_rx = self.session.subscribe("Page.loadEventFired");
        let dom_rx = self.session.subscribe("Page.domContentEventFired");
        let net_subs = if wait == WaitUntil::NetworkIdle {
            Some(self.network_subscriptions())
        } else {
            None
        };

        let result = self
            .session
            .send("Page.navigate", Some(json!({ "url": url })))
            .await?;
        if let Some(error_text) = result["errorText"].as_str() {
            if !error_text.is_empty() {
                let kind = if error_text.contains("ERR_ABORTED") {
                    ExecKind::NavigationAborted
                } else {
                    ExecKind::Navigation
                };
                return Err(SkillError::execution(
                    kind,
                    format!("navigation to {url} failed: {error_text}"),
                ));
            }
        }

        match wait {
            WaitUntil::Commit => {}
            WaitUntil::Load => wait_for_event(load_rx, timeout, "load").await?,
            WaitUntil::DomContentLoaded => {
                wait_for_event(dom_rx, timeout, "DOMContentLoaded").await?;
            }
            WaitUntil::NetworkIdle => {
                if let Some(subs) = net_subs {
                    self.wait_network_idle(subs, timeout).await?;
                }
            }
        }

        self.settle().await;
        Ok(())
    }

    /// History traversal: `delta` of -1 for back, +1 for forward.
    ///
    /// # Errors
    ///
    /// `NavigationError` at either end of history; CDP errors otherwise.
    pub async fn history_step(&self, delta: i64, timeout: Duration) -> Result<(), SkillError> {
        let history = self.session.send("Page.getNavigationHistory", None).await?;
        let current = history["currentIndex"].as_i64().unwrap_or(0);
        let entries = history["entries"]
            .as_array()
            .ok_or_else(|| SkillError::navigation("bad navigation history response"))?;
        let target = current + delta;
        if target < 0 {
            return Err(SkillError::navigation("already at the beginning of history"));
        }
        let Some(entry) = usize::try_from(target).ok().and_then(|i| entries.get(i)) else {
            return Err(SkillError::navigation("already at the end of history"));
        };
        let entry_id = entry["id"].as_i64().unwrap_or(0);

        let nav_rx = self.session.subscribe("Page.frameNavigated");
        self.session
            .send(
                "Page.navigateToHistoryEntry",
                Some(json!({ "entryId": entry_id })),
            )
            .await?;
        wait_for_event(nav_rx, timeout, "history navigation").await?;
        self.settle().await;
        Ok(())
    }

    /// Reload the current page and wait for load.
    ///
    /// # Errors
    ///
    /// `TimeoutError` when load never fires.
    pub async fn reload(&self, ignore_cache: bool, timeout: Duration) -> Result<(), SkillError> {
        let load_rx = self.session.subscribe("Page.loadEventFired");
        self.session
            .send("Page.reload", Some(json!({ "ignoreCache": ignore_cache })))
            .await?;
        wait_for_event(load_rx, timeout, "load").await?;
        self.settle().await;
        Ok(())
    }

    fn network_subscriptions(&self) -> NetworkEvents {
        (
            self.session.subscribe("Network.requestWillBeSent"),
            self.session.subscribe("Network.loadingFinished"),
            self.session.subscribe("Network.loadingFailed"),
        )
    }

    /// Strict network idle: error on timeout. Only used by the explicit
    /// `networkidle` wait condition.
    async fn wait_network_idle(
        &self,
        subs: NetworkEvents,
        timeout: Duration,
    ) -> Result<(), SkillError> {
        let reached = track_quiet_window(subs, IDLE_WINDOW, timeout, &self.exclusions).await;
        if reached {
            Ok(())
        } else {
            Err(SkillError::timeout(format!(
                "network did not go idle within {}ms",
                timeout.as_millis()
            )))
        }
    }

    /// Best-effort settle after navigations and before snapshots. Never
    /// errors and never blocks past its small budget; long-lived
    /// connections are excluded from the in-flight count.
    pub async fn settle(&self) {
        let subs = self.network_subscriptions();
        let _ = track_quiet_window(subs, SETTLE_WINDOW, SETTLE_BUDGET, &self.exclusions).await;
    }

    /// Route changes recorded by the SPA tracker since the last drain.
    pub async fn drain_route_changes(&self) -> Vec<String> {
        let value = self
            .eval("JSON.stringify((window.__cdpSkillRoutes || []).splice(0))")
            .await
            .unwrap_or(Value::Null);
        value
            .as_str()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default()
    }

    /// Apply a viewport override (named device or custom metrics).
    ///
    /// # Errors
    ///
    /// `StepValidationError` for unknown device names; CDP errors otherwise.
    pub async fn set_viewport(&self, params: &ViewportParams) -> Result<Value, SkillError> {
        let (width, height, scale, mobile, label) = match params {
            ViewportParams::Device(name) => {
                let device = devices::find(name).ok_or_else(|| {
                    SkillError::step_validation(format!(
                        "unknown device {name:?}; known devices include {}",
                        devices::known_names()[..8].join(", ")
                    ))
                })?;
                (
                    device.width,
                    device.height,
                    device.device_scale_factor,
                    device.mobile,
                    Some(device.name),
                )
            }
            ViewportParams::Custom {
                width,
                height,
                device_scale_factor,
                mobile,
            } => (*width, *height, *device_scale_factor, *mobile, None),
        };
        self.session
            .send(
                "Emulation.setDeviceMetricsOverride",
                Some(json!({
                    "width": width,
                    "height": height,
                    "deviceScaleFactor": scale,
                    "mobile": mobile,
                })),
            )
            .await?;
        let mut output = json!({ "width": width, "height": height, "mobile": mobile });
        if let Some(name) = label {
            output["device"] = json!(name);
        }
        Ok(output)
    }

    /// Apply a geolocation override.
    ///
    /// # Errors
    ///
    /// Propagates CDP failures.
    pub async fn set_geolocation(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    ) -> Result<(), SkillError> {
        self.session
            .send(
                "Emulation.setGeolocationOverride",
                Some(json!({
                    "latitude": latitude,
                    "longitude": longitude,
                    "accuracy": accuracy,
                })),
            )
            .await?;
        Ok(())
    }

    /// Enumerate the frame tree as `(frameId, url, name, crossOrigin)`.
    ///
    /// # Errors
    ///
    /// Propagates CDP failures.
    pub async fn frames(&self) -> Result<Vec<FrameInfo>, SkillError> {
        let tree = self.session.send("Page.getFrameTree", None).await?;
        let mut frames = Vec::new();
        let main_origin = origin_of(
            tree["frameTree"]["frame"]["url"].as_str().unwrap_or_default(),
        );
        collect_frames(&tree["frameTree"], &main_origin, &mut frames);
        Ok(frames)
    }

    /// Switch the evaluation context to a frame. Cross-origin frames get an
    /// isolated world and a warning.
    ///
    /// # Errors
    ///
    /// `ElementNotFoundError` when the frame cannot be resolved.
    pub async fn switch_frame(&mut self, selector: &FrameSelector) -> Result<Value, SkillError> {
        let frames = self.frames().await?;
        let frame = match selector {
            FrameSelector::Index(index) => frames.get(*index).ok_or_else(|| {
                SkillError::element_not_found(&format!(
                    "frame index {index} (page has {} frames)",
                    frames.len()
                ))
            })?,
            FrameSelector::Name(name) => frames
                .iter()
                .find(|f| f.name.as_deref() == Some(name))
                .ok_or_else(|| SkillError::element_not_found(&format!("frame name {name:?}")))?,
            FrameSelector::FrameId(id) => frames
                .iter()
                .find(|f| &f.frame_id == id)
                .ok_or_else(|| SkillError::element_not_found(&format!("frameId {id}")))?,
            FrameSelector::Selector(css) => {
                let frame_url = self
                    .eval(&format!(
                        "(function(){{ var el = document.querySelector({sel}); \
                         return el && el.src ? el.src : null; }})()",
                        sel = serde_json::to_string(css).unwrap_or_default()
                    ))
                    .await?;
                let url = frame_url
                    .as_str()
                    .ok_or_else(|| SkillError::element_not_found(css))?
                    .to_owned();
                frames
                    .iter()
                    .find(|f| f.url == url || url.starts_with(&f.url))
                    .ok_or_else(|| SkillError::element_not_found(css))?
            }
        };

        let mut output = json!({ "frameId": frame.frame_id, "url": frame.url });
        if frame.cross_origin {
            let world_name = format!("cdp-skill-{}", uuid::Uuid::new_v4());
            let world = self
                .session
                .send(
                    "Page.createIsolatedWorld",
                    Some(json!({
                        "frameId": frame.frame_id,
                        "worldName": world_name,
                    })),
                )
                .await?;
            let context_id = world["executionContextId"].as_i64().ok_or_else(|| {
                SkillError::navigation("createIsolatedWorld returned no context id")
            })?;
            self.context_id = Some(context_id);
            let warning = format!(
                "frame {} is cross-origin; using an isolated world (page variables not visible)",
                frame.frame_id
            );
            self.warnings.push(warning.clone());
            output["crossOrigin"] = json!(true);
            output["warning"] = json!(warning);
        } else {
            // Same-origin frames evaluate through the frame's own context.
            let world = self
                .session
                .send(
                    "Page.createIsolatedWorld",
                    Some(json!({
                        "frameId": frame.frame_id,
                        "worldName": format!("cdp-skill-{}", uuid::Uuid::new_v4()),
                        "grantUniveralAccess": true,
                    })),
                )
                .await?;
            if let Some(context_id) = world["executionContextId"].as_i64() {
                self.context_id = Some(context_id);
            }
        }
        Ok(output)
    }
}

/// One frame in the page, with cross-origin detection relative to the
/// main frame.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub frame_id: String,
    pub url: String,
    pub name: Option<String>,
    pub cross_origin: bool,
}

fn collect_frames(node: &Value, main_origin: &str, out: &mut Vec<FrameInfo>) {
    let frame = &node["frame"];
    let url = frame["url"].as_str().unwrap_or_default().to_owned();
    out.push(FrameInfo {
        frame_id: frame["id"].as_str().unwrap_or_default().to_owned(),
        cross_origin: !url.is_empty() && origin_of(&url) != main_origin,
        name: frame["name"].as_str().map(ToOwned::to_owned),
        url,
    });
    if let Some(children) = node["childFrames"].as_array() {
        for child in children {
            collect_frames(child, main_origin, out);
        }
    }
}

fn origin_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_default()
}

/// When `to` differs from `from` only by fragment, return the new fragment.
fn hash_only_target(from: &str, to: &str) -> Option<String> {
    let from_parsed = url::Url::parse(from).ok()?;
    let to_parsed = url::Url::parse(to).ok()?;
    let same = from_parsed.origin() == to_parsed.origin()
        && from_parsed.path() == to_parsed.path()
        && from_parsed.query() == to_parsed.query();
    if same {
        to_parsed.fragment().map(ToOwned::to_owned)
    } else {
        None
    }
}

/// Navigation detection: origin + pathname + search changed (fragment-only
/// moves are not navigation).
#[must_use]
pub fn is_navigation(before: &str, after: &str) -> bool {
    let (Ok(a), Ok(b)) = (url::Url::parse(before), url::Url::parse(after)) else {
        return before != after;
    };
    a.origin() != b.origin() || a.path() != b.path() || a.query() != b.query()
}

async fn wait_for_event(
    mut rx: mpsc::Receiver<CdpEvent>,
    timeout: Duration,
    what: &str,
) -> Result<(), SkillError> {
    tokio::select! {
        event = rx.recv() => match event {
            Some(_) => Ok(()),
            None => Err(SkillError::navigation(format!(
                "event stream closed while waiting for {what}"
            ))),
        },
        () = tokio::time::sleep(timeout) => Err(SkillError::timeout(format!(
            "timed out after {}ms waiting for {what}",
            timeout.as_millis()
        ))),
    }
}

/// Drive the in-flight counter from the three network event streams until a
/// quiet window of `window` is observed or `budget` elapses. Returns whether
/// the quiet window was reached.
async fn track_quiet_window(
    subs: NetworkEvents,
    window: Duration,
    budget: Duration,
    exclusions: &GlobSet,
) -> bool {
    let (mut req_rx, mut fin_rx, mut fail_rx) = subs;
    let deadline = tokio::time::Instant::now() + budget;
    let mut in_flight: i64 = 0;
    let quiet = tokio::time::sleep(window);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            event = req_rx.recv() => {
                if let Some(event) = event {
                    let resource_type = event.params["type"].as_str().unwrap_or_default();
                    let url = event.params["request"]["url"].as_str().unwrap_or_default();
                    if !is_long_lived(resource_type, url, exclusions) {
                        in_flight += 1;
                        quiet.as_mut().reset(tokio::time::Instant::now() + window);
                    }
                }
            }
            event = fin_rx.recv() => {
                if event.is_some() {
                    in_flight = (in_flight - 1).max(0);
                    if in_flight == 0 {
                        quiet.as_mut().reset(tokio::time::Instant::now() + window);
                    }
                }
            }
            event = fail_rx.recv() => {
                if event.is_some() {
                    in_flight = (in_flight - 1).max(0);
                    if in_flight == 0 {
                        quiet.as_mut().reset(tokio::time::Instant::now() + window);
                    }
                }
            }
            () = &mut quiet => {
                if in_flight == 0 {
                    return true;
                }
                quiet.as_mut().reset(tokio::time::Instant::now() + window);
            }
            () = tokio::time::sleep_until(deadline) => {
                return false;
            }
        }
    }
}
