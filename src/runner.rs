use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::actions::{self, POLL_INTERVAL, is_truthy};
use crate::cdp::{CdpEvent, Connector, ConnectorConfig};
use crate::chrome::{
    self, LaunchRequest, close_target, launch_detached, open_target, query_targets, query_version,
};
use crate::console::ConsoleCapture;
use crate::context;
use crate::diff;
use crate::error::SkillError;
use crate::page::{PageController, is_navigation};
use crate::profiles;
use crate::request::{MAX_STEP_TIMEOUT_MS, Request};
use crate::snapshot::{self, CaptureKind, artifact_dir};
use crate::steps::{Action, ConnectTabParams, OpenTabParams, SnapshotParams, Step};
use crate::tabs::{DEFAULT_HOST, DEFAULT_PORT, TabEntry, TabRegistry, registry_path};

/// One live attached tab: connector, page controller, capture plumbing, and
/// the pre-command bracket.
struct TabSession {
    connector: Connector,
    page: PageController,
    console: ConsoleCapture,
    alias: String,
    entry: TabEntry,
    new_tabs: mpsc::Receiver<CdpEvent>,
    /// Internal viewport snapshot taken before the first step.
    pre_yaml: String,
    url_at_start: String,
}

/// Executes one validated request and assembles the response envelope.
pub struct Runner {
    registry: TabRegistry,
    registry_file: PathBuf,
    timeout_ms: u64,
    session: Option<TabSession>,
    step_results: Vec<Value>,
    /// A step reported a cross-document navigation.
    saw_navigation: bool,
    /// Any snapshot was truncated or spilled.
    truncated: bool,
    /// Every executed step was a since-cache hit; the envelope skips the
    /// viewport capture entirely.
    only_since_hits: bool,
}

/// Outcome handed to `main`: the response body and the exit disposition.
pub struct RunOutcome {
    pub response: Value,
    pub ok: bool,
    pub steps_attempted: usize,
}

impl Runner {
    fn new(timeout_ms: u64) -> Result<Self, SkillError> {
        let registry_file = registry_path();
        let registry = TabRegistry::load(&registry_file)?;
        Ok(Self {
            registry,
            registry_file,
            timeout_ms,
            session: None,
            step_results: Vec::new(),
            saw_navigation: false,
            truncated: false,
            only_since_hits: true,
        })
    }

    fn save_registry(&self) -> Result<(), SkillError> {
        self.registry.save(&self.registry_file)?;
        Ok(())
    }

    fn session(&self) -> Result<&TabSession, SkillError> {
        self.session.as_ref().ok_or_else(|| {
            SkillError::step_validation(
                "no active tab; specify \"tab\" or start with openTab/connectTab",
            )
        })
    }

    fn session_mut(&mut self) -> Result<&mut TabSession, SkillError> {
        self.session.as_mut().ok_or_else(|| {
            SkillError::step_validation(
                "no active tab; specify \"tab\" or start with openTab/connectTab",
            )
        })
    }

    /// Connect, attach, prepare domains, begin console capture, and take
    /// the pre-command bracket for a registered tab.
    async fn open_session(&mut self, alias: String, entry: TabEntry) -> Result<(), SkillError> {
        let version = query_version(&entry.host, entry.port)
            .await
            .map_err(|e| SkillError::connection(format!("tab endpoint unreachable: {e}")))?;

        let connector = Connector::connect(&version.ws_debugger_url, ConnectorConfig::default())
            .await
            .map_err(SkillError::from)?;

        // New-tab detection for clicks needs browser-level target events.
        let new_tabs = connector.subscribe("Target.targetCreated");
        let _ = connector
            .send("Target.setDiscoverTargets", Some(json!({ "discover": true })))
            .await;

        let session = connector.attach(&entry.target_id).await.map_err(|e| {
            SkillError::connection(format!(
                "could not attach to tab {alias} ({}): {e}",
                entry.target_id
            ))
        })?;

        let console = ConsoleCapture::begin(&session).await.map_err(SkillError::from)?;
        let page = PageController::new(session);
        page.prepare().await?;
        page.settle().await;

        let pre = snapshot::capture(&page, &SnapshotParams::default(), CaptureKind::Internal, true)
            .await
            .map(|o| o.yaml)
            .unwrap_or_default();
        let (url, _) = page.page_info().await.unwrap_or_default();

        self.session = Some(TabSession {
            connector,
            page,
            console,
            alias,
            entry,
            new_tabs,
            pre_yaml: pre,
            url_at_start: url,
        });
        Ok(())
    }

    /// Make sure a CDP endpoint is listening, auto-launching a dedicated
    /// instance when nothing answers.
    async fn ensure_endpoint(host: &str, port: u16, headless: bool) -> Result<(), SkillError> {
        if query_version(host, port).await.is_ok() {
            return Ok(());
        }
        if host != DEFAULT_HOST && host != "localhost" {
            return Err(SkillError::connection(format!(
                "no browser at {host}:{port} and remote hosts cannot be auto-launched"
            )));
        }
        // A desktop browser running without --remote-debugging-port cannot
        // be adopted; a fresh instance is launched beside it either way.
        launch_detached(&LaunchRequest {
            port,
            headless,
            executable: None,
        })
        .await?;
        query_version(host, port)
            .await
            .map_err(|e| SkillError::connection(format!("browser launched but unreachable: {e}")))?;
        Ok(())
    }

    async fn exec_open_tab(&mut self, params: &OpenTabParams) -> Result<Value, SkillError> {
        let host = params.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = params.port.unwrap_or(DEFAULT_PORT);
        Self::ensure_endpoint(&host, port, params.headless).await?;

        let target = open_target(&host, port, params.url.as_deref()).await?;
        let entry = TabEntry {
            target_id: target.id.clone(),
            host,
            port,
        };
        let alias = self.registry.insert(entry.clone());
        self.save_registry()?;

        self.open_session(alias.clone(), entry).await?;
        if params.url.is_some() {
            self.saw_navigation = true;
            // /json/new returns before the document commits; give the load a
            // moment and let settle absorb the rest.
            if let Ok(session) = self.session() {
                session.page.settle().await;
            }
        }

        Ok(json!({
            "tab": alias,
            "targetId": target.id,
            "url": params.url,
        }))
    }

    async fn exec_connect_tab(&mut self, params: &ConnectTabParams) -> Result<Value, SkillError> {
        let host = params.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = params.port.unwrap_or(DEFAULT_PORT);
        let targets = query_targets(&host, port)
            .await
            .map_err(|e| SkillError::connection(format!("cannot list targets: {e}")))?;

        let target = targets
            .iter()
            .filter(|t| t.target_type == "page")
            .find(|t| {
                params
                    .target_id
                    .as_deref()
                    .is_some_and(|id| t.id == id)
                    || params
                        .url_contains
                        .as_deref()
                        .is_some_and(|needle| t.url.contains(needle))
            })
            .ok_or_else(|| {
                SkillError::step_validation(format!(
                    "no open tab matches {:?}",
                    params
                        .target_id
                        .clone()
                        .or_else(|| params.url_contains.clone())
                        .unwrap_or_default()
                ))
            })?;

        let alias = match self.registry.alias_for_target(&target.id) {
            Some(existing) => existing,
            None => {
                let alias = self.registry.insert(TabEntry {
                    target_id: target.id.clone(),
                    host: host.clone(),
                    port,
                });
                self.save_registry()?;
                alias
            }
        };

        let entry = TabEntry {
            target_id: target.id.clone(),
            host,
            port,
        };
        self.open_session(alias.clone(), entry).await?;

        Ok(json!({
            "tab": alias,
            "targetId": target.id,
            "url": target.url,
            "title": target.title,
        }))
    }

    async fn exec_close_tab(&mut self, alias: Option<&str>) -> Result<Value, SkillError> {
        let (alias, entry) = match alias {
            Some(key) => self
                .registry
                .resolve(key)
                .ok_or_else(|| SkillError::step_validation(format!("unknown tab {key:?}")))?,
            None => {
                let session = self.session()?;
                (session.alias.clone(), session.entry.clone())
            }
        };

        close_target(&entry.host, entry.port, &entry.target_id).await?;
        self.registry.remove(&alias);
        self.save_registry()?;

        // Closing the tab this command is attached to ends the session.
        match self.session.take() {
            Some(session) if session.entry.target_id == entry.target_id => {
                session.connector.close().await;
            }
            other => self.session = other,
        }

        Ok(json!({ "closed": alias }))
    }

    async fn exec_list_tabs(&self) -> Value {
        let mut tabs = Vec::new();
        for (alias, entry) in self.registry.entries() {
            let mut item = json!({
                "tab": alias,
                "targetId": entry.target_id,
                "host": entry.host,
                "port": entry.port,
            });
            if let Ok(targets) = query_targets(&entry.host, entry.port).await {
                if let Some(live) = targets.iter().find(|t| t.id == entry.target_id) {
                    item["url"] = json!(live.url);
                    item["title"] = json!(live.title);
                } else {
                    item["stale"] = json!(true);
                }
            } else {
                item["unreachable"] = json!(true);
            }
            tabs.push(item);
        }
        json!({ "tabs": tabs })
    }

    async fn exec_chrome_status(&self) -> Value {
        let mut endpoints: Vec<(String, u16)> = self
            .registry
            .entries()
            .values()
            .map(|e| (e.host.clone(), e.port))
            .collect();
        endpoints.push((DEFAULT_HOST.to_owned(), DEFAULT_PORT));
        endpoints.sort();
        endpoints.dedup();

        let mut report = Vec::new();
        for (host, port) in endpoints {
            match query_version(&host, port).await {
                Ok(version) => report.push(json!({
                    "host": host,
                    "port": port,
                    "reachable": true,
                    "browser": version.browser,
                })),
                Err(_) => report.push(json!({
                    "host": host,
                    "port": port,
                    "reachable": false,
                })),
            }
        }
        json!({
            "endpoints": report,
            "browserWithoutCdp": chrome::running_browser_lacks_cdp(),
        })
    }

    /// Dispatch one action. Returns `(output, warning)`.
    #[allow(clippy::too_many_lines)]
    async fn execute(
        &mut self,
        action: &Action,
        remaining: Duration,
    ) -> Result<(Value, Option<String>), SkillError> {
        match action {
            Action::OpenTab(params) => Ok((self.exec_open_tab(params).await?, None)),
            Action::ConnectTab(params) => Ok((self.exec_connect_tab(params).await?, None)),
            Action::CloseTab(alias) => {
                Ok((self.exec_close_tab(alias.as_deref()).await?, None))
            }
            Action::ListTabs => Ok((self.exec_list_tabs().await, None)),
            Action::ChromeStatus => Ok((self.exec_chrome_status().await, None)),

            Action::Goto(params) => {
                let session = self.session()?;
                session
                    .page
                    .navigate(&params.url, params.wait_until, remaining)
                    .await?;
                let (url, title) = session.page.page_info().await?;
                self.saw_navigation = true;
                Ok((json!({ "url": url, "title": title }), None))
            }
            Action::Back => {
                let session = self.session()?;
                session.page.history_step(-1, remaining).await?;
                let (url, _) = session.page.page_info().await?;
                self.saw_navigation = true;
                Ok((json!({ "url": url }), None))
            }
            Action::Forward => {
                let session = self.session()?;
                session.page.history_step(1, remaining).await?;
                let (url, _) = session.page.page_info().await?;
                self.saw_navigation = true;
                Ok((json!({ "url": url }), None))
            }
            Action::Reload { ignore_cache } => {
                let session = self.session()?;
                session.page.reload(*ignore_cache, remaining).await?;
                self.saw_navigation = true;
                Ok((json!({ "reloaded": true }), None))
            }

            Action::Snapshot(params) => self.exec_snapshot(params).await,
            Action::Find(params) => {
                let session = self.session()?;
                let result = snapshot::search(&session.page, params).await?;
                Ok((result, None))
            }

            Action::Click(params) => {
                let session = self.session_mut()?;
                let outcome =
                    actions::click(&session.page, params, false, Some(&mut session.new_tabs))
                        .await?;
                if outcome.navigated {
                    self.saw_navigation = true;
                }
                Ok((outcome.output, outcome.warning))
            }
            Action::DoubleClick(params) => {
                let session = self.session_mut()?;
                let outcome =
                    actions::click(&session.page, params, true, Some(&mut session.new_tabs))
                        .await?;
                if outcome.navigated {
                    self.saw_navigation = true;
                }
                Ok((outcome.output, outcome.warning))
            }
            Action::Hover(target) => {
                let session = self.session()?;
                Ok((actions::hover(&session.page, target).await?, None))
            }
            Action::Fill(params) => {
                let session = self.session()?;
                Ok((actions::fill(&session.page, params).await?, None))
            }
            Action::FillForm(params) => {
                let session = self.session()?;
                Ok((actions::fill_form(&session.page, params).await?, None))
            }
            Action::Select(params) => {
                let session = self.session()?;
                Ok((actions::select(&session.page, params).await?, None))
            }
            Action::Type(params) => {
                let session = self.session()?;
                Ok((actions::type_text(&session.page, params).await?, None))
            }
            Action::Press(params) => {
                let session = self.session()?;
                Ok((actions::press(&session.page, params).await?, None))
            }
            Action::Scroll(params) => {
                let session = self.session()?;
                Ok((actions::scroll(&session.page, params).await?, None))
            }
            Action::Evaluate(expression) => {
                let session = self.session()?;
                let value = session
                    .page
                    .eval_with_timeout(expression, Some(remaining))
                    .await?;
                Ok((json!({ "value": value }), None))
            }
            Action::WaitFor(params) => {
                let session = self.session()?;
                Ok((actions::wait_for(&session.page, params, remaining).await?, None))
            }

            Action::Screenshot(params) => {
                let session = self.session()?;
                let path =
                    actions::screenshot(&session.page, &session.alias, params.full_page).await?;
                Ok((json!({ "file": path }), None))
            }
            Action::Pdf(params) => {
                let session = self.session()?;
                let path = actions::pdf(
                    &session.page,
                    &session.alias,
                    params.landscape,
                    params.scale,
                )
                .await?;
                Ok((json!({ "file": path }), None))
            }

            Action::SetViewport(params) => {
                let session = self.session()?;
                Ok((session.page.set_viewport(params).await?, None))
            }
            Action::SetGeolocation(params) => {
                let session = self.session()?;
                session
                    .page
                    .set_geolocation(params.latitude, params.longitude, params.accuracy)
                    .await?;
                Ok((
                    json!({ "latitude": params.latitude, "longitude": params.longitude }),
                    None,
                ))
            }
            Action::Frame(selector) => {
                let session = self.session_mut()?;
                let output = session.page.switch_frame(selector).await?;
                let warning = session.page.warnings.pop();
                Ok((output, warning))
            }

            Action::ReadSiteProfile(domain) => {
                let domain = match domain {
                    Some(d) => profiles::normalize_domain(d),
                    None => self.current_domain().await?,
                };
                match profiles::read(&domain)? {
                    Some(content) => Ok((
                        json!({ "found": true, "domain": domain, "content": content }),
                        None,
                    )),
                    None => Ok((json!({ "found": false, "domain": domain }), None)),
                }
            }
            Action::WriteSiteProfile(params) => {
                let domain = match &params.domain {
                    Some(d) => profiles::normalize_domain(d),
                    None => self.current_domain().await?,
                };
                let written = profiles::write(&domain, &params.content)?;
                Ok((json!({ "written": written, "domain": domain }), None))
            }
        }
    }

    async fn current_domain(&self) -> Result<String, SkillError> {
        let session = self.session()?;
        let (url, _) = session.page.page_info().await?;
        profiles::domain_of_url(&url).ok_or_else(|| {
            SkillError::step_validation(format!("current URL {url:?} has no domain"))
        })
    }

    async fn exec_snapshot(
        &mut self,
        params: &SnapshotParams,
    ) -> Result<(Value, Option<String>), SkillError> {
        let inline_limit = params.max_bytes.unwrap_or(snapshot::INLINE_LIMIT_BYTES);
        let session = self.session()?;
        let outcome =
            snapshot::capture(&session.page, params, CaptureKind::Agent, false).await?;

        if outcome.unchanged {
            return Ok((
                json!({ "unchanged": true, "snapshotId": outcome.snapshot_id }),
                None,
            ));
        }

        let mut output = json!({
            "snapshotId": outcome.snapshot_id,
            "refCount": outcome.ref_count,
        });
        if snapshot::needs_spill(&outcome.yaml, outcome.ref_count, inline_limit) {
            let stem = format!("{}.snapshot", session.alias);
            let path = snapshot::spill(&artifact_dir(), &stem, &outcome.yaml)?;
            output["file"] = json!(path);
            output["truncatedInline"] = json!(true);
            self.truncated = true;
        } else {
            output["yaml"] = json!(outcome.yaml);
        }
        if outcome.truncated {
            output["truncated"] = json!(true);
            self.truncated = true;
        }
        Ok((output, None))
    }

    /// Run one step through its full lifecycle and record the result.
    /// Returns whether execution should continue.
    async fn run_step(&mut self, step: &Step) -> bool {
        let name = step.action.name();
        let budget = step
            .timeout_ms
            .unwrap_or(self.timeout_ms)
            .min(MAX_STEP_TIMEOUT_MS);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget);

        let mut result = json!({ "action": name });
        let mut warning: Option<String> = None;

        let outcome = self
            .step_lifecycle(step, deadline, &mut warning)
            .await;

        match outcome {
            Ok(output) => {
                if output["unchanged"].as_bool() != Some(true) {
                    self.only_since_hits = false;
                }
                result["status"] = json!("ok");
                if !output.is_null() {
                    result["output"] = output;
                }
                if let Some(warning) = warning {
                    result["warning"] = json!(warning);
                }
                // observe runs after a successful action.
                if let Some(observe) = &step.observe {
                    if let Ok(session) = self.session() {
                        if let Ok(value) = session.page.eval(observe).await {
                            result["observation"] = value;
                        }
                    }
                }
                self.step_results.push(result);
                true
            }
            Err(error) => {
                self.only_since_hits = false;
                let halting = !step.optional;
                result["status"] = json!(if step.optional { "skipped" } else { "error" });
                result["error"] = json!({
                    "type": error.type_name(),
                    "message": error.message,
                });
                if let Some(warning) = warning {
                    result["warning"] = json!(warning);
                }
                // Failure diagnostics are best-effort and never replace the
                // primary error.
                if halting {
                    if let Ok(session) = self.session() {
                        let term = step_search_term(&step.action);
                        if let Some(ctx) =
                            context::capture_failure(&session.page, term.as_deref()).await
                        {
                            result["context"] = ctx;
                        }
                    }
                }
                self.step_results.push(result);
                !halting
            }
        }
    }

    /// readyWhen → action → settledWhen, bounded by the step deadline.
    async fn step_lifecycle(
        &mut self,
        step: &Step,
        deadline: tokio::time::Instant,
        warning: &mut Option<String>,
    ) -> Result<Value, SkillError> {
        if let Some(predicate) = &step.ready_when {
            let session = self.session()?;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            actions::wait_for_predicate(&session.page, predicate, remaining)
                .await
                .map_err(|e| {
                    SkillError::timeout(format!("readyWhen never became truthy: {}", e.message))
                })?;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SkillError::timeout("step timed out before its action ran"));
        }
        let (output, action_warning) =
            match tokio::time::timeout(remaining, self.execute(&step.action, remaining)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SkillError::timeout(format!(
                        "step {} exceeded its {}ms budget",
                        step.action.name(),
                        step.timeout_ms.unwrap_or(self.timeout_ms),
                    )));
                }
            };
        *warning = action_warning;

        if let Some(predicate) = &step.settled_when {
            if let Ok(session) = self.session() {
                let started = tokio::time::Instant::now();
                let mut last;
                let settled = loop {
                    last = session.page.eval(predicate).await.unwrap_or(Value::Null);
                    if is_truthy(&last) {
                        break true;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        break false;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                };
                if !settled {
                    // Soft timeout: annotate, never fail.
                    let elapsed = started.elapsed().as_millis();
                    let note = format!(
                        "settledWhen still falsy after {elapsed}ms (last value: {last})"
                    );
                    *warning = Some(match warning.take() {
                        Some(existing) => format!("{existing}; {note}"),
                        None => note,
                    });
                }
            }
        }

        Ok(output)
    }

    /// Post-command envelope: screenshot, snapshots, context, diff,
    /// navigation detection, site profile, console summary.
    async fn finish(mut self, ok: bool) -> Value {
        let mut response = json!({
            "status": if ok { "ok" } else { "error" },
        });

        let actions: Vec<&str> = self
            .step_results
            .iter()
            .filter_map(|s| s["action"].as_str())
            .collect();

        if let Some(session) = &mut self.session {
            response["tab"] = json!(session.alias);

            let screenshot_name = format!("{}.after", session.alias);
            if let Ok(path) =
                actions::screenshot(&session.page, &screenshot_name, false).await
            {
                response["screenshot"] = json!(path);
            }

            // Full-page snapshot always goes to disk.
            if let Ok(full) = snapshot::capture(
                &session.page,
                &SnapshotParams::default(),
                CaptureKind::Internal,
                false,
            )
            .await
            {
                let stem = format!("{}.after", session.alias);
                if let Ok(path) = snapshot::spill(&artifact_dir(), &stem, &full.yaml) {
                    response["fullSnapshot"] = json!(path);
                }
                if full.truncated {
                    self.truncated = true;
                }
            }

            let mut post_yaml = String::new();
            if !self.only_since_hits {
                if let Ok(viewport) = snapshot::capture(
                    &session.page,
                    &SnapshotParams::default(),
                    CaptureKind::Internal,
                    true,
                )
                .await
                {
                    post_yaml = viewport.yaml;
                    response["viewportSnapshot"] = json!(post_yaml);
                }
            }

            if let Some(ctx) = context::capture(&session.page).await {
                response["context"] = ctx;
            }

            let route_changes = session.page.drain_route_changes().await;
            let (url_after, _) = session.page.page_info().await.unwrap_or_default();
            let navigated = self.saw_navigation
                || !route_changes.is_empty()
                || is_navigation(&session.url_at_start, &url_after);

            if navigated {
                response["navigated"] = json!(true);
                // Surface per-domain knowledge on every navigation.
                if let Some(domain) = profiles::domain_of_url(&url_after) {
                    match profiles::read(&domain) {
                        Ok(Some(content)) => {
                            response["siteProfile"] = json!(content);
                        }
                        Ok(None) => {
                            response["actionRequired"] = json!({
                                "type": "recordSiteProfile",
                                "domain": domain,
                                "reason": "no site profile stored for this domain; \
                                           write one with writeSiteProfile when done",
                            });
                        }
                        Err(_) => {}
                    }
                }
            } else if !self.only_since_hits {
                if let Some(changes) =
                    diff::compute(&session.pre_yaml, &post_yaml, &actions)
                {
                    response["changes"] = json!(changes);
                }
            }

            let console = session.console.summarize().await;
            if !console.is_empty() {
                response["console"] = json!(console);
            }
        }

        if self.truncated {
            response["truncated"] = json!(true);
        }

        if !ok {
            let errors: Vec<Value> = self
                .step_results
                .iter()
                .enumerate()
                .filter(|(_, s)| s["status"] == "error")
                .map(|(i, s)| {
                    let mut e = s["error"].clone();
                    e["step"] = json!(i);
                    e
                })
                .collect();
            response["errors"] = json!(errors);
        }

        response["steps"] = json!(self.step_results);

        if let Some(session) = self.session.take() {
            session.connector.close().await;
        }

        crate::output::strip_empty(response)
    }
}

/// Search term for near-match scoring, when the failed action targeted
/// something findable by text.
fn step_search_term(action: &Action) -> Option<String> {
    let target = match action {
        Action::Click(p) | Action::DoubleClick(p) => Some(&p.target),
        Action::Hover(t) => Some(t),
        Action::Fill(p) => p.target.as_ref(),
        Action::Select(p) => Some(&p.target),
        Action::Scroll(crate::steps::ScrollParams::ToTarget(t)) => Some(t),
        _ => None,
    };
    target.and_then(|t| t.search_term().map(ToOwned::to_owned))
}

/// Run a full request: session setup, the step loop with stop-on-error,
/// and the response envelope.
pub async fn run(request: Request) -> RunOutcome {
    let mut runner = match Runner::new(request.timeout_ms) {
        Ok(runner) => runner,
        Err(e) => {
            return RunOutcome {
                response: e.to_envelope(),
                ok: false,
                steps_attempted: 0,
            };
        }
    };

    // Resolve the target tab up front unless the program opens its own.
    if let Some(tab_key) = &request.tab {
        let Some((alias, entry)) = runner.registry.resolve(tab_key) else {
            let err = SkillError::validation(format!(
                "unknown tab {tab_key:?}; use openTab or connectTab first"
            ));
            return RunOutcome {
                response: err.to_envelope(),
                ok: false,
                steps_attempted: 0,
            };
        };
        if let Err(e) = runner.open_session(alias, entry).await {
            return RunOutcome {
                response: e.to_envelope(),
                ok: false,
                steps_attempted: 0,
            };
        }
    } else if !request.steps[0].action.is_registry_free() {
        let err = SkillError::validation(
            "\"tab\" is required unless the program starts with openTab, connectTab, \
             closeTab, or chromeStatus",
        );
        return RunOutcome {
            response: err.to_envelope(),
            ok: false,
            steps_attempted: 0,
        };
    }

    let mut ok = true;
    for step in &request.steps {
        let keep_going = runner.run_step(step).await;
        if !keep_going {
            ok = false;
            break;
        }
    }

    let steps_attempted = runner.step_results.len();
    let response = runner.finish(ok).await;
    RunOutcome {
        response,
        ok,
        steps_attempted,
    }
}
