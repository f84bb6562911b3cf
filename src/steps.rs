use serde_json::{Map, Value};

use crate::error::SkillError;

/// Everything a step may target: CSS selector, versioned ref, visible text,
/// viewport coordinates, or a list of selectors tried in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Selector(String),
    Ref(String),
    Text(String),
    Coords { x: f64, y: f64 },
    Multi(Vec<String>),
}

impl Target {
    /// Human-readable form for error messages and diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Selector(s) | Self::Ref(s) => s.clone(),
            Self::Text(t) => format!("text={t:?}"),
            Self::Coords { x, y } => format!("({x}, {y})"),
            Self::Multi(list) => list.join(", "),
        }
    }

    /// The raw search argument for near-match scoring, when one exists.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        match self {
            Self::Selector(s) | Self::Ref(s) => Some(s),
            Self::Text(t) => Some(t),
            Self::Coords { .. } | Self::Multi(_) => None,
        }
    }
}

/// `s{N}e{M}` — an accessibility ref.
#[must_use]
pub fn is_ref(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('s') else {
        return false;
    };
    let Some(split) = rest.find('e') else {
        return false;
    };
    let (gen_part, elem_part) = rest.split_at(split);
    let elem_part = &elem_part[1..];
    !gen_part.is_empty()
        && !elem_part.is_empty()
        && gen_part.bytes().all(|b| b.is_ascii_digit())
        && elem_part.bytes().all(|b| b.is_ascii_digit())
}

/// Classify a bare string target: refs route to ref resolution, everything
/// else is a trimmed CSS selector.
fn string_target(raw: &str) -> Target {
    let trimmed = raw.trim();
    if is_ref(trimmed) {
        Target::Ref(trimmed.to_owned())
    } else {
        Target::Selector(trimmed.to_owned())
    }
}

fn parse_target(action: &str, value: &Value) -> Result<Target, SkillError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(string_target(s)),
        Value::Array(items) => {
            let selectors: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(|s| s.trim().to_owned()))
                .collect();
            match selectors {
                Some(list) if !list.is_empty() => Ok(Target::Multi(list)),
                _ => Err(SkillError::validation(format!(
                    "{action}: selector array must contain non-empty strings"
                ))),
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                return Ok(Target::Text(text.to_owned()));
            }
            if let Some(selector) = map.get("selector").and_then(Value::as_str) {
                return Ok(string_target(selector));
            }
            if let Some(reference) = map.get("ref").and_then(Value::as_str) {
                return Ok(Target::Ref(reference.trim().to_owned()));
            }
            if let (Some(x), Some(y)) = (
                map.get("x").and_then(Value::as_f64),
                map.get("y").and_then(Value::as_f64),
            ) {
                return Ok(Target::Coords { x, y });
            }
            Err(SkillError::validation(format!(
                "{action}: expected text, selector, ref, or x/y coordinates"
            )))
        }
        _ => Err(SkillError::validation(format!(
            "{action}: invalid target {value}"
        ))),
    }
}

/// Navigation wait conditions for `goto`/`openTab`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    Commit,
    DomContentLoaded,
    #[default]
    Load,
    NetworkIdle,
}

impl WaitUntil {
    fn parse(raw: &str) -> Result<Self, SkillError> {
        match raw {
            "commit" => Ok(Self::Commit),
            "domcontentloaded" | "DOMContentLoaded" => Ok(Self::DomContentLoaded),
            "load" => Ok(Self::Load),
            "networkidle" => Ok(Self::NetworkIdle),
            other => Err(SkillError::validation(format!(
                "unknown waitUntil {other:?}; use commit, domcontentloaded, load, or networkidle"
            ))),
        }
    }
}

/// Snapshot detail levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Detail {
    Summary,
    Interactive,
    #[default]
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotParams {
    pub root: Option<String>,
    pub detail: Detail,
    /// `since: "sN"` enables the change-hash cache.
    pub since: Option<String>,
    pub preserve_refs: bool,
    pub pierce_shadow: bool,
    pub include_frames: bool,
    pub max_bytes: Option<usize>,
}

/// Match modes for snapshot search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Substring,
    Word,
    Exact,
}

#[derive(Debug, Clone, Default)]
pub struct FindParams {
    pub text: Option<String>,
    pub pattern: Option<String>,
    pub role: Option<String>,
    pub near: Option<(f64, f64, f64)>,
    pub match_mode: MatchMode,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct ClickParams {
    pub target: Target,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct FillParams {
    pub target: Option<Target>,
    /// Label-chain lookup when no direct target is given.
    pub label: Option<String>,
    pub value: String,
    pub clear: bool,
    pub react: bool,
}

#[derive(Debug, Clone)]
pub struct FillFormParams {
    /// Preserves the request's field order.
    pub fields: Vec<(String, String)>,
    pub react: bool,
}

#[derive(Debug, Clone)]
pub struct SelectParams {
    pub target: Target,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TypeParams {
    pub text: String,
    pub delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PressParams {
    pub keys: String,
    pub repeat: u32,
}

#[derive(Debug, Clone)]
pub enum ScrollParams {
    By { dx: f64, dy: f64 },
    Direction { direction: String, amount: Option<f64> },
    ToEdge { bottom: bool },
    ToTarget(Target),
}

#[derive(Debug, Clone)]
pub struct WaitForParams {
    pub predicate: Option<String>,
    pub selector: Option<String>,
    /// attached / visible / hidden / stable
    pub state: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ScreenshotParams {
    pub full_page: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PdfParams {
    pub landscape: bool,
    pub scale: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum ViewportParams {
    Device(String),
    Custom {
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    },
}

#[derive(Debug, Clone)]
pub struct GeoParams {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone)]
pub enum FrameSelector {
    Selector(String),
    Index(usize),
    Name(String),
    FrameId(String),
}

#[derive(Debug, Clone)]
pub struct OpenTabParams {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectTabParams {
    pub target_id: Option<String>,
    pub url_contains: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct GotoParams {
    pub url: String,
    pub wait_until: WaitUntil,
}

#[derive(Debug, Clone)]
pub struct WriteProfileParams {
    pub domain: Option<String>,
    pub content: String,
}

/// The action payload of one step. Exactly one per step, enforced by
/// [`parse_step`].
#[derive(Debug, Clone)]
pub enum Action {
    OpenTab(OpenTabParams),
    ConnectTab(ConnectTabParams),
    CloseTab(Option<String>),
    ListTabs,
    ChromeStatus,
    Goto(GotoParams),
    Back,
    Forward,
    Reload { ignore_cache: bool },
    Snapshot(SnapshotParams),
    Find(FindParams),
    Click(ClickParams),
    DoubleClick(ClickParams),
    Hover(Target),
    Fill(FillParams),
    FillForm(FillFormParams),
    Select(SelectParams),
    Type(TypeParams),
    Press(PressParams),
    Scroll(ScrollParams),
    Evaluate(String),
    WaitFor(WaitForParams),
    Screenshot(ScreenshotParams),
    Pdf(PdfParams),
    SetViewport(ViewportParams),
    SetGeolocation(GeoParams),
    Frame(FrameSelector),
    ReadSiteProfile(Option<String>),
    WriteSiteProfile(WriteProfileParams),
}

impl Action {
    /// The action key, echoed into the per-step result.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenTab(_) => "openTab",
            Self::ConnectTab(_) => "connectTab",
            Self::CloseTab(_) => "closeTab",
            Self::ListTabs => "listTabs",
            Self::ChromeStatus => "chromeStatus",
            Self::Goto(_) => "goto",
            Self::Back => "back",
            Self::Forward => "forward",
            Self::Reload { .. } => "reload",
            Self::Snapshot(_) => "snapshot",
            Self::Find(_) => "find",
            Self::Click(_) => "click",
            Self::DoubleClick(_) => "doubleClick",
            Self::Hover(_) => "hover",
            Self::Fill(_) => "fill",
            Self::FillForm(_) => "fillForm",
            Self::Select(_) => "select",
            Self::Type(_) => "type",
            Self::Press(_) => "press",
            Self::Scroll(_) => "scroll",
            Self::Evaluate(_) => "evaluate",
            Self::WaitFor(_) => "waitFor",
            Self::Screenshot(_) => "screenshot",
            Self::Pdf(_) => "pdf",
            Self::SetViewport(_) => "setViewport",
            Self::SetGeolocation(_) => "setGeolocation",
            Self::Frame(_) => "frame",
            Self::ReadSiteProfile(_) => "readSiteProfile",
            Self::WriteSiteProfile(_) => "writeSiteProfile",
        }
    }

    /// Steps that run without the tab registry / main session setup.
    #[must_use]
    pub fn is_registry_free(&self) -> bool {
        matches!(
            self,
            Self::ChromeStatus | Self::CloseTab(_) | Self::OpenTab(_) | Self::ConnectTab(_)
        )
    }
}

/// One validated step: an action plus its lifecycle modifiers.
#[derive(Debug, Clone)]
pub struct Step {
    pub action: Action,
    pub optional: bool,
    pub ready_when: Option<String>,
    pub settled_when: Option<String>,
    pub observe: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Every recognized action key, in documentation order.
pub const ACTION_KEYS: &[&str] = &[
    "openTab",
    "connectTab",
    "closeTab",
    "listTabs",
    "chromeStatus",
    "goto",
    "back",
    "forward",
    "reload",
    "snapshot",
    "find",
    "click",
    "doubleClick",
    "hover",
    "fill",
    "fillForm",
    "select",
    "type",
    "press",
    "scroll",
    "evaluate",
    "waitFor",
    "screenshot",
    "pdf",
    "setViewport",
    "setGeolocation",
    "frame",
    "readSiteProfile",
    "writeSiteProfile",
];

/// Modifier keys valid alongside any action.
const MODIFIER_KEYS: &[&str] = &["optional", "readyWhen", "settledWhen", "observe", "timeout"];

/// Sibling parameter keys accepted per action, beyond the action key itself.
fn sibling_keys(action: &str) -> &'static [&'static str] {
    match action {
        "click" | "doubleClick" => &["force", "button"],
        "fill" => &["value", "clear", "react", "label"],
        "fillForm" => &["react"],
        "type" => &["delay"],
        "press" => &["repeat"],
        "goto" | "openTab" => &["waitUntil"],
        _ => &[],
    }
}

/// Validate and parse one raw step object.
///
/// # Errors
///
/// Returns a VALIDATION error when the step is not an object, has zero or
/// multiple action keys (naming them), or carries unknown keys; per-action
/// parameter shape problems surface the same way.
pub fn parse_step(raw: &Value) -> Result<Step, SkillError> {
    let map = raw
        .as_object()
        .ok_or_else(|| SkillError::validation(format!("step must be an object, got {raw}")))?;

    let actions: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|k| ACTION_KEYS.contains(k))
        .collect();

    let action_key = match actions.as_slice() {
        [one] => *one,
        [] => {
            return Err(SkillError::validation(format!(
                "step has no action key; expected one of: {}",
                ACTION_KEYS.join(", ")
            )));
        }
        several => {
            return Err(SkillError::validation(format!(
                "step has multiple action keys: {}",
                several.join(", ")
            )));
        }
    };

    let allowed_siblings = sibling_keys(action_key);
    for key in map.keys() {
        if key != action_key
            && !MODIFIER_KEYS.contains(&key.as_str())
            && !allowed_siblings.contains(&key.as_str())
        {
            return Err(SkillError::validation(format!(
                "step {action_key:?} has unknown key {key:?}"
            )));
        }
    }

    let action = parse_action(action_key, &map[action_key], map)?;

    let optional = map
        .get("optional")
        .map(|v| {
            v.as_bool().ok_or_else(|| {
                SkillError::validation(format!("optional must be a boolean, got {v}"))
            })
        })
        .transpose()?
        .unwrap_or(false);

    let timeout_ms = map
        .get("timeout")
        .map(|v| {
            v.as_u64()
                .filter(|&t| t > 0)
                .ok_or_else(|| {
                    SkillError::validation(format!("timeout must be a positive integer, got {v}"))
                })
        })
        .transpose()?;

    Ok(Step {
        action,
        optional,
        ready_when: hook_string(map, "readyWhen")?,
        settled_when: hook_string(map, "settledWhen")?,
        observe: hook_string(map, "observe")?,
        timeout_ms,
    })
}

fn hook_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, SkillError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(other) => Err(SkillError::validation(format!(
            "{key} must be a non-empty JavaScript string, got {other}"
        ))),
    }
}

#[allow(clippy::too_many_lines)]
fn parse_action(
    key: &str,
    value: &Value,
    siblings: &Map<String, Value>,
) -> Result<Action, SkillError> {
    match key {
        "openTab" => parse_open_tab(value, siblings),
        "connectTab" => parse_connect_tab(value),
        "closeTab" => match value {
            Value::Bool(true) => Ok(Action::CloseTab(None)),
            Value::String(alias) if !alias.is_empty() => {
                Ok(Action::CloseTab(Some(alias.clone())))
            }
            other => Err(SkillError::validation(format!(
                "closeTab expects true or an alias string, got {other}"
            ))),
        },
        "listTabs" => expect_true(value, "listTabs").map(|()| Action::ListTabs),
        "chromeStatus" => expect_true(value, "chromeStatus").map(|()| Action::ChromeStatus),
        "goto" => {
            let (url, wait_until) = match value {
                Value::String(url) if !url.is_empty() => {
                    (url.clone(), sibling_wait_until(siblings)?)
                }
                Value::Object(map) => {
                    let url = map
                        .get("url")
                        .and_then(Value::as_str)
                        .ok_or_else(|| SkillError::validation("goto object needs a url"))?
                        .to_owned();
                    let wait = match map.get("waitUntil").and_then(Value::as_str) {
                        Some(w) => WaitUntil::parse(w)?,
                        None => sibling_wait_until(siblings)?,
                    };
                    (url, wait)
                }
                other => {
                    return Err(SkillError::validation(format!(
                        "goto expects a URL string or object, got {other}"
                    )));
                }
            };
            Ok(Action::Goto(GotoParams { url, wait_until }))
        }
        "back" => expect_true(value, "back").map(|()| Action::Back),
        "forward" => expect_true(value, "forward").map(|()| Action::Forward),
        "reload" => match value {
            Value::Bool(true) => Ok(Action::Reload {
                ignore_cache: false,
            }),
            Value::Object(map) => Ok(Action::Reload {
                ignore_cache: map
                    .get("ignoreCache")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Err(SkillError::validation(format!(
                "reload expects true or an options object, got {other}"
            ))),
        },
        "snapshot" => parse_snapshot(value),
        "find" => parse_find(value),
        "click" | "doubleClick" => {
            let target = parse_target(key, value)?;
            let force = siblings
                .get("force")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let params = ClickParams { target, force };
            if key == "click" {
                Ok(Action::Click(params))
            } else {
                Ok(Action::DoubleClick(params))
            }
        }
        "hover" => Ok(Action::Hover(parse_target("hover", value)?)),
        "fill" => parse_fill(value, siblings),
        "fillForm" => parse_fill_form(value, siblings),
        "select" => parse_select(value),
        "type" => {
            let (text, delay_ms) = match value {
                Value::String(text) => (
                    text.clone(),
                    siblings.get("delay").and_then(Value::as_u64).unwrap_or(0),
                ),
                Value::Object(map) => (
                    map.get("text")
                        .and_then(Value::as_str)
                        .ok_or_else(|| SkillError::validation("type object needs text"))?
                        .to_owned(),
                    map.get("delay").and_then(Value::as_u64).unwrap_or(0),
                ),
                other => {
                    return Err(SkillError::validation(format!(
                        "type expects a string or object, got {other}"
                    )));
                }
            };
            Ok(Action::Type(TypeParams { text, delay_ms }))
        }
        "press" => {
            let (keys, repeat) = match value {
                Value::String(keys) if !keys.is_empty() => (
                    keys.clone(),
                    siblings.get("repeat").and_then(Value::as_u64).unwrap_or(1),
                ),
                Value::Object(map) => (
                    map.get("keys")
                        .and_then(Value::as_str)
                        .ok_or_else(|| SkillError::validation("press object needs keys"))?
                        .to_owned(),
                    map.get("repeat").and_then(Value::as_u64).unwrap_or(1),
                ),
                other => {
                    return Err(SkillError::validation(format!(
                        "press expects a key combination string, got {other}"
                    )));
                }
            };
            // Bad combinations fail here, before any browser is touched.
            crate::keys::parse_combo(&keys)?;
            let repeat = u32::try_from(repeat.clamp(1, 100)).unwrap_or(1);
            Ok(Action::Press(PressParams { keys, repeat }))
        }
        "scroll" => parse_scroll(value),
        "evaluate" => match value {
            Value::String(expr) if !expr.trim().is_empty() => Ok(Action::Evaluate(expr.clone())),
            Value::Object(map) => map
                .get("expression")
                .and_then(Value::as_str)
                .map(|e| Action::Evaluate(e.to_owned()))
                .ok_or_else(|| SkillError::validation("evaluate object needs an expression")),
            other => Err(SkillError::validation(format!(
                "evaluate expects a JavaScript string, got {other}"
            ))),
        },
        "waitFor" => parse_wait_for(value),
        "screenshot" => match value {
            Value::Bool(true) => Ok(Action::Screenshot(ScreenshotParams::default())),
            Value::Object(map) => Ok(Action::Screenshot(ScreenshotParams {
                full_page: map
                    .get("fullPage")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })),
            other => Err(SkillError::validation(format!(
                "screenshot expects true or an options object, got {other}"
            ))),
        },
        "pdf" => match value {
            Value::Bool(true) => Ok(Action::Pdf(PdfParams::default())),
            Value::Object(map) => Ok(Action::Pdf(PdfParams {
                landscape: map
                    .get("landscape")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                scale: map.get("scale").and_then(Value::as_f64),
            })),
            other => Err(SkillError::validation(format!(
                "pdf expects true or an options object, got {other}"
            ))),
        },
        "setViewport" => parse_viewport(value),
        "setGeolocation" => {
            let map = value.as_object().ok_or_else(|| {
                SkillError::validation("setGeolocation expects {latitude, longitude}")
            })?;
            let latitude = map
                .get("latitude")
                .and_then(Value::as_f64)
                .ok_or_else(|| SkillError::validation("setGeolocation needs latitude"))?;
            let longitude = map
                .get("longitude")
                .and_then(Value::as_f64)
                .ok_or_else(|| SkillError::validation("setGeolocation needs longitude"))?;
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(SkillError::validation(format!(
                    "setGeolocation out of range: ({latitude}, {longitude})"
                )));
            }
            Ok(Action::SetGeolocation(GeoParams {
                latitude,
                longitude,
                accuracy: map.get("accuracy").and_then(Value::as_f64).unwrap_or(1.0),
            }))
        }
        "frame" => parse_frame(value),
        "readSiteProfile" => match value {
            Value::Bool(true) => Ok(Action::ReadSiteProfile(None)),
            Value::String(domain) if !domain.is_empty() => {
                Ok(Action::ReadSiteProfile(Some(domain.clone())))
            }
            other => Err(SkillError::validation(format!(
                "readSiteProfile expects true or a domain string, got {other}"
            ))),
        },
        "writeSiteProfile" => {
            let map = value.as_object().ok_or_else(|| {
                SkillError::validation("writeSiteProfile expects {domain?, content}")
            })?;
            let content = map
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| SkillError::validation("writeSiteProfile needs content"))?
                .to_owned();
            Ok(Action::WriteSiteProfile(WriteProfileParams {
                domain: map
                    .get("domain")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                content,
            }))
        }
        other => Err(SkillError::validation(format!(
            "unrecognized action {other:?}"
        ))),
    }
}

fn expect_true(value: &Value, action: &str) -> Result<(), SkillError> {
    if value == &Value::Bool(true) {
        Ok(())
    } else {
        Err(SkillError::validation(format!(
            "{action} takes no parameters; pass true"
        )))
    }
}

fn sibling_wait_until(siblings: &Map<String, Value>) -> Result<WaitUntil, SkillError> {
    match siblings.get("waitUntil").and_then(Value::as_str) {
        Some(w) => WaitUntil::parse(w),
        None => Ok(WaitUntil::default()),
    }
}

fn parse_open_tab(value: &Value, siblings: &Map<String, Value>) -> Result<Action, SkillError> {
    match value {
        Value::String(url) if !url.is_empty() => Ok(Action::OpenTab(OpenTabParams {
            url: Some(url.clone()),
            host: None,
            port: None,
            headless: false,
        })),
        Value::Bool(true) => Ok(Action::OpenTab(OpenTabParams {
            url: None,
            host: None,
            port: None,
            headless: false,
        })),
        Value::Object(map) => {
            let _ = sibling_wait_until(siblings)?;
            let port = map
                .get("port")
                .and_then(Value::as_u64)
                .map(|p| {
                    u16::try_from(p).map_err(|_| {
                        SkillError::validation(format!("openTab port out of range: {p}"))
                    })
                })
                .transpose()?;
            Ok(Action::OpenTab(OpenTabParams {
                url: map
                    .get("url")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                host: map
                    .get("host")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                port,
                headless: map
                    .get("headless")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }))
        }
        other => Err(SkillError::validation(format!(
            "openTab expects a URL, true, or an options object, got {other}"
        ))),
    }
}

fn parse_connect_tab(value: &Value) -> Result<Action, SkillError> {
    let map = value.as_object().ok_or_else(|| {
        SkillError::validation("connectTab expects {targetId} or {urlContains}")
    })?;
    let target_id = map
        .get("targetId")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let url_contains = map
        .get("urlContains")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    if target_id.is_none() && url_contains.is_none() {
        return Err(SkillError::validation(
            "connectTab needs targetId or urlContains",
        ));
    }
    let port = map
        .get("port")
        .and_then(Value::as_u64)
        .map(|p| {
            u16::try_from(p)
                .map_err(|_| SkillError::validation(format!("connectTab port out of range: {p}")))
        })
        .transpose()?;
    Ok(Action::ConnectTab(ConnectTabParams {
        target_id,
        url_contains,
        host: map
            .get("host")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        port,
    }))
}

fn parse_snapshot(value: &Value) -> Result<Action, SkillError> {
    match value {
        Value::Bool(true) => Ok(Action::Snapshot(SnapshotParams::default())),
        Value::Object(map) => {
            let detail = match map.get("detail").and_then(Value::as_str) {
                None => Detail::default(),
                Some("summary") => Detail::Summary,
                Some("interactive") => Detail::Interactive,
                Some("full") => Detail::Full,
                Some(other) => {
                    return Err(SkillError::validation(format!(
                        "unknown snapshot detail {other:?}; use summary, interactive, or full"
                    )));
                }
            };
            let since = map
                .get("since")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            if let Some(s) = &since {
                let valid = s
                    .strip_prefix('s')
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
                if !valid {
                    return Err(SkillError::validation(format!(
                        "snapshot since must look like \"s3\", got {s:?}"
                    )));
                }
            }
            Ok(Action::Snapshot(SnapshotParams {
                root: map
                    .get("root")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                detail,
                since,
                preserve_refs: map
                    .get("preserveRefs")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                pierce_shadow: map
                    .get("pierceShadow")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                include_frames: map
                    .get("includeFrames")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                max_bytes: map
                    .get("maxBytes")
                    .and_then(Value::as_u64)
                    .and_then(|b| usize::try_from(b).ok()),
            }))
        }
        other => Err(SkillError::validation(format!(
            "snapshot expects true or an options object, got {other}"
        ))),
    }
}

fn parse_find(value: &Value) -> Result<Action, SkillError> {
    let map = value
        .as_object()
        .ok_or_else(|| SkillError::validation("find expects an options object"))?;
    let text = map
        .get("text")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let pattern = map
        .get("pattern")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let role = map
        .get("role")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let near = match map.get("near") {
        None => None,
        Some(Value::Object(n)) => {
            let x = n
                .get("x")
                .and_then(Value::as_f64)
                .ok_or_else(|| SkillError::validation("find near needs x"))?;
            let y = n
                .get("y")
                .and_then(Value::as_f64)
                .ok_or_else(|| SkillError::validation("find near needs y"))?;
            let radius = n.get("radius").and_then(Value::as_f64).unwrap_or(100.0);
            Some((x, y, radius))
        }
        Some(other) => {
            return Err(SkillError::validation(format!(
                "find near must be {{x, y, radius}}, got {other}"
            )));
        }
    };
    if text.is_none() && pattern.is_none() && role.is_none() && near.is_none() {
        return Err(SkillError::validation(
            "find needs at least one of text, pattern, role, near",
        ));
    }
    let match_mode = match map.get("matchMode").and_then(Value::as_str) {
        None | Some("substring") => MatchMode::Substring,
        Some("word") => MatchMode::Word,
        Some("exact") => MatchMode::Exact,
        Some(other) => {
            return Err(SkillError::validation(format!(
                "unknown matchMode {other:?}; use substring, word, or exact"
            )));
        }
    };
    let limit = map
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(20, |l| usize::try_from(l.clamp(1, 100)).unwrap_or(20));
    Ok(Action::Find(FindParams {
        text,
        pattern,
        role,
        near,
        match_mode,
        limit,
    }))
}

fn parse_fill(value: &Value, siblings: &Map<String, Value>) -> Result<Action, SkillError> {
    match value {
        // {"fill": "#email", "value": "a@b.c"}
        Value::String(target) => {
            let fill_value = siblings
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| SkillError::validation("fill needs a value"))?
                .to_owned();
            Ok(Action::Fill(FillParams {
                target: Some(string_target(target)),
                label: None,
                value: fill_value,
                clear: siblings.get("clear").and_then(Value::as_bool).unwrap_or(true),
                react: siblings
                    .get("react")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }))
        }
        Value::Object(map) => {
            let value_str = map
                .get("value")
                .and_then(Value::as_str)
                .or_else(|| siblings.get("value").and_then(Value::as_str))
                .ok_or_else(|| SkillError::validation("fill needs a value"))?
                .to_owned();
            let label = map
                .get("label")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            let target = if map.contains_key("target") {
                Some(parse_target("fill", &map["target"])?)
            } else if map.contains_key("selector")
                || map.contains_key("ref")
                || map.contains_key("text")
            {
                Some(parse_target("fill", value)?)
            } else {
                None
            };
            if target.is_none() && label.is_none() {
                return Err(SkillError::validation("fill needs a target or a label"));
            }
            Ok(Action::Fill(FillParams {
                target,
                label,
                value: value_str,
                clear: map
                    .get("clear")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                react: map
                    .get("react")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }))
        }
        other => Err(SkillError::validation(format!(
            "fill expects a target string or object, got {other}"
        ))),
    }
}

fn parse_fill_form(value: &Value, siblings: &Map<String, Value>) -> Result<Action, SkillError> {
    let map = value
        .as_object()
        .ok_or_else(|| SkillError::validation("fillForm expects an object of fields"))?;
    // Either {"fillForm": {"fields": {...}}} or the shorthand
    // {"fillForm": {"#a": "x", "#b": "y"}}.
    let fields_map = match map.get("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            return Err(SkillError::validation(format!(
                "fillForm fields must be an object, got {other}"
            )));
        }
        None => map,
    };
    let mut fields = Vec::with_capacity(fields_map.len());
    for (selector, v) in fields_map {
        if selector == "react" {
            continue;
        }
        let Some(text) = v.as_str() else {
            return Err(SkillError::validation(format!(
                "fillForm value for {selector:?} must be a string"
            )));
        };
        fields.push((selector.clone(), text.to_owned()));
    }
    if fields.is_empty() {
        return Err(SkillError::validation("fillForm has no fields"));
    }
    let react = map
        .get("react")
        .and_then(Value::as_bool)
        .or_else(|| siblings.get("react").and_then(Value::as_bool))
        .unwrap_or(false);
    Ok(Action::FillForm(FillFormParams { fields, react }))
}

fn parse_select(value: &Value) -> Result<Action, SkillError> {
    let map = value
        .as_object()
        .ok_or_else(|| SkillError::validation("select expects {target, value}"))?;
    let target = parse_target(
        "select",
        map.get("target").unwrap_or(value),
    )?;
    let values = if let Some(v) = map.get("value").and_then(Value::as_str) {
        vec![v.to_owned()]
    } else if let Some(arr) = map.get("values").and_then(Value::as_array) {
        arr.iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect()
    } else {
        return Err(SkillError::validation("select needs value or values"));
    };
    if values.is_empty() {
        return Err(SkillError::validation("select has no values"));
    }
    Ok(Action::Select(SelectParams { target, values }))
}

fn parse_scroll(value: &Value) -> Result<Action, SkillError> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            match trimmed {
                "top" => Ok(Action::Scroll(ScrollParams::ToEdge { bottom: false })),
                "bottom" => Ok(Action::Scroll(ScrollParams::ToEdge { bottom: true })),
                "up" | "down" | "left" | "right" => Ok(Action::Scroll(ScrollParams::Direction {
                    direction: trimmed.to_owned(),
                    amount: None,
                })),
                _ => Ok(Action::Scroll(ScrollParams::ToTarget(string_target(raw)))),
            }
        }
        Value::Object(map) => {
            if let Some(to) = map.get("to").and_then(Value::as_str) {
                return match to {
                    "top" => Ok(Action::Scroll(ScrollParams::ToEdge { bottom: false })),
                    "bottom" => Ok(Action::Scroll(ScrollParams::ToEdge { bottom: true })),
                    other => Err(SkillError::validation(format!(
                        "scroll to must be top or bottom, got {other:?}"
                    ))),
                };
            }
            if let Some(direction) = map.get("direction").and_then(Value::as_str) {
                if !["up", "down", "left", "right"].contains(&direction) {
                    return Err(SkillError::validation(format!(
                        "scroll direction must be up/down/left/right, got {direction:?}"
                    )));
                }
                return Ok(Action::Scroll(ScrollParams::Direction {
                    direction: direction.to_owned(),
                    amount: map.get("amount").and_then(Value::as_f64),
                }));
            }
            if let (Some(dx), Some(dy)) = (
                map.get("dx").and_then(Value::as_f64),
                map.get("dy").and_then(Value::as_f64),
            ) {
                return Ok(Action::Scroll(ScrollParams::By { dx, dy }));
            }
            if map.contains_key("selector") || map.contains_key("ref") {
                return Ok(Action::Scroll(ScrollParams::ToTarget(parse_target(
                    "scroll", value,
                )?)));
            }
            Err(SkillError::validation(
                "scroll expects direction, to, dx/dy, or a target",
            ))
        }
        other => Err(SkillError::validation(format!(
            "scroll expects a direction, edge, or target, got {other}"
        ))),
    }
}

fn parse_wait_for(value: &Value) -> Result<Action, SkillError> {
    match value {
        Value::String(predicate) if !predicate.trim().is_empty() => {
            Ok(Action::WaitFor(WaitForParams {
                predicate: Some(predicate.clone()),
                selector: None,
                state: "attached".into(),
                timeout_ms: None,
            }))
        }
        Value::Object(map) => {
            let selector = map
                .get("selector")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            let predicate = map
                .get("predicate")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            if selector.is_none() && predicate.is_none() {
                return Err(SkillError::validation(
                    "waitFor needs a selector or a predicate",
                ));
            }
            let state = map
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("attached");
            if !["attached", "visible", "hidden", "stable"].contains(&state) {
                return Err(SkillError::validation(format!(
                    "waitFor state must be attached/visible/hidden/stable, got {state:?}"
                )));
            }
            Ok(Action::WaitFor(WaitForParams {
                predicate,
                selector,
                state: state.to_owned(),
                timeout_ms: map.get("timeout").and_then(Value::as_u64),
            }))
        }
        other => Err(SkillError::validation(format!(
            "waitFor expects a predicate string or options object, got {other}"
        ))),
    }
}

fn parse_viewport(value: &Value) -> Result<Action, SkillError> {
    let map = value
        .as_object()
        .ok_or_else(|| SkillError::validation("setViewport expects an options object"))?;
    if let Some(device) = map.get("device").and_then(Value::as_str) {
        return Ok(Action::SetViewport(ViewportParams::Device(
            device.to_owned(),
        )));
    }
    let width = map.get("width").and_then(Value::as_u64);
    let height = map.get("height").and_then(Value::as_u64);
    let (Some(width), Some(height)) = (width, height) else {
        return Err(SkillError::validation(
            "setViewport needs a device name or width and height",
        ));
    };
    if width == 0 || height == 0 || width > 10_000 || height > 10_000 {
        return Err(SkillError::validation(format!(
            "setViewport dimensions out of range: {width}x{height}"
        )));
    }
    Ok(Action::SetViewport(ViewportParams::Custom {
        width: u32::try_from(width).unwrap_or(10_000),
        height: u32::try_from(height).unwrap_or(10_000),
        device_scale_factor: map
            .get("deviceScaleFactor")
            .and_then(Value::as_f64)
            .unwrap_or(1.0),
        mobile: map.get("mobile").and_then(Value::as_bool).unwrap_or(false),
    }))
}

fn parse_frame(value: &Value) -> Result<Action, SkillError> {
    match value {
        Value::String(selector) if !selector.is_empty() => {
            Ok(Action::Frame(FrameSelector::Selector(selector.clone())))
        }
        Value::Number(n) => {
            let index = n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| {
                    SkillError::validation("frame index must be a non-negative integer")
                })?;
            Ok(Action::Frame(FrameSelector::Index(index)))
        }
        Value::Object(map) => {
            if let Some(selector) = map.get("selector").and_then(Value::as_str) {
                return Ok(Action::Frame(FrameSelector::Selector(selector.to_owned())));
            }
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                return Ok(Action::Frame(FrameSelector::Name(name.to_owned())));
            }
            if let Some(frame_id) = map.get("frameId").and_then(Value::as_str) {
                return Ok(Action::Frame(FrameSelector::FrameId(frame_id.to_owned())));
            }
            if let Some(index) = map
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| usize::try_from(i).ok())
            {
                return Ok(Action::Frame(FrameSelector::Index(index)));
            }
            Err(SkillError::validation(
                "frame needs selector, name, frameId, or index",
            ))
        }
        other => Err(SkillError::validation(format!(
            "frame expects a selector, index, or options object, got {other}"
        ))),
    }
}

/// Validate a whole step array. Rejects empty arrays before any execution.
///
/// # Errors
///
/// Returns the first step's VALIDATION error, prefixed with its index.
pub fn parse_steps(raw: &[Value]) -> Result<Vec<Step>, SkillError> {
    if raw.is_empty() {
        return Err(SkillError::validation("steps must be a non-empty array"));
    }
    raw.iter()
        .enumerate()
        .map(|(i, v)| {
            parse_step(v).map_err(|e| SkillError {
                class: e.class,
                kind: e.kind,
                message: format!("steps[{i}]: {}", e.message),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ref_pattern_detection() {
        assert!(is_ref("s1e5"));
        assert!(is_ref("s12e345"));
        assert!(!is_ref("s1"));
        assert!(!is_ref("e5"));
        assert!(!is_ref("s1e"));
        assert!(!is_ref("se5"));
        assert!(!is_ref("s1e5x"));
        assert!(!is_ref("#save"));
    }

    #[test]
    fn bare_string_routes_ref_vs_selector() {
        assert_eq!(string_target("s2e7"), Target::Ref("s2e7".into()));
        assert_eq!(
            string_target("  button.primary "),
            Target::Selector("button.primary".into())
        );
    }

    #[test]
    fn step_with_no_action_key_is_rejected() {
        let err = parse_step(&json!({"optional": true})).unwrap_err();
        assert_eq!(err.type_name(), "VALIDATION");
        assert!(err.message.contains("no action key"));
    }

    #[test]
    fn step_with_two_action_keys_names_both() {
        let err = parse_step(&json!({"click": "#a", "hover": "#b"})).unwrap_err();
        assert!(err.message.contains("click"));
        assert!(err.message.contains("hover"));
    }

    #[test]
    fn unknown_sibling_key_is_rejected() {
        let err = parse_step(&json!({"snapshot": true, "frobnicate": 1})).unwrap_err();
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn click_accepts_sibling_force() {
        let step = parse_step(&json!({"click": "#buy", "force": true})).unwrap();
        match step.action {
            Action::Click(params) => {
                assert!(params.force);
                assert_eq!(params.target, Target::Selector("#buy".into()));
            }
            other => panic!("expected click, got {other:?}"),
        }
    }

    #[test]
    fn click_by_text_object() {
        let step = parse_step(&json!({"click": {"text": "Next"}})).unwrap();
        match step.action {
            Action::Click(params) => assert_eq!(params.target, Target::Text("Next".into())),
            other => panic!("expected click, got {other:?}"),
        }
    }

    #[test]
    fn click_by_coords_and_multi_selector() {
        let step = parse_step(&json!({"click": {"x": 10.5, "y": 20.0}})).unwrap();
        assert!(matches!(
            step.action,
            Action::Click(ClickParams {
                target: Target::Coords { .. },
                ..
            })
        ));

        let step = parse_step(&json!({"click": ["#a", ".b"]})).unwrap();
        match step.action {
            Action::Click(params) => {
                assert_eq!(params.target, Target::Multi(vec!["#a".into(), ".b".into()]));
            }
            other => panic!("expected click, got {other:?}"),
        }
    }

    #[test]
    fn modifiers_parse_on_any_step() {
        let step = parse_step(&json!({
            "snapshot": true,
            "optional": true,
            "readyWhen": "document.readyState === 'complete'",
            "settledWhen": "!document.querySelector('.spinner')",
            "observe": "location.href",
            "timeout": 5000
        }))
        .unwrap();
        assert!(step.optional);
        assert!(step.ready_when.is_some());
        assert!(step.settled_when.is_some());
        assert!(step.observe.is_some());
        assert_eq!(step.timeout_ms, Some(5000));
    }

    #[test]
    fn hook_must_be_string() {
        let err = parse_step(&json!({"snapshot": true, "readyWhen": 42})).unwrap_err();
        assert!(err.message.contains("readyWhen"));
    }

    #[test]
    fn empty_steps_array_is_validation_error() {
        let err = parse_steps(&[]).unwrap_err();
        assert_eq!(err.type_name(), "VALIDATION");
    }

    #[test]
    fn step_errors_carry_index() {
        let raw = vec![json!({"snapshot": true}), json!({"bogus": 1})];
        let err = parse_steps(&raw).unwrap_err();
        assert!(err.message.starts_with("steps[1]:"));
    }

    #[test]
    fn open_tab_forms() {
        let step = parse_step(&json!({"openTab": "https://example.com"})).unwrap();
        match step.action {
            Action::OpenTab(p) => assert_eq!(p.url.as_deref(), Some("https://example.com")),
            other => panic!("expected openTab, got {other:?}"),
        }

        let step = parse_step(
            &json!({"openTab": {"url": "https://example.com", "port": 9223, "headless": true}}),
        )
        .unwrap();
        match step.action {
            Action::OpenTab(p) => {
                assert_eq!(p.port, Some(9223));
                assert!(p.headless);
            }
            other => panic!("expected openTab, got {other:?}"),
        }
    }

    #[test]
    fn goto_with_wait_until() {
        let step =
            parse_step(&json!({"goto": {"url": "https://x.test", "waitUntil": "networkidle"}}))
                .unwrap();
        match step.action {
            Action::Goto(p) => assert_eq!(p.wait_until, WaitUntil::NetworkIdle),
            other => panic!("expected goto, got {other:?}"),
        }
    }

    #[test]
    fn goto_rejects_unknown_wait() {
        let err =
            parse_step(&json!({"goto": {"url": "https://x.test", "waitUntil": "idle"}}))
                .unwrap_err();
        assert!(err.message.contains("waitUntil"));
    }

    #[test]
    fn snapshot_since_is_validated() {
        assert!(parse_step(&json!({"snapshot": {"since": "s3"}})).is_ok());
        let err = parse_step(&json!({"snapshot": {"since": "v3"}})).unwrap_err();
        assert!(err.message.contains("since"));
    }

    #[test]
    fn fill_string_form_with_sibling_value() {
        let step = parse_step(&json!({"fill": "#email", "value": "a@b.test"})).unwrap();
        match step.action {
            Action::Fill(p) => {
                assert_eq!(p.value, "a@b.test");
                assert!(p.clear);
                assert!(!p.react);
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[test]
    fn fill_object_form_with_label() {
        let step =
            parse_step(&json!({"fill": {"label": "Email address", "value": "a@b.test"}})).unwrap();
        match step.action {
            Action::Fill(p) => {
                assert_eq!(p.label.as_deref(), Some("Email address"));
                assert!(p.target.is_none());
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[test]
    fn fill_without_value_fails() {
        let err = parse_step(&json!({"fill": "#email"})).unwrap_err();
        assert!(err.message.contains("value"));
    }

    #[test]
    fn fill_form_shorthand() {
        let step =
            parse_step(&json!({"fillForm": {"#user": "alice", "#pass": "hunter2"}})).unwrap();
        match step.action {
            Action::FillForm(p) => {
                assert_eq!(p.fields.len(), 2);
            }
            other => panic!("expected fillForm, got {other:?}"),
        }
    }

    #[test]
    fn select_single_and_multi() {
        let step = parse_step(&json!({"select": {"target": "#country", "value": "NZ"}})).unwrap();
        match step.action {
            Action::Select(p) => assert_eq!(p.values, vec!["NZ"]),
            other => panic!("expected select, got {other:?}"),
        }

        let step =
            parse_step(&json!({"select": {"target": "s1e2", "values": ["a", "b"]}})).unwrap();
        match step.action {
            Action::Select(p) => {
                assert_eq!(p.target, Target::Ref("s1e2".into()));
                assert_eq!(p.values.len(), 2);
            }
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn scroll_forms() {
        assert!(matches!(
            parse_step(&json!({"scroll": "down"})).unwrap().action,
            Action::Scroll(ScrollParams::Direction { .. })
        ));
        assert!(matches!(
            parse_step(&json!({"scroll": "bottom"})).unwrap().action,
            Action::Scroll(ScrollParams::ToEdge { bottom: true })
        ));
        assert!(matches!(
            parse_step(&json!({"scroll": {"direction": "up", "amount": 300}}))
                .unwrap()
                .action,
            Action::Scroll(ScrollParams::Direction { .. })
        ));
        assert!(matches!(
            parse_step(&json!({"scroll": "#list"})).unwrap().action,
            Action::Scroll(ScrollParams::ToTarget(Target::Selector(_)))
        ));
        assert!(
            parse_step(&json!({"scroll": {"direction": "sideways"}})).is_err()
        );
    }

    #[test]
    fn wait_for_forms() {
        let step = parse_step(&json!({"waitFor": "window.ready === true"})).unwrap();
        assert!(matches!(
            step.action,
            Action::WaitFor(WaitForParams { predicate: Some(_), .. })
        ));

        let step =
            parse_step(&json!({"waitFor": {"selector": ".modal", "state": "hidden"}})).unwrap();
        match step.action {
            Action::WaitFor(p) => assert_eq!(p.state, "hidden"),
            other => panic!("expected waitFor, got {other:?}"),
        }

        assert!(parse_step(&json!({"waitFor": {"selector": ".card", "state": "stable"}})).is_ok());
        assert!(parse_step(&json!({"waitFor": {"state": "visible"}})).is_err());
        assert!(
            parse_step(&json!({"waitFor": {"selector": "#x", "state": "shiny"}})).is_err()
        );
    }

    #[test]
    fn viewport_device_and_custom() {
        assert!(matches!(
            parse_step(&json!({"setViewport": {"device": "iPhone 15"}}))
                .unwrap()
                .action,
            Action::SetViewport(ViewportParams::Device(_))
        ));
        assert!(matches!(
            parse_step(&json!({"setViewport": {"width": 1280, "height": 720}}))
                .unwrap()
                .action,
            Action::SetViewport(ViewportParams::Custom { .. })
        ));
        assert!(parse_step(&json!({"setViewport": {"width": 0, "height": 10}})).is_err());
    }

    #[test]
    fn geolocation_bounds() {
        assert!(
            parse_step(&json!({"setGeolocation": {"latitude": -36.85, "longitude": 174.76}}))
                .is_ok()
        );
        assert!(
            parse_step(&json!({"setGeolocation": {"latitude": 99.0, "longitude": 0.0}})).is_err()
        );
    }

    #[test]
    fn frame_forms() {
        assert!(matches!(
            parse_step(&json!({"frame": "#payments"})).unwrap().action,
            Action::Frame(FrameSelector::Selector(_))
        ));
        assert!(matches!(
            parse_step(&json!({"frame": 1})).unwrap().action,
            Action::Frame(FrameSelector::Index(1))
        ));
        assert!(matches!(
            parse_step(&json!({"frame": {"name": "checkout"}})).unwrap().action,
            Action::Frame(FrameSelector::Name(_))
        ));
    }

    #[test]
    fn registry_free_actions() {
        for (raw, expect) in [
            (json!({"chromeStatus": true}), true),
            (json!({"closeTab": true}), true),
            (json!({"openTab": "https://x.test"}), true),
            (json!({"snapshot": true}), false),
            (json!({"click": "#a"}), false),
        ] {
            let step = parse_step(&raw).unwrap();
            assert_eq!(step.action.is_registry_free(), expect, "{raw}");
        }
    }

    #[test]
    fn press_validates_the_combination_before_execution() {
        assert!(parse_step(&json!({"press": "Control+Enter"})).is_ok());
        let err = parse_step(&json!({"press": "Hyper+x"})).unwrap_err();
        assert_eq!(err.type_name(), "StepValidationError");
    }

    #[test]
    fn action_names_round_trip_the_key() {
        let cases = [
            (json!({"openTab": true}), "openTab"),
            (json!({"doubleClick": "#x"}), "doubleClick"),
            (json!({"writeSiteProfile": {"content": "# notes"}}), "writeSiteProfile"),
            (json!({"press": "Control+Enter"}), "press"),
        ];
        for (raw, name) in cases {
            assert_eq!(parse_step(&raw).unwrap().action.name(), name);
        }
    }
}
