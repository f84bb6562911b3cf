use std::fmt;

use serde_json::json;

/// Top-level error class carried in the response envelope.
///
/// `Parse`, `Validation` and `Connection` are fatal before any step runs;
/// `Execution` wraps failures raised while steps are executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Parse,
    Validation,
    Connection,
    Execution,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "PARSE",
            Self::Validation => "VALIDATION",
            Self::Connection => "CONNECTION",
            Self::Execution => "EXECUTION",
        }
    }
}

/// Execution error subtype, reported as the `type` of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecKind {
    Navigation,
    NavigationAborted,
    Timeout,
    ElementNotFound,
    ElementNotEditable,
    StaleElement,
    PageCrashed,
    ContextDestroyed,
    StepValidation,
}

impl ExecKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "NavigationError",
            Self::NavigationAborted => "NavigationAbortedError",
            Self::Timeout => "TimeoutError",
            Self::ElementNotFound => "ElementNotFoundError",
            Self::ElementNotEditable => "ElementNotEditableError",
            Self::StaleElement => "StaleElementError",
            Self::PageCrashed => "PageCrashedError",
            Self::ContextDestroyed => "ContextDestroyedError",
            Self::StepValidation => "StepValidationError",
        }
    }
}

/// The error type every layer converges on before serialization.
#[derive(Debug)]
pub struct SkillError {
    pub class: ErrorClass,
    /// Execution subtype; `None` for setup-level failures.
    pub kind: Option<ExecKind>,
    pub message: String,
}

impl fmt::Display for SkillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name(), self.message)
    }
}

impl std::error::Error for SkillError {}

impl SkillError {
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Parse,
            kind: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Validation,
            kind: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Connection,
            kind: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn execution(kind: ExecKind, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Execution,
            kind: Some(kind),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::execution(ExecKind::Navigation, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::execution(ExecKind::Timeout, message)
    }

    #[must_use]
    pub fn element_not_found(target: &str) -> Self {
        Self::execution(
            ExecKind::ElementNotFound,
            format!("element not found: {target}"),
        )
    }

    #[must_use]
    pub fn not_editable(target: &str, reason: &str) -> Self {
        Self::execution(
            ExecKind::ElementNotEditable,
            format!("element not editable: {target} ({reason})"),
        )
    }

    #[must_use]
    pub fn stale_ref(reference: &str) -> Self {
        Self::execution(
            ExecKind::StaleElement,
            format!("ref {reference} no longer resolves; take a fresh snapshot"),
        )
    }

    #[must_use]
    pub fn page_crashed() -> Self {
        Self::execution(ExecKind::PageCrashed, "the page crashed")
    }

    #[must_use]
    pub fn step_validation(message: impl Into<String>) -> Self {
        Self::execution(ExecKind::StepValidation, message)
    }

    /// The `type` string used in the JSON envelope: the execution subtype
    /// when present, otherwise the top-level class name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            Some(kind) => kind.as_str(),
            None => self.class.as_str(),
        }
    }

    /// Whether this error counts as a setup failure (no steps executed).
    #[must_use]
    pub fn is_fatal_setup(&self) -> bool {
        self.class != ErrorClass::Execution
    }

    /// Serialize to the single-line error envelope
    /// `{"status":"error","error":{"type":…,"message":…}}`.
    #[must_use]
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({
            "status": "error",
            "error": { "type": self.type_name(), "message": self.message },
        })
    }

    pub fn print_envelope(&self) {
        let line = serde_json::to_string(&self.to_envelope()).unwrap_or_else(|_| {
            format!(
                r#"{{"status":"error","error":{{"type":"{}","message":"serialization failed"}}}}"#,
                self.type_name()
            )
        });
        println!("{line}");
    }
}

/// Classify a raw CDP error message into an execution subtype.
///
/// Chrome reports context teardown and detached nodes only through message
/// text, so detection is pattern matching on known phrasings.
#[must_use]
pub fn classify_cdp_message(message: &str) -> Option<ExecKind> {
    const CONTEXT_DESTROYED: &[&str] = &[
        "Execution context was destroyed",
        "Cannot find context with specified id",
        "Inspected target navigated or closed",
    ];
    const STALE_NODE: &[&str] = &[
        "Node with given id does not belong to the document",
        "No node with given id found",
        "Object couldn't be returned by value",
        "Could not find node with given id",
    ];

    if CONTEXT_DESTROYED.iter().any(|p| message.contains(p)) {
        return Some(ExecKind::ContextDestroyed);
    }
    if STALE_NODE.iter().any(|p| message.contains(p)) {
        return Some(ExecKind::StaleElement);
    }
    None
}
