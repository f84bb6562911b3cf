use std::fmt;

use crate::error::{ExecKind, SkillError, classify_cdp_message};

/// Failures from the CDP wire layer, shaped by what the response taxonomy
/// needs from it: unreachable endpoints become CONNECTION errors, missed
/// deadlines become TimeoutError, crashed tabs become PageCrashedError, and
/// browser-reported failures get pattern-classified.
#[derive(Debug)]
pub enum CdpError {
    /// The endpoint cannot be reached, or the link died and stayed down.
    Unreachable(String),

    /// No reply to a command within its deadline.
    NoReply { method: String, waited_ms: u128 },

    /// The browser answered the command with an error payload.
    Browser {
        method: String,
        code: i64,
        message: String,
    },

    /// A reply arrived without the field the caller needed.
    Malformed(String),

    /// The attached tab crashed.
    TargetCrashed,
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(detail) => write!(f, "CDP endpoint unreachable: {detail}"),
            Self::NoReply { method, waited_ms } => {
                write!(f, "CDP command {method} timed out after {waited_ms}ms")
            }
            Self::Browser {
                method,
                code,
                message,
            } => write!(f, "browser rejected {method} ({code}): {message}"),
            Self::Malformed(detail) => write!(f, "malformed CDP reply: {detail}"),
            Self::TargetCrashed => write!(f, "CDP target crashed"),
        }
    }
}

impl std::error::Error for CdpError {}

impl From<CdpError> for SkillError {
    fn from(e: CdpError) -> Self {
        match &e {
            CdpError::Unreachable(_) => SkillError::connection(e.to_string()),
            CdpError::NoReply { .. } => SkillError::timeout(e.to_string()),
            CdpError::TargetCrashed => SkillError::page_crashed(),
            CdpError::Browser { message, .. } => match classify_cdp_message(message) {
                Some(kind) => SkillError::execution(kind, message.clone()),
                None => SkillError::execution(ExecKind::Navigation, e.to_string()),
            },
            CdpError::Malformed(_) => SkillError::execution(ExecKind::Navigation, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unreachable() {
        let err = CdpError::Unreachable("connection refused".into());
        assert_eq!(err.to_string(), "CDP endpoint unreachable: connection refused");
    }

    #[test]
    fn display_no_reply_mentions_method_and_wait() {
        let err = CdpError::NoReply {
            method: "Page.navigate".into(),
            waited_ms: 30_000,
        };
        let text = err.to_string();
        assert!(text.contains("Page.navigate"));
        assert!(text.contains("timed out"));
        assert!(text.contains("30000"));
    }

    #[test]
    fn display_browser_error_carries_code() {
        let err = CdpError::Browser {
            method: "DOM.getDocument".into(),
            code: -32000,
            message: "Not found".into(),
        };
        let text = err.to_string();
        assert!(text.contains("-32000"));
        assert!(text.contains("Not found"));
    }

    #[test]
    fn unreachable_maps_to_connection_class() {
        let skill: SkillError = CdpError::Unreachable("refused".into()).into();
        assert_eq!(skill.type_name(), "CONNECTION");
    }

    #[test]
    fn no_reply_maps_to_timeout_subtype() {
        let skill: SkillError = CdpError::NoReply {
            method: "DOM.getDocument".into(),
            waited_ms: 500,
        }
        .into();
        assert_eq!(skill.type_name(), "TimeoutError");
    }

    #[test]
    fn crashed_target_maps_to_page_crashed() {
        let skill: SkillError = CdpError::TargetCrashed.into();
        assert_eq!(skill.type_name(), "PageCrashedError");
    }

    #[test]
    fn browser_errors_are_pattern_classified() {
        let skill: SkillError = CdpError::Browser {
            method: "Runtime.evaluate".into(),
            code: -32000,
            message: "Execution context was destroyed.".into(),
        }
        .into();
        assert_eq!(skill.type_name(), "ContextDestroyedError");

        let skill: SkillError = CdpError::Browser {
            method: "Runtime.callFunctionOn".into(),
            code: -32000,
            message: "No node with given id found".into(),
        }
        .into();
        assert_eq!(skill.type_name(), "StaleElementError");

        let skill: SkillError = CdpError::Browser {
            method: "Page.navigate".into(),
            code: -32602,
            message: "Invalid parameters".into(),
        }
        .into();
        assert_eq!(skill.type_name(), "NavigationError");
    }

    #[test]
    fn malformed_reply_maps_to_navigation() {
        let skill: SkillError =
            CdpError::Malformed("attach reply had no sessionId".into()).into();
        assert_eq!(skill.type_name(), "NavigationError");
    }
}
