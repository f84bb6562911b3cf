use std::fmt;

use crate::error::SkillError;

/// Errors from browser discovery and launch.
#[derive(Debug)]
pub enum ChromeError {
    /// No Chrome/Chromium executable could be located.
    NotFound(String),
    /// The process could not be spawned.
    LaunchFailed(String),
    /// Chrome never opened its debug endpoint within the startup window.
    StartupTimeout { port: u16 },
    /// An HTTP request to a `/json/*` endpoint failed.
    Http(String),
    /// A `/json/*` response could not be parsed.
    Parse(String),
}

impl fmt::Display for ChromeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Chrome executable not found: {msg}"),
            Self::LaunchFailed(msg) => write!(f, "Chrome launch failed: {msg}"),
            Self::StartupTimeout { port } => {
                write!(f, "Chrome did not open port {port} within the startup window")
            }
            Self::Http(msg) => write!(f, "Chrome debug endpoint error: {msg}"),
            Self::Parse(msg) => write!(f, "Chrome debug endpoint returned bad data: {msg}"),
        }
    }
}

impl std::error::Error for ChromeError {}

impl From<std::io::Error> for ChromeError {
    fn from(e: std::io::Error) -> Self {
        Self::LaunchFailed(e.to_string())
    }
}

impl From<ChromeError> for SkillError {
    fn from(e: ChromeError) -> Self {
        SkillError::connection(e.to_string())
    }
}
