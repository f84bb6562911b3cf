use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cdp::{CdpError, Session};

/// FIFO cap on buffered console messages; the oldest are dropped first.
const BUFFER_CAP: usize = 10_000;

/// How many messages of each level survive into the response summary.
const SUMMARY_CAP: usize = 10;

/// One captured console message.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

/// Captures `Runtime.consoleAPICalled` and `Runtime.exceptionThrown` for
/// the duration of one command. Begin capture right after attaching so the
/// buffer covers the command's whole time window.
#[derive(Clone)]
pub struct ConsoleCapture {
    buffer: Arc<Mutex<VecDeque<ConsoleMessage>>>,
}

/// Errors + warnings digest attached to the response.
#[derive(Debug, Default, Serialize)]
pub struct ConsoleSummary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ConsoleSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

impl ConsoleCapture {
    /// Subscribe to console events and start buffering in the background.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` when the Runtime domain cannot be enabled.
    pub async fn begin(session: &Session) -> Result<Self, CdpError> {
        let mut api_rx = session.subscribe("Runtime.consoleAPICalled");
        let mut exc_rx = session.subscribe("Runtime.exceptionThrown");
        session.send("Runtime.enable", None).await?;

        let buffer = Arc::new(Mutex::new(VecDeque::new()));

        let api_buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            while let Some(event) = api_rx.recv().await {
                let message = api_message(&event.params);
                push(&api_buffer, message).await;
            }
        });

        let exc_buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            while let Some(event) = exc_rx.recv().await {
                let message = exception_message(&event.params);
                push(&exc_buffer, message).await;
            }
        });

        Ok(Self { buffer })
    }

    /// Drain the buffer into an errors/warnings digest.
    pub async fn summarize(&self) -> ConsoleSummary {
        let buffer = self.buffer.lock().await;
        summarize_messages(buffer.iter())
    }
}

async fn push(buffer: &Arc<Mutex<VecDeque<ConsoleMessage>>>, message: ConsoleMessage) {
    let mut buffer = buffer.lock().await;
    if buffer.len() >= BUFFER_CAP {
        buffer.pop_front();
    }
    buffer.push_back(message);
}

/// Flatten a `consoleAPICalled` event into one line of text.
fn api_message(params: &Value) -> ConsoleMessage {
    let level = params["type"].as_str().unwrap_or("log").to_owned();
    let text = params["args"]
        .as_array()
        .map(|args| {
            args.iter()
                .map(preview_arg)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    ConsoleMessage { level, text }
}

fn preview_arg(arg: &Value) -> String {
    if let Some(s) = arg["value"].as_str() {
        return s.to_owned();
    }
    if !arg["value"].is_null() {
        return arg["value"].to_string();
    }
    if let Some(desc) = arg["description"].as_str() {
        return desc.to_owned();
    }
    arg["type"].as_str().unwrap_or("?").to_owned()
}

fn exception_message(params: &Value) -> ConsoleMessage {
    let details = &params["exceptionDetails"];
    let text = details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("uncaught exception")
        .to_owned();
    ConsoleMessage {
        level: "error".to_owned(),
        text,
    }
}

fn summarize_messages<'a, I>(messages: I) -> ConsoleSummary
where
    I: Iterator<Item = &'a ConsoleMessage>,
{
    let mut summary = ConsoleSummary::default();
    for message in messages {
        let line = truncate(&message.text, 200);
        match message.level.as_str() {
            "error" | "assert" => {
                if summary.errors.len() < SUMMARY_CAP {
                    summary.errors.push(line);
                }
            }
            "warning" | "warn" => {
                if summary.warnings.len() < SUMMARY_CAP {
                    summary.warnings.push(line);
                }
            }
            _ => {}
        }
    }
    summary
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
