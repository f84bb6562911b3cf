use std::time::Instant;

use clap::Parser;
use clap::error::ErrorKind;

use cdp_skill::debug;
use cdp_skill::error::SkillError;
use cdp_skill::metrics;
use cdp_skill::output::to_line;
use cdp_skill::request::{self, Request};
use cdp_skill::runner;

/// Stateless browser automation over the Chrome DevTools Protocol.
///
/// Takes one JSON step program per invocation and emits one JSON response
/// on stdout. Exit code 0 when every step succeeded, 1 otherwise.
#[derive(Parser)]
#[command(name = "cdp-skill", version)]
struct Cli {
    /// The JSON command; read from stdin when omitted.
    command: Option<String>,

    /// Write a per-invocation debug log under ./log/.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print().expect("failed to write to stdout");
                std::process::exit(0);
            }
            // Even argument problems answer in JSON: agents parse stdout.
            SkillError::parse(e.kind().to_string()).print_envelope();
            std::process::exit(1);
        }
    };

    let started = Instant::now();

    let payload = match read_payload(cli.command).await {
        Ok(payload) => payload,
        Err(e) => exit_with(&e, started, 0),
    };

    let request = match request::parse_request(&payload) {
        Ok(request) => request,
        Err(e) => exit_with(&e, started, payload.len()),
    };

    let input_bytes = request.input_bytes;
    run_and_exit(request, cli.debug, started, input_bytes).await;
}

async fn read_payload(arg: Option<String>) -> Result<String, SkillError> {
    match arg {
        Some(command) => Ok(command),
        None => request::read_payload(&[]).await,
    }
}

/// Fatal setup path: emit the error envelope, record metrics, exit 1.
fn exit_with(error: &SkillError, started: Instant, input_bytes: usize) -> ! {
    let line = to_line(&error.to_envelope());
    metrics::record(input_bytes, line.len(), 0, started.elapsed().as_millis());
    println!("{line}");
    std::process::exit(1);
}

async fn run_and_exit(request: Request, debug_enabled: bool, started: Instant, input_bytes: usize) {
    let outcome = runner::run(request).await;
    let line = to_line(&outcome.response);

    metrics::record(
        input_bytes,
        line.len(),
        outcome.steps_attempted,
        started.elapsed().as_millis(),
    );

    if debug_enabled {
        let alias = outcome.response["tab"].as_str().unwrap_or("none").to_owned();
        let actions: Vec<&str> = outcome.response["steps"]
            .as_array()
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s["action"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        let record = serde_json::json!({
            "response": outcome.response,
            "elapsedMs": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        debug::write_log(&alias, &actions, outcome.ok, &record);
    }

    println!("{line}");
    std::process::exit(i32::from(!outcome.ok));
}
