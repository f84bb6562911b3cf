use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::ChromeError;
use super::discovery::query_version;
use super::platform::find_executable;

/// Startup window for the freshly launched instance: `/json/version` is
/// polled every 100ms for up to 10s.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for spawning a CDP-enabled Chrome beside whatever is already
/// running. Existing browser processes are never signaled or modified.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub port: u16,
    pub headless: bool,
    /// Explicit executable; `None` probes `CHROME_PATH` and the platform
    /// candidate list.
    pub executable: Option<PathBuf>,
}

/// Profile directory for an auto-launched instance, isolated per port so a
/// headless and a headful instance can coexist.
fn profile_dir(port: u16, headless: bool) -> PathBuf {
    let suffix = if headless { "-headless" } else { "" };
    std::env::temp_dir().join(format!("chrome-cdp-profile-{port}{suffix}"))
}

/// Launch Chrome detached and wait for its debug endpoint to come up.
///
/// The child's stdio is discarded and the handle dropped immediately: the
/// browser outlives this invocation and is only ever reached over CDP.
///
/// # Errors
///
/// Returns `ChromeError::NotFound` when no executable can be located,
/// `ChromeError::LaunchFailed` when spawning fails or the process exits
/// early, and `ChromeError::StartupTimeout` when `/json/version` never
/// answers within the startup window.
pub async fn launch_detached(request: &LaunchRequest) -> Result<(), ChromeError> {
    let executable = match &request.executable {
        Some(path) => path.clone(),
        None => find_executable()?,
    };

    let data_dir = profile_dir(request.port, request.headless);
    std::fs::create_dir_all(&data_dir)?;

    let mut cmd = Command::new(&executable);
    cmd.arg(format!("--remote-debugging-port={}", request.port))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg(format!("--user-data-dir={}", data_dir.display()));
    if request.headless {
        cmd.arg("--headless=new");
    }
    cmd.stdout(Stdio::null()).stderr(Stdio::null()).stdin(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
        ChromeError::LaunchFailed(format!("failed to spawn {}: {e}", executable.display()))
    })?;

    let start = tokio::time::Instant::now();
    loop {
        if start.elapsed() > READY_TIMEOUT {
            return Err(ChromeError::StartupTimeout { port: request.port });
        }

        // A child that exits before the endpoint opens usually means a flag
        // or profile-lock problem; report the exit status instead of timing out.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(ChromeError::LaunchFailed(format!(
                "Chrome exited with status {status} before opening the debug port"
            )));
        }

        if query_version("127.0.0.1", request.port).await.is_ok() {
            // Intentionally leak the child handle: the process keeps running
            // after this invocation ends.
            drop(child);
            return Ok(());
        }

        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dir_is_port_scoped() {
        let headful = profile_dir(9222, false);
        let headless = profile_dir(9222, true);
        assert!(headful.to_string_lossy().ends_with("chrome-cdp-profile-9222"));
        assert!(
            headless
                .to_string_lossy()
                .ends_with("chrome-cdp-profile-9222-headless")
        );
        assert_ne!(headful, headless);
    }

    #[test]
    fn profile_dirs_differ_across_ports() {
        assert_ne!(profile_dir(9222, false), profile_dir(9223, false));
    }
}
