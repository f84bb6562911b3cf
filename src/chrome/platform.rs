use std::path::PathBuf;

use super::ChromeError;

/// Locate a Chrome/Chromium executable: `CHROME_PATH` first, then the
/// platform candidate list.
///
/// # Errors
///
/// Returns `ChromeError::NotFound` when nothing is found.
pub fn find_executable() -> Result<PathBuf, ChromeError> {
    let env_override = std::env::var("CHROME_PATH").ok().map(PathBuf::from);
    find_from(env_override.as_deref())
}

/// Testable core of [`find_executable`] with the env override injected.
fn find_from(env_override: Option<&std::path::Path>) -> Result<PathBuf, ChromeError> {
    if let Some(path) = env_override {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }
    for candidate in candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(ChromeError::NotFound(
        "no Chrome or Chromium executable on this system; set CHROME_PATH".into(),
    ))
}

/// Best-effort check for a running browser started without a CDP port.
///
/// On desktop platforms a user's everyday Chrome typically runs without
/// `--remote-debugging-port`; detecting that tells the caller a fresh
/// CDP-enabled instance must be launched beside it. On Linux this scans
/// `/proc/*/cmdline`; elsewhere it reports `false` and the caller just
/// launches.
#[must_use]
pub fn running_browser_lacks_cdp() -> bool {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        for entry in entries.flatten() {
            let path = entry.path().join("cmdline");
            let Ok(raw) = std::fs::read(&path) else {
                continue;
            };
            let cmdline = String::from_utf8_lossy(&raw);
            let argv0 = cmdline.split('\0').next().unwrap_or_default();
            let is_browser = ["chrome", "chromium"]
                .iter()
                .any(|name| argv0.rsplit('/').next().unwrap_or_default().contains(name));
            if is_browser && !cmdline.contains("--remote-debugging-port") {
                return true;
            }
        }
        false
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Candidate executable paths for the current platform.
fn candidates() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
            PathBuf::from(
                "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            ),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        let path_dirs: Vec<PathBuf> = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .map(PathBuf::from)
            .collect();
        let names = [
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
        ];
        let mut out = Vec::new();
        for name in names {
            for dir in &path_dirs {
                out.push(dir.join(name));
            }
        }
        out
    }

    #[cfg(target_os = "windows")]
    {
        let program_files = std::env::var("ProgramFiles").unwrap_or_default();
        let program_files_x86 = std::env::var("ProgramFiles(x86)").unwrap_or_default();
        let local_app_data = std::env::var("LOCALAPPDATA").unwrap_or_default();
        vec![
            PathBuf::from(&program_files).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&program_files_x86).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&local_app_data).join("Google/Chrome/Application/chrome.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_when_it_exists() {
        let exe = std::env::current_exe().unwrap();
        assert_eq!(find_from(Some(&exe)).unwrap(), exe);
    }

    #[test]
    fn nonexistent_override_is_skipped() {
        let fake = std::path::Path::new("/nonexistent/cdp-skill-test-chrome");
        if let Ok(found) = find_from(Some(fake)) {
            assert_ne!(found.as_path(), fake);
        }
    }

    #[test]
    fn candidate_list_is_not_empty_on_supported_platforms() {
        #[cfg(any(target_os = "macos", target_os = "windows"))]
        assert!(!candidates().is_empty());
        // Linux candidates depend on PATH contents; an empty PATH is legal.
    }
}
