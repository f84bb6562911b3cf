use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SkillError;

/// Errors from site-profile storage.
#[derive(Debug)]
pub enum ProfileError {
    NoHomeDir,
    Io(std::io::Error),
    BadDomain(String),
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHomeDir => write!(f, "could not determine home directory"),
            Self::Io(e) => write!(f, "site profile file error: {e}"),
            Self::BadDomain(d) => write!(f, "invalid site profile domain: {d}"),
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProfileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProfileError> for SkillError {
    fn from(e: ProfileError) -> Self {
        SkillError::step_validation(e.to_string())
    }
}

/// Normalize a domain for use as a file stem: lowercase, `www.` stripped,
/// anything outside `[a-zA-Z0-9.-]` replaced with `_`.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.trim().to_ascii_lowercase();
    let stripped = lowered.strip_prefix("www.").unwrap_or(&lowered);
    stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Extract and normalize the domain of a URL, when it has a host.
#[must_use]
pub fn domain_of_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(normalize_domain)
}

/// Profile storage root: `~/.cdp-skill/sites/`.
fn sites_dir() -> Result<PathBuf, ProfileError> {
    dirs::home_dir()
        .map(|home| home.join(".cdp-skill").join("sites"))
        .ok_or(ProfileError::NoHomeDir)
}

fn profile_path(root: &Path, domain: &str) -> Result<PathBuf, ProfileError> {
    let normalized = normalize_domain(domain);
    if normalized.is_empty() || normalized.starts_with('.') {
        return Err(ProfileError::BadDomain(domain.to_owned()));
    }
    Ok(root.join(format!("{normalized}.md")))
}

/// Read a profile from the default store.
///
/// # Errors
///
/// Returns `ProfileError::NoHomeDir` without a home directory, or `Io` on
/// read failures other than not-found.
pub fn read(domain: &str) -> Result<Option<String>, ProfileError> {
    read_from(&sites_dir()?, domain)
}

/// Read a profile from a specific store root (testable variant).
///
/// # Errors
///
/// Same as [`read`].
pub fn read_from(root: &Path, domain: &str) -> Result<Option<String>, ProfileError> {
    let path = profile_path(root, domain)?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProfileError::Io(e)),
    }
}

/// Write a profile, skipping the write when the stored content is already
/// identical. Returns whether anything was written.
///
/// # Errors
///
/// Same failure modes as [`read`].
pub fn write(domain: &str, content: &str) -> Result<bool, ProfileError> {
    write_to(&sites_dir()?, domain, content)
}

/// Write a profile into a specific store root (testable variant).
///
/// # Errors
///
/// Same failure modes as [`read`].
pub fn write_to(root: &Path, domain: &str, content: &str) -> Result<bool, ProfileError> {
    let path = profile_path(root, domain)?;
    if let Ok(existing) = std::fs::read_to_string(&path) {
        if existing == content {
            return Ok(false);
        }
    }
    std::fs::create_dir_all(root)?;
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &path)?;
    Ok(true)
}
