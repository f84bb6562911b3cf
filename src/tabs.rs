use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SkillError;

/// Default host/port applied to legacy registry entries.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9222;

/// Where a tab alias points: a target plus the endpoint it lives behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabEntry {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub host: String,
    pub port: u16,
}

/// Registry entries were originally bare targetId strings; those still
/// deserialize, picking up the default endpoint.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full {
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    Legacy(String),
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl From<StoredEntry> for TabEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Full {
                target_id,
                host,
                port,
            } => Self {
                target_id,
                host,
                port,
            },
            StoredEntry::Legacy(target_id) => Self {
                target_id,
                host: default_host(),
                port: DEFAULT_PORT,
            },
        }
    }
}

/// The persistent alias → tab mapping. Aliases are `t1, t2, …` and are
/// never reused: `next_id` only grows.
#[derive(Debug, Default, Serialize)]
pub struct TabRegistry {
    #[serde(rename = "nextId")]
    next_id: u64,
    tabs: BTreeMap<String, TabEntry>,
}

#[derive(Deserialize)]
struct StoredRegistry {
    #[serde(rename = "nextId", default)]
    next_id: u64,
    #[serde(default)]
    tabs: BTreeMap<String, StoredEntry>,
}

/// Errors from registry file operations.
#[derive(Debug)]
pub enum RegistryError {
    Io(std::io::Error),
    InvalidFormat(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "tab registry file error: {e}"),
            Self::InvalidFormat(e) => write!(f, "invalid tab registry: {e}"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidFormat(_) => None,
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RegistryError> for SkillError {
    fn from(e: RegistryError) -> Self {
        SkillError::validation(e.to_string())
    }
}

/// Registry file location: `{temp}/cdp-skill-tabs.json`.
#[must_use]
pub fn registry_path() -> PathBuf {
    std::env::temp_dir().join("cdp-skill-tabs.json")
}

impl TabRegistry {
    /// Load the registry, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidFormat` on malformed JSON and
    /// `RegistryError::Io` on other I/O failures.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(RegistryError::Io(e)),
        };
        let stored: StoredRegistry = serde_json::from_str(&contents)
            .map_err(|e| RegistryError::InvalidFormat(e.to_string()))?;
        let tabs: BTreeMap<String, TabEntry> = stored
            .tabs
            .into_iter()
            .map(|(alias, entry)| (alias, entry.into()))
            .collect();
        // Self-heal registries written before next_id existed: never hand
        // out an alias that's already taken.
        let max_used = tabs
            .keys()
            .filter_map(|alias| alias.strip_prefix('t'))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(Self {
            next_id: stored.next_id.max(max_used + 1).max(1),
            tabs,
        })
    }

    /// Persist atomically: write a temp file beside the target, then rename.
    /// There is no cross-process lock; racing invocations may clobber each
    /// other's newest entries (accepted, per the concurrency model).
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Io` on I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RegistryError::InvalidFormat(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Register a tab under a fresh alias and return the alias.
    pub fn insert(&mut self, entry: TabEntry) -> String {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let alias = format!("t{}", self.next_id);
        self.next_id += 1;
        self.tabs.insert(alias.clone(), entry);
        alias
    }

    /// Remove an alias, returning its entry if it existed.
    pub fn remove(&mut self, alias: &str) -> Option<TabEntry> {
        self.tabs.remove(alias)
    }

    /// Resolve an alias, or fall back to matching a raw targetId.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<(String, TabEntry)> {
        if let Some(entry) = self.tabs.get(key) {
            return Some((key.to_owned(), entry.clone()));
        }
        self.tabs
            .iter()
            .find(|(_, entry)| entry.target_id == key)
            .map(|(alias, entry)| (alias.clone(), entry.clone()))
    }

    /// Find the alias registered for a targetId, if any.
    #[must_use]
    pub fn alias_for_target(&self, target_id: &str) -> Option<String> {
        self.tabs
            .iter()
            .find(|(_, entry)| entry.target_id == target_id)
            .map(|(alias, _)| alias.clone())
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, TabEntry> {
        &self.tabs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str) -> TabEntry {
        TabEntry {
            target_id: target.to_owned(),
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
        }
    }

    #[test]
    fn aliases_are_sequential_and_never_reused() {
        let mut reg = TabRegistry::default();
        let a = reg.insert(entry("T1"));
        let b = reg.insert(entry("T2"));
        assert_eq!(a, "t1");
        assert_eq!(b, "t2");

        reg.remove("t1");
        let c = reg.insert(entry("T3"));
        assert_eq!(c, "t3", "removed aliases must not be recycled");
    }

    #[test]
    fn resolve_by_alias_and_by_target_id() {
        let mut reg = TabRegistry::default();
        let alias = reg.insert(entry("TARGET-A"));
        assert_eq!(reg.resolve(&alias).unwrap().1.target_id, "TARGET-A");

        let (found_alias, found) = reg.resolve("TARGET-A").unwrap();
        assert_eq!(found_alias, alias);
        assert_eq!(found.target_id, "TARGET-A");

        assert!(reg.resolve("missing").is_none());
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabs.json");

        let mut reg = TabRegistry::default();
        reg.insert(TabEntry {
            target_id: "ABC".into(),
            host: "127.0.0.1".into(),
            port: 9333,
        });
        reg.save(&path).unwrap();

        let loaded = TabRegistry::load(&path).unwrap();
        let (alias, entry) = loaded.resolve("t1").unwrap();
        assert_eq!(alias, "t1");
        assert_eq!(entry.port, 9333);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TabRegistry::load(&dir.path().join("absent.json")).unwrap();
        assert!(reg.is_empty());
        // First alias on a fresh registry is t1
        let mut reg = reg;
        assert_eq!(reg.insert(entry("X")), "t1");
    }

    #[test]
    fn legacy_bare_string_entries_get_default_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabs.json");
        std::fs::write(
            &path,
            r#"{"nextId": 3, "tabs": {"t1": "LEGACY-TARGET", "t2": {"targetId": "NEW", "host": "10.0.0.5", "port": 9229}}}"#,
        )
        .unwrap();

        let reg = TabRegistry::load(&path).unwrap();
        let (_, legacy) = reg.resolve("t1").unwrap();
        assert_eq!(legacy.target_id, "LEGACY-TARGET");
        assert_eq!(legacy.host, DEFAULT_HOST);
        assert_eq!(legacy.port, DEFAULT_PORT);

        let (_, full) = reg.resolve("t2").unwrap();
        assert_eq!(full.host, "10.0.0.5");
        assert_eq!(full.port, 9229);
    }

    #[test]
    fn next_id_self_heals_past_existing_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabs.json");
        std::fs::write(&path, r#"{"tabs": {"t7": "OLD"}}"#).unwrap();

        let mut reg = TabRegistry::load(&path).unwrap();
        assert_eq!(reg.insert(entry("NEW")), "t8");
    }

    #[test]
    fn open_then_close_restores_prior_state_except_next_id() {
        let mut reg = TabRegistry::default();
        reg.insert(entry("KEEP"));
        let before: Vec<String> = reg.entries().keys().cloned().collect();

        let alias = reg.insert(entry("TEMP"));
        reg.remove(&alias);

        let after: Vec<String> = reg.entries().keys().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn serialized_shape_matches_contract() {
        let mut reg = TabRegistry::default();
        reg.insert(entry("T"));
        let v = serde_json::to_value(&reg).unwrap();
        assert_eq!(v["nextId"], 2);
        assert_eq!(v["tabs"]["t1"]["targetId"], "T");
        assert_eq!(v["tabs"]["t1"]["host"], "127.0.0.1");
        assert_eq!(v["tabs"]["t1"]["port"], 9222);
    }
}
