//! Hub profiles and run policies - serde structs for
//! `~/.config/forgesync/config.json`.
//!
//! Pure types and parsing only. Transport construction lives in
//! forgesync-client; flag handling lives in the binary.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 32;

/// Connection settings for one hub.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubProfile {
    pub url: Option<String>,
    pub token: Option<String>,
    pub insecure: bool,
    pub chunk_size: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl HubProfile {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS)
    }
}

/// On-disk client configuration: named hub profiles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub profiles: HashMap<String, HubProfile>,
    pub default_profile: Option<String>,
}

impl ClientConfig {
    /// Load from a specific path. Missing or unreadable files yield the
    /// default (empty) configuration; malformed JSON is an error.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e))),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Discover from the default path.
    pub fn discover() -> crate::Result<Self> {
        Self::load(&Self::default_path())
    }

    /// Default path: `<config dir>/forgesync/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("forgesync")
            .join("config.json")
    }

    /// Resolve a profile by name, falling back to the configured default
    /// profile, then to an empty profile.
    pub fn resolve(&self, name: Option<&str>) -> crate::Result<HubProfile> {
        let selected = name.or(self.default_profile.as_deref());
        match selected {
            Some(n) => self
                .profiles
                .get(n)
                .cloned()
                .ok_or_else(|| crate::Error::Config(format!("unknown profile `{}`", n))),
            None => Ok(HubProfile::default()),
        }
    }
}

/// What to do when the same `(kind, name)` is declared twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedefinePolicy {
    #[default]
    Error,
    Replace,
    Warn,
    Skip,
}

impl std::str::FromStr for RedefinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "replace" => Ok(Self::Replace),
            "warn" => Ok(Self::Warn),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown redefine policy `{}` (expected error, replace, warn, or skip)",
                other
            )),
        }
    }
}

/// Per-run behavior knobs shared by the namespace, solver, and engine.
#[derive(Debug, Clone)]
pub struct RunPolicies {
    pub redefine: RedefinePolicy,
    /// Drop entities whose dependency closure contains a phantom instead of
    /// refusing the run.
    pub skip_phantoms: bool,
    /// Probe undeclared referenced keys against the hub and accept the ones
    /// that already exist there.
    pub check_remote: bool,
    pub max_expansion_depth: usize,
    /// Emit fields whose desired value equals the kind's default.
    pub include_defaults: bool,
}

impl Default for RunPolicies {
    fn default() -> Self {
        Self {
            redefine: RedefinePolicy::Error,
            skip_phantoms: false,
            check_remote: false,
            max_expansion_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            include_defaults: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_is_default() {
        let config = ClientConfig::load(Path::new("/nonexistent/forgesync.json")).unwrap();
        assert!(config.profiles.is_empty());
        assert!(config.resolve(None).unwrap().url.is_none());
    }

    #[test]
    fn profile_resolution() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "default_profile": "staging",
                "profiles": {{
                    "staging": {{ "url": "https://hub.stg.example.com/rpc", "chunk_size": 25 }},
                    "prod": {{ "url": "https://hub.example.com/rpc" }}
                }}
            }}"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        let staging = config.resolve(None).unwrap();
        assert_eq!(staging.url.as_deref(), Some("https://hub.stg.example.com/rpc"));
        assert_eq!(staging.chunk_size(), 25);

        let prod = config.resolve(Some("prod")).unwrap();
        assert_eq!(prod.chunk_size(), DEFAULT_CHUNK_SIZE);

        assert!(config.resolve(Some("missing")).is_err());
    }

    #[test]
    fn redefine_policy_parses() {
        assert_eq!("warn".parse::<RedefinePolicy>(), Ok(RedefinePolicy::Warn));
        assert!("loud".parse::<RedefinePolicy>().is_err());
    }
}
