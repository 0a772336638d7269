//! Backend settings, process-wide configuration, and fingerprint resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use runboard_core::WORKFLOW_QUEUE_PREFIX;
use serde::{Deserialize, Serialize};

/// Backend kind (`memory`, `postgres`, ...).
pub const TARGET_WORLD: &str = "WORKFLOW_TARGET_WORLD";
/// Connection target, usually a URL.
pub const CONNECTION_URL: &str = "WORKFLOW_CONNECTION_URL";
/// Credential presented to the backend.
pub const AUTH_TOKEN: &str = "WORKFLOW_AUTH_TOKEN";
/// Local data directory for file-backed backends.
pub const DATA_DIR: &str = "WORKFLOW_DATA_DIR";
pub const PROJECT: &str = "WORKFLOW_PROJECT";
pub const ENVIRONMENT: &str = "WORKFLOW_ENVIRONMENT";

/// Every named setting the control plane understands.
pub const KNOWN_SETTINGS: [&str; 6] = [
    TARGET_WORLD,
    CONNECTION_URL,
    AUTH_TOKEN,
    DATA_DIR,
    PROJECT,
    ENVIRONMENT,
];

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Mapping of named backend settings.
///
/// Empty values are never stored, so "absent" and "empty" are the same thing.
/// Keys are kept sorted, which makes equality independent of insertion order.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, or remove it when `value` is empty.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.trim().is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    /// Builder form of [`Settings::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `true` when no setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of present settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Present settings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        for (k, v) in iter {
            settings.set(k, v);
        }
        settings
    }
}

impl From<BTreeMap<String, String>> for Settings {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Settings> for BTreeMap<String, String> {
    fn from(settings: Settings) -> Self {
        settings.0
    }
}

// Values may hold credentials; only keys are printed.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// ConfigFingerprint
// ---------------------------------------------------------------------------

/// Canonical identity of an effective configuration.
///
/// Serialization of the key-sorted settings. Two mappings with the same pairs
/// produce the same fingerprint regardless of how they were built.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    #[must_use]
    pub fn of(settings: &Settings) -> Self {
        let ordered: serde_json::Map<String, serde_json::Value> = settings
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        Self(serde_json::Value::Object(ordered).to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest, safe to log.
    #[must_use]
    pub fn digest(&self) -> String {
        let hash = blake3::hash(self.0.as_bytes());
        hex::encode(&hash.as_bytes()[..6])
    }
}

impl fmt::Debug for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigFingerprint({})", self.digest())
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest())
    }
}

// ---------------------------------------------------------------------------
// AmbientConfig
// ---------------------------------------------------------------------------

/// Process-wide backend settings.
///
/// Seeded once at startup (from the environment). When that leaves it empty,
/// the first connection the instance cache constructs publishes its settings
/// here, so the scheduling layer observes the settings that connection was
/// built with. Once non-empty it never changes.
#[derive(Debug, Default)]
pub struct AmbientConfig {
    settings: RwLock<Settings>,
}

impl AmbientConfig {
    /// Process-wide settings seeded with `initial`.
    #[must_use]
    pub fn new(initial: Settings) -> Self {
        Self {
            settings: RwLock::new(initial),
        }
    }

    /// Copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    /// `true` until some settings have been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.read().is_empty()
    }

    /// Install `settings` as the process-wide mapping unless one is already
    /// present. The check and the write happen under one lock, so the first
    /// publisher wins. Returns whether `settings` were installed.
    pub fn publish_if_empty(&self, settings: &Settings) -> bool {
        if settings.is_empty() {
            return false;
        }
        let mut current = self.settings.write();
        if !current.is_empty() {
            return false;
        }
        *current = settings.clone();
        true
    }
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Effective configuration for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub fingerprint: ConfigFingerprint,
    pub settings: Settings,
}

/// Chooses the effective settings for a call.
///
/// Non-empty process-wide settings are authoritative and the caller override
/// is ignored entirely. Otherwise the override is used as-is (possibly empty,
/// in which case the backend falls back to its defaults).
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    ambient: Arc<AmbientConfig>,
}

impl ConfigResolver {
    #[must_use]
    pub fn new(ambient: Arc<AmbientConfig>) -> Self {
        Self { ambient }
    }

    #[must_use]
    pub fn ambient(&self) -> &Arc<AmbientConfig> {
        &self.ambient
    }

    #[must_use]
    pub fn resolve(&self, caller_override: &Settings) -> ResolvedConfig {
        let process_wide = self.ambient.snapshot();
        let settings = if process_wide.is_empty() {
            caller_override.clone()
        } else {
            process_wide
        };
        ResolvedConfig {
            fingerprint: ConfigFingerprint::of(&settings),
            settings,
        }
    }
}

/// Backend kind selected by `settings`.
///
/// The single source of truth for both connection construction and the
/// display configuration.
#[must_use]
pub fn resolve_backend<'a>(settings: &'a Settings, default_backend: &'a str) -> &'a str {
    settings.get(TARGET_WORLD).unwrap_or(default_backend)
}

// ---------------------------------------------------------------------------
// ControlPlaneConfig
// ---------------------------------------------------------------------------

/// Tunables of the run control plane.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Maximum number of events inspected when waking a run.
    pub event_scan_limit: usize,
    /// Prefix of the per-workflow dispatch queues.
    pub queue_prefix: String,
    /// Backend used when no setting names one.
    pub default_backend: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            event_scan_limit: 1000,
            queue_prefix: WORKFLOW_QUEUE_PREFIX.to_string(),
            default_backend: "memory".to_string(),
        }
    }
}
