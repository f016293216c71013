//! Core type definitions for Injector
//!
//! These types are shared by the background pipeline and the popup flow.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Domain Keys
// =============================================================================

/// Storage key of the global pre-script.
pub const PRELUDE_KEY: &str = "<prelude>";
/// Storage key of the script run on every page after the prelude.
pub const GENERIC_KEY: &str = "<generic>";
/// Storage key shared by every local `file://` URL.
pub const FILES_KEY: &str = "<files>";

/// Normalized storage partition identifier.
///
/// Either a hostname exactly as it appeared in the URL, or one of the
/// reserved keys. Real hostnames cannot contain `<` or `>`, so the reserved
/// keys never collide with a domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainKey(String);

impl DomainKey {
    /// Build a key from a raw string.
    /// Returns None for empty strings and strings carrying a path.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.contains('/') {
            return None;
        }
        Some(Self(raw))
    }

    pub fn prelude() -> Self {
        Self(PRELUDE_KEY.to_string())
    }

    pub fn generic() -> Self {
        Self(GENERIC_KEY.to_string())
    }

    pub fn files() -> Self {
        Self(FILES_KEY.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Role of the script stored under this key.
    pub fn role(&self) -> ScriptRole {
        match self.0.as_str() {
            PRELUDE_KEY => ScriptRole::Prelude,
            GENERIC_KEY => ScriptRole::Generic,
            _ => ScriptRole::Domain,
        }
    }

    /// True for `<prelude>`, `<generic>` and `<files>`.
    pub fn is_reserved(&self) -> bool {
        matches!(self.0.as_str(), PRELUDE_KEY | GENERIC_KEY | FILES_KEY)
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DomainKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value.clone()).ok_or_else(|| format!("invalid domain key: {:?}", value))
    }
}

impl From<DomainKey> for String {
    fn from(key: DomainKey) -> Self {
        key.0
    }
}

// =============================================================================
// Script Roles and Slots
// =============================================================================

/// Which default applies to a key when nothing is stored for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptRole {
    Prelude,
    Generic,
    Domain,
}

/// Logical injection slot. Each slot gets its own code unit and run-once guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Generic,
    DomainScript,
}

impl Slot {
    /// Identifier-safe name, used in the page-global guard flag.
    pub const fn var_name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::DomainScript => "domainScript",
        }
    }

    /// Human-readable name for logs.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::DomainScript => "domain script",
        }
    }

    /// Name of the page-global run-once flag for this slot.
    pub fn guard_flag(self) -> String {
        format!("$injector_{}_run", self.var_name())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// =============================================================================
// Timing
// =============================================================================

/// When a resolved body is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    /// Injected at document start, even while the tab is still loading.
    Immediate,
    /// Injected at document idle, once the tab reports `complete`.
    Deferred,
}

impl Timing {
    pub const fn run_at(self) -> RunAt {
        match self {
            Self::Immediate => RunAt::DocumentStart,
            Self::Deferred => RunAt::DocumentIdle,
        }
    }
}

/// Wire value of the host's `runAt` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    DocumentStart,
    DocumentIdle,
}

impl RunAt {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentStart => "document_start",
            Self::DocumentIdle => "document_idle",
        }
    }
}

// =============================================================================
// Tab Metadata
// =============================================================================

/// Navigation status value reported once a tab finished loading.
pub const STATUS_COMPLETE: &str = "complete";

/// Snapshot of the host's tab description, captured at event time.
///
/// The raw object is kept verbatim so it can be handed to user scripts as
/// `__tab`; `id`, `url` and `status` are lifted out for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TabSnapshot {
    pub id: Option<i64>,
    pub url: Option<String>,
    pub status: Option<String>,
    raw: serde_json::Value,
}

impl TabSnapshot {
    pub fn from_value(raw: serde_json::Value) -> Self {
        let id = raw.get("id").and_then(|v| v.as_i64());
        let url = raw
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let status = raw.get("status").and_then(|v| v.as_str()).map(str::to_string);
        Self { id, url, status, raw }
    }

    /// Minimal snapshot, mostly useful for the CLI and tests.
    pub fn new(id: i64, url: &str, status: &str) -> Self {
        Self::from_value(serde_json::json!({
            "id": id,
            "url": url,
            "status": status,
        }))
    }

    pub fn is_complete(&self) -> bool {
        self.status.as_deref() == Some(STATUS_COMPLETE)
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}
