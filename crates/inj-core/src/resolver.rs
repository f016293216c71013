//! Script resolution
//!
//! Pure function of the stored records and the defaults: for one domain key,
//! pick the stored-or-default prelude, generic and domain bodies, decompress
//! them and decide each body's timing. Nothing here is cached across events.

use std::collections::BTreeMap;

use crate::codec::{decompress, CodecError};
use crate::defaults::DefaultScripts;
use crate::types::{DomainKey, ScriptRole, Slot, TabSnapshot, Timing, GENERIC_KEY, PRELUDE_KEY};

/// Directive switching a body to immediate timing.
pub const IMMEDIATE_DIRECTIVE: &str = "#immediate";

/// Where a resolved body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSource {
    Stored,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScript {
    pub slot: Slot,
    pub body: String,
    pub timing: Timing,
    pub source: ScriptSource,
}

impl ResolvedScript {
    pub fn is_immediate(&self) -> bool {
        self.timing == Timing::Immediate
    }
}

/// Everything one navigation event needs to inject.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBundle {
    pub domain_key: DomainKey,
    pub prelude: String,
    pub generic: Option<ResolvedScript>,
    pub domain_script: Option<ResolvedScript>,
    /// Slots dropped because their record failed to decode.
    pub skipped: Vec<(Slot, CodecError)>,
    pub tab: TabSnapshot,
}

impl ResolvedBundle {
    /// Resolved slots in injection order.
    pub fn scripts(&self) -> impl Iterator<Item = &ResolvedScript> {
        self.generic.iter().chain(self.domain_script.iter())
    }
}

/// Decide the timing of a body.
///
/// A body is immediate iff the first line of its trimmed text is a line
/// comment holding exactly `#immediate` (`^//\s*#immediate\s*$`).
pub fn timing_of(body: &str) -> Timing {
    let first_line = body.trim().lines().next().unwrap_or("");
    let directive = first_line
        .trim_end()
        .strip_prefix("//")
        .map(str::trim_start);

    if directive == Some(IMMEDIATE_DIRECTIVE) {
        Timing::Immediate
    } else {
        Timing::Deferred
    }
}

/// Raw (possibly compressed) record for `key`, falling back to the default.
pub fn raw_for<'a>(
    defaults: &'a DefaultScripts,
    stored: &'a BTreeMap<String, String>,
    key: &str,
    role: ScriptRole,
) -> (&'a str, ScriptSource) {
    match stored.get(key) {
        Some(record) => (record.as_str(), ScriptSource::Stored),
        None => (defaults.for_role(role), ScriptSource::Default),
    }
}

fn resolve_slot(
    defaults: &DefaultScripts,
    stored: &BTreeMap<String, String>,
    key: &str,
    role: ScriptRole,
    slot: Slot,
) -> Result<ResolvedScript, CodecError> {
    let (raw, source) = raw_for(defaults, stored, key, role);
    let body = decompress(raw)?;
    Ok(ResolvedScript {
        slot,
        timing: timing_of(&body),
        body,
        source,
    })
}

/// Resolve the bundle for `domain_key`.
///
/// Fails only when the prelude cannot be decoded, since every slot embeds it.
/// A body that fails to decode is recorded in `skipped` instead.
pub fn resolve(
    defaults: &DefaultScripts,
    stored: &BTreeMap<String, String>,
    domain_key: &DomainKey,
    tab: &TabSnapshot,
) -> Result<ResolvedBundle, CodecError> {
    let (raw_prelude, _) = raw_for(defaults, stored, PRELUDE_KEY, ScriptRole::Prelude);
    let prelude = decompress(raw_prelude)?;

    let mut skipped = Vec::new();
    let mut take = |result: Result<ResolvedScript, CodecError>, slot: Slot| match result {
        Ok(script) => Some(script),
        Err(e) => {
            log::warn!("[{}] Skipping {}: {}", domain_key, slot, e);
            skipped.push((slot, e));
            None
        }
    };

    let generic = take(
        resolve_slot(defaults, stored, GENERIC_KEY, ScriptRole::Generic, Slot::Generic),
        Slot::Generic,
    );

    if stored.contains_key(domain_key.as_str()) {
        log::debug!("[{}] Loaded saved script", domain_key);
    } else {
        log::debug!("[{}] No saved script, using default", domain_key);
    }
    let domain_script = take(
        resolve_slot(
            defaults,
            stored,
            domain_key.as_str(),
            ScriptRole::Domain,
            Slot::DomainScript,
        ),
        Slot::DomainScript,
    );

    Ok(ResolvedBundle {
        domain_key: domain_key.clone(),
        prelude,
        generic,
        domain_script,
        skipped,
        tab: tab.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compress, COMPRESSION_HEADER};
    use crate::helper::HelperLibrary;

    fn defaults() -> DefaultScripts {
        DefaultScripts {
            helper_library: HelperLibrary::default(),
            prelude: "const q = 1;".to_string(),
            generic: "generic()".to_string(),
            domain: "// default".to_string(),
        }
    }

    fn key(s: &str) -> DomainKey {
        DomainKey::new(s).unwrap()
    }

    fn tab() -> TabSnapshot {
        TabSnapshot::new(1, "https://example.com/", "complete")
    }

    #[test]
    fn test_timing_of() {
        assert_eq!(timing_of("// #immediate\nalert(1)"), Timing::Immediate);
        assert_eq!(timing_of("//#immediate"), Timing::Immediate);
        assert_eq!(timing_of("\n\n   //   #immediate   \r\nalert(1)"), Timing::Immediate);
        assert_eq!(timing_of("// #immediate please\nalert(1)"), Timing::Deferred);
        assert_eq!(timing_of("// #Immediate\nalert(1)"), Timing::Deferred);
        assert_eq!(timing_of("alert(1)\n// #immediate"), Timing::Deferred);
        assert_eq!(timing_of("/* #immediate */"), Timing::Deferred);
        assert_eq!(timing_of(""), Timing::Deferred);
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let bundle = resolve(&defaults(), &BTreeMap::new(), &key("example.com"), &tab()).unwrap();
        assert_eq!(bundle.prelude, "const q = 1;");
        let generic = bundle.generic.as_ref().unwrap();
        assert_eq!(generic.body, "generic()");
        assert_eq!(generic.source, ScriptSource::Default);
        let domain = bundle.domain_script.as_ref().unwrap();
        assert_eq!(domain.body, "// default");
        assert_eq!(domain.timing, Timing::Deferred);
        assert!(bundle.skipped.is_empty());
    }

    #[test]
    fn test_stored_overrides_and_decompresses() {
        let stored = BTreeMap::from([
            ("<prelude>".to_string(), compress("const p = 2;")),
            ("<generic>".to_string(), "// #immediate\ng()".to_string()),
            ("example.com".to_string(), compress("console.log(1)")),
            ("other.com".to_string(), "other()".to_string()),
        ]);
        let bundle = resolve(&defaults(), &stored, &key("example.com"), &tab()).unwrap();

        assert_eq!(bundle.prelude, "const p = 2;");
        let generic = bundle.generic.as_ref().unwrap();
        assert_eq!(generic.timing, Timing::Immediate);
        assert_eq!(generic.source, ScriptSource::Stored);
        let domain = bundle.domain_script.as_ref().unwrap();
        assert_eq!(domain.body, "console.log(1)");
        assert_eq!(domain.source, ScriptSource::Stored);
        assert_eq!(domain.slot, Slot::DomainScript);
    }

    #[test]
    fn test_timing_is_per_body() {
        let stored = BTreeMap::from([("a.com".to_string(), "// #immediate\nalert(1)".to_string())]);
        let bundle = resolve(&defaults(), &stored, &key("a.com"), &tab()).unwrap();
        assert!(!bundle.generic.as_ref().unwrap().is_immediate());
        assert!(bundle.domain_script.as_ref().unwrap().is_immediate());
    }

    #[test]
    fn test_malformed_body_skips_only_that_slot() {
        let malformed = format!("{}x", COMPRESSION_HEADER);
        let stored = BTreeMap::from([("a.com".to_string(), malformed)]);
        let bundle = resolve(&defaults(), &stored, &key("a.com"), &tab()).unwrap();

        assert!(bundle.generic.is_some());
        assert!(bundle.domain_script.is_none());
        assert_eq!(bundle.skipped.len(), 1);
        assert_eq!(bundle.skipped[0].0, Slot::DomainScript);
        assert_eq!(bundle.scripts().count(), 1);
    }

    #[test]
    fn test_malformed_prelude_fails_bundle() {
        let stored = BTreeMap::from([("<prelude>".to_string(), COMPRESSION_HEADER.to_string())]);
        assert!(resolve(&defaults(), &stored, &key("a.com"), &tab()).is_err());
    }

    #[test]
    fn test_files_key_uses_domain_default() {
        let bundle = resolve(&defaults(), &BTreeMap::new(), &DomainKey::files(), &tab()).unwrap();
        assert_eq!(bundle.domain_script.unwrap().body, "// default");
    }
}
