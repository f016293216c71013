//! Default scripts
//!
//! The prelude, generic and domain defaults plus the helper library are loaded
//! once at startup, either fetched from the extension package or taken from
//! the copies compiled into this crate. Until loading settles, callers hold a
//! [`DefaultsState`] instead of reading half-initialized globals.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{decompress, utf16_len, CodecError};
use crate::config::ResourceUris;
use crate::helper::HelperLibrary;
use crate::types::ScriptRole;

const BUILTIN_HELPER_LIBRARY: &str = include_str!("../assets/lib.js");
const BUILTIN_PRELUDE: &str = include_str!("../assets/prelude.js");
const BUILTIN_GENERIC: &str = include_str!("../assets/generic.js");
const BUILTIN_DOMAIN: &str = include_str!("../assets/domain.js");

/// Error type for a single resource fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Failed(String),
    #[error("response is not text: {0}")]
    NotText(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Error type for default loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefaultsError {
    #[error("Default resource '{uri}' unavailable: {reason}")]
    Unavailable { uri: String, reason: FetchError },
    #[error("Default resource '{uri}' is not a valid payload: {source}")]
    Decode { uri: String, source: CodecError },
}

/// Host primitive for reading packaged resources.
///
/// Implementations must give up after `timeout` and report
/// [`FetchError::TimedOut`].
#[allow(async_fn_in_trait)]
pub trait ResourceFetcher {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// Decompressed default bodies plus the helper library.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultScripts {
    pub helper_library: HelperLibrary,
    pub prelude: String,
    pub generic: String,
    pub domain: String,
}

impl DefaultScripts {
    /// Defaults compiled into the crate.
    pub fn builtin() -> Self {
        Self {
            helper_library: HelperLibrary::from_source(BUILTIN_HELPER_LIBRARY),
            prelude: BUILTIN_PRELUDE.to_string(),
            generic: BUILTIN_GENERIC.to_string(),
            domain: BUILTIN_DOMAIN.to_string(),
        }
    }

    /// Default body for a role.
    pub fn for_role(&self, role: ScriptRole) -> &str {
        match role {
            ScriptRole::Prelude => &self.prelude,
            ScriptRole::Generic => &self.generic,
            ScriptRole::Domain => &self.domain,
        }
    }
}

/// Loading state of the defaults.
#[derive(Debug, Clone, Default)]
pub enum DefaultsState {
    #[default]
    Loading,
    Ready(Arc<DefaultScripts>),
    Failed(DefaultsError),
}

impl DefaultsState {
    pub fn ready(defaults: DefaultScripts) -> Self {
        Self::Ready(Arc::new(defaults))
    }

    pub fn as_ready(&self) -> Option<&Arc<DefaultScripts>> {
        match self {
            Self::Ready(defaults) => Some(defaults),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

impl From<Result<DefaultScripts, DefaultsError>> for DefaultsState {
    fn from(result: Result<DefaultScripts, DefaultsError>) -> Self {
        match result {
            Ok(defaults) => Self::ready(defaults),
            Err(e) => Self::Failed(e),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

async fn fetch_one<F: ResourceFetcher>(fetcher: &F, uri: &str, timeout: Duration) -> Result<String, DefaultsError> {
    let text = fetcher.fetch(uri, timeout).await.map_err(|reason| {
        log::error!("Failed to load internal URI '{}': {}", uri, reason);
        DefaultsError::Unavailable {
            uri: uri.to_string(),
            reason,
        }
    })?;

    let plain = decompress(&text).map_err(|source| DefaultsError::Decode {
        uri: uri.to_string(),
        source,
    })?;

    log::debug!(
        "Successfully loaded internal URI '{}' ({:.2} Kb)",
        uri,
        utf16_len(&plain) as f64 / 1024.0
    );
    Ok(plain)
}

/// Fetch all four default resources concurrently.
///
/// Any single failure fails the whole load.
pub async fn load_defaults<F: ResourceFetcher>(
    fetcher: &F,
    uris: &ResourceUris,
    timeout: Duration,
) -> Result<DefaultScripts, DefaultsError> {
    let (lib, scripts) = futures::future::join(
        fetch_one(fetcher, &uris.helper_library, timeout),
        load_script_defaults(fetcher, uris, timeout),
    )
    .await;

    Ok(DefaultScripts {
        helper_library: HelperLibrary::from_source(lib?),
        ..scripts?
    })
}

/// Fetch the three default bodies, leaving the helper library empty.
///
/// The popup never injects, so it has no use for the library.
pub async fn load_script_defaults<F: ResourceFetcher>(
    fetcher: &F,
    uris: &ResourceUris,
    timeout: Duration,
) -> Result<DefaultScripts, DefaultsError> {
    let (prelude, generic, domain) = futures::future::join3(
        fetch_one(fetcher, &uris.prelude, timeout),
        fetch_one(fetcher, &uris.generic, timeout),
        fetch_one(fetcher, &uris.domain, timeout),
    )
    .await;

    Ok(DefaultScripts {
        helper_library: HelperLibrary::default(),
        prelude: prelude?,
        generic: generic?,
        domain: domain?,
    })
}

/// [`ResourceFetcher`] over an in-memory map. Unknown URIs fail.
#[derive(Debug, Clone, Default)]
pub struct MapFetcher {
    resources: std::collections::HashMap<String, Result<String, FetchError>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, uri: &str, text: &str) -> Self {
        self.resources.insert(uri.to_string(), Ok(text.to_string()));
        self
    }

    pub fn failing(mut self, uri: &str, error: FetchError) -> Self {
        self.resources.insert(uri.to_string(), Err(error));
        self
    }

    /// Serve the builtin defaults under the configured URIs.
    pub fn builtin(uris: &ResourceUris) -> Self {
        Self::new()
            .with(&uris.helper_library, BUILTIN_HELPER_LIBRARY)
            .with(&uris.prelude, BUILTIN_PRELUDE)
            .with(&uris.generic, BUILTIN_GENERIC)
            .with(&uris.domain, BUILTIN_DOMAIN)
    }
}

impl ResourceFetcher for MapFetcher {
    async fn fetch(&self, uri: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.resources
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Failed(format!("404 for {}", uri))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compress;
    use futures::executor::block_on;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_builtin_defaults_are_usable() {
        let defaults = DefaultScripts::builtin();
        assert!(!defaults.prelude.is_empty());
        assert!(defaults.helper_library.capabilities().iter().any(|c| c == "waitFor"));
        assert_eq!(defaults.for_role(ScriptRole::Generic), defaults.generic);
    }

    #[test]
    fn test_load_defaults_from_fetcher() {
        let uris = ResourceUris::default();
        let fetcher = MapFetcher::builtin(&uris);
        let loaded = block_on(load_defaults(&fetcher, &uris, TIMEOUT)).unwrap();
        assert_eq!(loaded, DefaultScripts::builtin());
    }

    #[test]
    fn test_compressed_resource_is_decompressed() {
        let uris = ResourceUris::default();
        let fetcher = MapFetcher::builtin(&uris).with(&uris.prelude, &compress("const a = 1;"));
        let loaded = block_on(load_defaults(&fetcher, &uris, TIMEOUT)).unwrap();
        assert_eq!(loaded.prelude, "const a = 1;");
    }

    #[test]
    fn test_timeout_is_unavailable() {
        let uris = ResourceUris::default();
        let fetcher = MapFetcher::builtin(&uris).failing(&uris.generic, FetchError::TimedOut(TIMEOUT));
        let state: DefaultsState = block_on(load_defaults(&fetcher, &uris, TIMEOUT)).into();
        match state {
            DefaultsState::Failed(DefaultsError::Unavailable { uri, reason }) => {
                assert_eq!(uri, uris.generic);
                assert_eq!(reason, FetchError::TimedOut(TIMEOUT));
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_script_defaults_skip_helper_library() {
        let uris = ResourceUris::default();
        let fetcher = MapFetcher::builtin(&uris).failing(&uris.helper_library, FetchError::Failed("404".to_string()));
        let loaded = block_on(load_script_defaults(&fetcher, &uris, TIMEOUT)).unwrap();
        assert!(loaded.helper_library.is_empty());
        assert_eq!(loaded.prelude, DefaultScripts::builtin().prelude);

        assert!(block_on(load_defaults(&fetcher, &uris, TIMEOUT)).is_err());
    }

    #[test]
    fn test_missing_resource_fails() {
        let uris = ResourceUris::default();
        let result = block_on(load_defaults(&MapFetcher::new(), &uris, TIMEOUT));
        assert!(matches!(result, Err(DefaultsError::Unavailable { .. })));
    }

    #[test]
    fn test_state_default_is_loading() {
        assert!(DefaultsState::default().is_loading());
        assert!(DefaultsState::default().as_ready().is_none());
    }
}
