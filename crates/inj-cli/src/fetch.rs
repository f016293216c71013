//! Default resources read from a directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use inj_core::{FetchError, ResourceFetcher};

/// Resolves each resource URI by file name inside `root`, so
/// `../defaults/prelude.js` reads `<root>/prelude.js`.
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        Path::new(uri).file_name().map(|name| self.root.join(name))
    }
}

impl ResourceFetcher for DirFetcher {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<String, FetchError> {
        let path = self
            .resolve(uri)
            .ok_or_else(|| FetchError::Failed(format!("no file name in '{}'", uri)))?;

        let bytes = tokio::time::timeout(timeout, tokio::fs::read(&path))
            .await
            .map_err(|_| FetchError::TimedOut(timeout))?
            .map_err(|e| FetchError::Failed(format!("{}: {}", path.display(), e)))?;

        String::from_utf8(bytes).map_err(|e| FetchError::NotText(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inj_core::config::ResourceUris;
    use inj_core::load_defaults;
    use tempfile::tempdir;

    #[test]
    fn test_loads_defaults_from_directory() {
        let dir = tempdir().unwrap();
        for (name, text) in [
            ("lib.js", "declare(\"q\", (s) => document.querySelector(s))"),
            ("prelude.js", "const { q } = $lib"),
            ("generic.js", ""),
            ("domain.js", "// here"),
        ] {
            std::fs::write(dir.path().join(name), text).unwrap();
        }

        let fetcher = DirFetcher::new(dir.path());
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let defaults = runtime
            .block_on(load_defaults(&fetcher, &ResourceUris::default(), Duration::from_secs(1)))
            .unwrap();

        assert_eq!(defaults.prelude, "const { q } = $lib");
        assert_eq!(defaults.domain, "// here");
        assert_eq!(defaults.helper_library.capabilities(), ["q"]);
    }

    #[test]
    fn test_missing_and_binary_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bin.js"), [0xff, 0xfe, 0x00]).unwrap();
        let fetcher = DirFetcher::new(dir.path());
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let missing = runtime.block_on(fetcher.fetch("./nope.js", Duration::from_secs(1)));
        assert!(matches!(missing, Err(FetchError::Failed(_))));

        let binary = runtime.block_on(fetcher.fetch("./bin.js", Duration::from_secs(1)));
        assert!(matches!(binary, Err(FetchError::NotText(_))));
    }
}
