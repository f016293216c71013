//! Crate-level error type
//!
//! Each module owns its own error enum; [`Error`] unifies them for callers
//! that drive the whole pipeline (the CLI and the wasm bindings).

use crate::codec::CodecError;
use crate::defaults::DefaultsError;
use crate::store::StorageError;
use crate::url::ClassifyError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Encountered tab without URL")]
    NoUrl,

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    DefaultResourceUnavailable(#[from] DefaultsError),

    #[error("Defaults are still loading")]
    DefaultsLoading,

    #[error("Invalid domain key: {0:?}")]
    InvalidKey(String),

    #[error("Import rejected: {0}")]
    Import(String),

    #[error("Tab execution failed: {0}")]
    Execute(String),

    /// A save that had to finish before switching scripts failed.
    #[error("{0}")]
    Unsaved(String),
}

impl Error {
    /// True for quota rejections, which keep the editor content untouched.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Storage(StorageError::QuotaExceeded(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let e: Error = StorageError::QuotaExceeded("QUOTA_BYTES".to_string()).into();
        assert!(e.is_quota());

        let e: Error = ClassifyError::UnsupportedProtocol("chrome".to_string()).into();
        assert!(!e.is_quota());
        assert!(matches!(e, Error::Classify(_)));

        let e: Error = CodecError::Malformed { len: 3 }.into();
        assert!(e.to_string().starts_with("Decode error"));
    }
}
