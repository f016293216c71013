//! URL classification
//!
//! Maps a navigated URL to the [`DomainKey`] its scripts are stored under.
//! Works directly on string slices; the only allocation is the returned key.

use crate::types::DomainKey;

/// Protocols the pipeline operates on when no configuration overrides them.
pub const SUPPORTED_PROTOCOLS: &[&str] = &["http", "https", "ftp", "sftp", "file"];

/// Protocol whose URLs all share the `<files>` key.
const FILE_PROTOCOL: &str = "file";

/// Error type for URL classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Failed to parse domain name for URL: {0}")]
    UnparsableUrl(String),
    #[error("Unsupported protocol \"{0}\"")]
    UnsupportedProtocol(String),
}

/// A classified URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub protocol: String,
    pub domain_key: DomainKey,
}

// =============================================================================
// Parsing
// =============================================================================

/// Split a URL into `(protocol, host)` slices.
///
/// Accepts `proto://host[/rest]` and the three-slash `proto:///host[/rest]`
/// form used by local files. The protocol is ASCII letters only. The host runs
/// up to the first `/`, `?` or `#` and is returned verbatim (no case folding,
/// port kept).
#[inline]
pub fn split_url(url: &str) -> Option<(&str, &str)> {
    let bytes = url.as_bytes();

    // Protocol: one or more ASCII letters
    let proto_end = bytes.iter().position(|b| !b.is_ascii_alphabetic())?;
    if proto_end == 0 {
        return None;
    }

    // Separator: "://" with an optional third slash
    let rest = url[proto_end..].strip_prefix("://")?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);

    let host_end = rest
        .bytes()
        .position(|b| b == b'/' || b == b'?' || b == b'#')
        .unwrap_or(rest.len());
    if host_end == 0 {
        return None;
    }

    Some((&url[..proto_end], &rest[..host_end]))
}

/// Classify a URL against the default protocol allow-list.
pub fn classify(url: &str) -> Result<Classified, ClassifyError> {
    classify_with(url, SUPPORTED_PROTOCOLS)
}

/// Classify a URL against an explicit protocol allow-list.
///
/// Protocols are compared case-insensitively; the host is kept as written.
pub fn classify_with<S: AsRef<str>>(url: &str, supported: &[S]) -> Result<Classified, ClassifyError> {
    let (protocol, host) = split_url(url).ok_or_else(|| ClassifyError::UnparsableUrl(url.to_string()))?;

    let protocol = protocol.to_ascii_lowercase();
    if !supported.iter().any(|p| p.as_ref().eq_ignore_ascii_case(&protocol)) {
        return Err(ClassifyError::UnsupportedProtocol(protocol));
    }

    let domain_key = if protocol == FILE_PROTOCOL {
        DomainKey::files()
    } else {
        DomainKey::new(host).ok_or_else(|| ClassifyError::UnparsableUrl(url.to_string()))?
    };

    Ok(Classified { protocol, domain_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> String {
        classify(url).unwrap().domain_key.to_string()
    }

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("https://example.com/path"), Some(("https", "example.com")));
        assert_eq!(split_url("https://example.com"), Some(("https", "example.com")));
        assert_eq!(split_url("file:///home/user/a.html"), Some(("file", "home")));
        assert_eq!(split_url("https://example.com?q=1"), Some(("https", "example.com")));
        assert_eq!(split_url("https://example.com#top"), Some(("https", "example.com")));
        assert_eq!(split_url("about:blank"), None);
        assert_eq!(split_url("https://"), None);
        assert_eq!(split_url("://example.com"), None);
        assert_eq!(split_url("h2tp://example.com"), None);
    }

    #[test]
    fn test_classify_supported_protocols() {
        assert_eq!(key("https://example.com/a/b?c#d"), "example.com");
        assert_eq!(key("http://sub.example.com"), "sub.example.com");
        assert_eq!(key("ftp://files.example.org/pub"), "files.example.org");
        assert_eq!(key("sftp://host.local/"), "host.local");
    }

    #[test]
    fn test_classify_keeps_host_verbatim() {
        assert_eq!(key("https://Example.COM:8080/x"), "Example.COM:8080");
        assert_eq!(key("https://user@example.com/"), "user@example.com");
    }

    #[test]
    fn test_classify_file_urls() {
        assert_eq!(key("file:///home/user/index.html"), "<files>");
        assert_eq!(key("file://server/share/doc.html"), "<files>");
        assert_eq!(classify("file:///C:/x.html").unwrap().protocol, "file");
    }

    #[test]
    fn test_classify_protocol_case_insensitive() {
        assert_eq!(key("HTTPS://example.com/"), "example.com");
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(
            classify("chrome://extensions/"),
            Err(ClassifyError::UnsupportedProtocol("chrome".to_string()))
        );
        assert_eq!(
            classify("chrome-extension://abc/popup.html"),
            Err(ClassifyError::UnparsableUrl("chrome-extension://abc/popup.html".to_string()))
        );
        assert!(matches!(classify("about:blank"), Err(ClassifyError::UnparsableUrl(_))));
        assert!(matches!(classify(""), Err(ClassifyError::UnparsableUrl(_))));
    }

    #[test]
    fn test_classify_with_custom_list() {
        let only_https = ["https"];
        assert!(classify_with("https://a.com", &only_https).is_ok());
        assert!(matches!(
            classify_with("http://a.com", &only_https),
            Err(ClassifyError::UnsupportedProtocol(_))
        ));
    }
}
