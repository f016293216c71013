//! Sentinel-prefixed script compression
//!
//! Stored records are either raw source or an LZ-String UTF-16 payload
//! prefixed with [`COMPRESSION_HEADER`]. The header is two code points that do
//! not occur at the start of legitimate source text, so raw and compressed
//! records can share one key space without a side flag.
//!
//! Compression is advisory: [`encode_for_storage`] only keeps the compressed
//! form when it is strictly smaller than the original.

/// Prefix marking a compressed record (`U+1000 U+4000`).
pub const COMPRESSION_HEADER: &str = "\u{1000}\u{4000}";

/// Error type for payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed compressed payload ({len} code units)")]
    Malformed { len: usize },
    #[error("Compressed payload does not decode to valid UTF-16")]
    InvalidUtf16,
}

/// Returns true if `content` carries the compression header.
#[inline]
pub fn is_compressed(content: &str) -> bool {
    content.starts_with(COMPRESSION_HEADER)
}

/// Every UTF-16 payload ends with this padding unit.
const PAYLOAD_TERMINATOR: char = ' ';

/// Code unit range of the UTF-16 payload alphabet (15 bits offset by 32).
const PAYLOAD_UNITS: std::ops::RangeInclusive<u16> = 0x20..=0x801F;

/// Compress `text` and prefix it with the header.
pub fn compress(text: &str) -> String {
    let mut body = lz_str::compress_to_utf16(text);
    if !body.ends_with(PAYLOAD_TERMINATOR) {
        body.push(PAYLOAD_TERMINATOR);
    }
    let mut out = String::with_capacity(COMPRESSION_HEADER.len() + body.len());
    out.push_str(COMPRESSION_HEADER);
    out.push_str(&body);
    out
}

/// Decompress a record.
///
/// Content without the header is returned unchanged.
pub fn decompress(content: &str) -> Result<String, CodecError> {
    let Some(inner) = content.strip_prefix(COMPRESSION_HEADER) else {
        return Ok(content.to_string());
    };

    let len = utf16_len(inner);
    let well_formed = inner.ends_with(PAYLOAD_TERMINATOR) && inner.encode_utf16().all(|u| PAYLOAD_UNITS.contains(&u));
    if !well_formed {
        return Err(CodecError::Malformed { len });
    }

    let units = lz_str::decompress_from_utf16(inner).ok_or(CodecError::Malformed { len })?;
    String::from_utf16(&units).map_err(|_| CodecError::InvalidUtf16)
}

/// Length in UTF-16 code units, the unit the host storage measures in.
#[inline]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Outcome of [`encode_for_storage`].
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    /// Content to persist, raw or compressed.
    pub content: String,
    pub compressed: bool,
    /// `plain length / compressed length`, in UTF-16 code units.
    pub ratio: f64,
    pub plain_len: usize,
    pub compressed_len: usize,
}

/// Pick the smaller of the raw and compressed forms of `text`.
pub fn encode_for_storage(text: &str) -> Encoded {
    let compressed = compress(text);
    let plain_len = utf16_len(text);
    let compressed_len = utf16_len(&compressed);

    // compressed_len is never zero: the header alone is two units.
    let ratio = plain_len as f64 / compressed_len as f64;

    // Raw text that starts with the header would read back as a payload
    if ratio > 1.0 || is_compressed(text) {
        Encoded {
            content: compressed,
            compressed: true,
            ratio,
            plain_len,
            compressed_len,
        }
    } else {
        log::debug!(
            "Compression ratio is {:.1}, keeping the original ({} units)",
            ratio,
            plain_len
        );
        Encoded {
            content: text.to_string(),
            compressed: false,
            ratio,
            plain_len,
            compressed_len,
        }
    }
}

/// Human-readable size in kilobytes, as shown in save statuses.
pub fn size_in_kb(units: usize) -> String {
    format!("{:.2} Kb", units as f64 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_is_two_code_units() {
        assert_eq!(utf16_len(COMPRESSION_HEADER), 2);
        assert_eq!(COMPRESSION_HEADER, "က䀀");
    }

    #[test]
    fn test_raw_content_passes_through() {
        assert_eq!(decompress("console.log(1)").unwrap(), "console.log(1)");
        assert_eq!(decompress("").unwrap(), "");
    }

    #[test]
    fn test_compress_roundtrip() {
        let script = "const q = (s) => document.querySelector(s);\n".repeat(40);
        let packed = compress(&script);
        assert!(is_compressed(&packed));
        assert_eq!(decompress(&packed).unwrap(), script);
    }

    #[test]
    fn test_header_only_is_malformed() {
        assert!(matches!(decompress(COMPRESSION_HEADER), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_foreign_payload_is_malformed() {
        let truncated = format!("{}x", COMPRESSION_HEADER);
        assert_eq!(decompress(&truncated), Err(CodecError::Malformed { len: 1 }));

        let out_of_alphabet = format!("{}\u{9000} ", COMPRESSION_HEADER);
        assert!(matches!(decompress(&out_of_alphabet), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_payload_is_space_terminated() {
        assert!(compress("hello").ends_with(' '));
    }

    #[test]
    fn test_short_script_is_stored_raw() {
        let encoded = encode_for_storage("a()");
        assert!(!encoded.compressed);
        assert_eq!(encoded.content, "a()");
        assert!(encoded.ratio <= 1.0);
    }

    #[test]
    fn test_repetitive_script_is_stored_compressed() {
        let script = "$lib.hide('.ad-banner');\n".repeat(100);
        let encoded = encode_for_storage(&script);
        assert!(encoded.compressed);
        assert!(encoded.compressed_len < encoded.plain_len);
        assert_eq!(decompress(&encoded.content).unwrap(), script);
    }

    #[test]
    fn test_header_prefixed_text_is_always_compressed() {
        let text = format!("{}a", COMPRESSION_HEADER);
        let encoded = encode_for_storage(&text);
        assert!(encoded.compressed);
        assert_eq!(decompress(&encoded.content).unwrap(), text);
    }

    #[test]
    fn test_size_in_kb() {
        assert_eq!(size_in_kb(1047), "1.02 Kb");
    }

    proptest! {
        #[test]
        fn prop_unprefixed_passthrough(s in "\\PC*") {
            prop_assume!(!s.starts_with(COMPRESSION_HEADER));
            prop_assert_eq!(decompress(&s).unwrap(), s);
        }

        #[test]
        fn prop_compress_roundtrip(s in "\\PC+") {
            prop_assert_eq!(decompress(&compress(&s)).unwrap(), s);
        }

        #[test]
        fn prop_encode_never_expands(s in "\\PC{1,200}") {
            prop_assume!(!s.starts_with(COMPRESSION_HEADER));
            let encoded = encode_for_storage(&s);
            prop_assert!(utf16_len(&encoded.content) <= encoded.plain_len);
            prop_assert_eq!(decompress(&encoded.content).unwrap(), s);
        }
    }
}
