//! Version-token scan for base/adapter compatibility (spec §4.4).
//!
//! Grounded in `original_source/src/io/model_version.c`'s
//! `extract_model_version`: scans the first 4 KiB of a file for an
//! `X.Y.Z` token where each component is a single digit, falling back to
//! `1.2.1` when no token is found (the original's documented fallback
//! "to avoid breaking existing models").

const SCAN_WINDOW: usize = 4096;

/// A `major.minor.patch` version extracted from (or assumed for) a model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionToken {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Scans `bytes` (expected to be the first `SCAN_WINDOW` bytes of a model
/// file) for a single-digit `X.Y.Z` token.
pub fn extract_version_token(bytes: &[u8]) -> VersionToken {
    let window = &bytes[..bytes.len().min(SCAN_WINDOW)];
    for i in 0..window.len().saturating_sub(4) {
        let is_digit = |b: u8| b.is_ascii_digit();
        if is_digit(window[i])
            && window[i] != b'0'
            && window[i + 1] == b'.'
            && is_digit(window[i + 2])
            && window[i + 3] == b'.'
            && is_digit(window[i + 4])
        {
            return VersionToken {
                major: window[i] - b'0',
                minor: window[i + 2] - b'0',
                patch: window[i + 4] - b'0',
            };
        }
    }
    VersionToken {
        major: 1,
        minor: 2,
        patch: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_embedded_version_token() {
        let bytes = b"some header junk 2.4.6 trailing bytes";
        let version = extract_version_token(bytes);
        assert_eq!(version, VersionToken { major: 2, minor: 4, patch: 6 });
    }

    #[test]
    fn falls_back_to_1_2_1_when_absent() {
        let bytes = b"no version information here at all";
        let version = extract_version_token(bytes);
        assert_eq!(version, VersionToken { major: 1, minor: 2, patch: 1 });
    }

    #[test]
    fn display_formats_as_dotted_triple() {
        let version = VersionToken { major: 3, minor: 0, patch: 9 };
        assert_eq!(version.to_string(), "3.0.9");
    }
}
