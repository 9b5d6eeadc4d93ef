//! Object key decoding and skip rules.

/// Suffixes of temporary and partial uploads.
const SKIPPED_SUFFIXES: &[&str] = &[".tmp", ".temp", ".DS_Store", ".lock", ".part", ".crdownload"];

/// Decode a notification key: `+` is a space, then percent-decoding.
pub fn decode_key(raw: &str) -> Result<String, String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| format!("key is not valid UTF-8 after decoding: {}", e))
}

/// Decides which object keys never start an execution.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    skip_prefixes: Vec<String>,
}

impl KeyFilter {
    pub fn new(skip_prefixes: Vec<String>) -> Self {
        Self { skip_prefixes }
    }

    /// Why `key` is skipped, or `None` when it should be processed.
    pub fn skip_reason(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return Some("empty key".to_string());
        }

        if let Some(prefix) = self.skip_prefixes.iter().find(|p| key.starts_with(p.as_str())) {
            return Some(format!("under skipped prefix {}", prefix));
        }

        if key.split('/').any(|segment| segment.starts_with('.')) {
            return Some("hidden path segment".to_string());
        }

        if let Some(suffix) = SKIPPED_SUFFIXES.iter().find(|s| key.ends_with(*s)) {
            return Some(format!("temporary file ({})", suffix));
        }

        if key.contains("Thumbs.db") {
            return Some("system file".to_string());
        }

        None
    }
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self::new(vec!["processed/".to_string(), "results/".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key("img/my+photo.png").unwrap(), "img/my photo.png");
        assert_eq!(decode_key("img/caf%C3%A9.png").unwrap(), "img/café.png");
        assert_eq!(decode_key("img/a%2Bb.png").unwrap(), "img/a+b.png");
    }

    #[test]
    fn test_regular_keys_pass() {
        let filter = KeyFilter::default();
        assert_eq!(filter.skip_reason("img/42.png"), None);
        assert_eq!(filter.skip_reason("docs/report.final.pdf"), None);
    }

    #[test]
    fn test_skip_prefixes() {
        let filter = KeyFilter::default();
        assert!(filter.skip_reason("processed/42.json").is_some());
        assert!(filter.skip_reason("results/42.json").is_some());
        assert_eq!(filter.skip_reason("img/processed/42.png"), None);
    }

    #[test]
    fn test_hidden_and_temporary_files() {
        let filter = KeyFilter::default();
        assert!(filter.skip_reason(".env").is_some());
        assert!(filter.skip_reason("img/.cache/42.png").is_some());
        assert!(filter.skip_reason("img/42.png.part").is_some());
        assert!(filter.skip_reason("img/upload.crdownload").is_some());
        assert!(filter.skip_reason("img/Thumbs.db").is_some());
        assert!(filter.skip_reason("img/42.tmp").is_some());
    }

    #[test]
    fn test_custom_prefixes() {
        let filter = KeyFilter::new(vec!["archive/".to_string()]);
        assert!(filter.skip_reason("archive/1.png").is_some());
        assert_eq!(filter.skip_reason("processed/1.png"), None);
    }
}
