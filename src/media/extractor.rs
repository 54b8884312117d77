use once_cell::sync::Lazy;
use regex::Regex;

pub struct ExtractorRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub capture_index: usize,
}

impl ExtractorRule {
    fn new(name: &'static str, pattern: &str, capture_index: usize) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("Static extractor pattern should compile"),
            capture_index,
        }
    }

    fn capture<'h>(&self, html: &'h str) -> Option<&'h str> {
        self.pattern
            .captures(html)
            .and_then(|caps| caps.get(self.capture_index))
            .map(|m| m.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// evaluated top to bottom, player pages often match more than one of these and the
/// order decides which url is the real file
pub static EXTRACTOR_RULES: Lazy<Vec<ExtractorRule>> = Lazy::new(|| {
    vec![
        ExtractorRule::new("file", r#"\bfile\s*:\s*"([^"]+)""#, 1),
        ExtractorRule::new("src", r#"\bsrc\s*:\s*"([^"]+)""#, 1),
        ExtractorRule::new("source-tag", r#"(?i)<source\b[^>]*?\ssrc\s*=\s*"([^"]+)""#, 1),
        ExtractorRule::new("video-tag", r#"(?i)video[^>]*?\bsrc\s*=\s*"([^"]+)""#, 1),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub rule: &'static str,
    pub url: String,
}

/// inline players escape slashes in js strings and entities in attributes
fn clean_capture(raw: &str) -> String {
    raw.trim().replace("\\/", "/").replace("&amp;", "&")
}

pub fn extract_match(html: &str) -> Option<Extracted> {
    EXTRACTOR_RULES.iter().find_map(|rule| {
        rule.capture(html).map(|raw| Extracted {
            rule: rule.name,
            url: clean_capture(raw),
        })
    })
}

pub fn extract(html: &str) -> Option<String> {
    extract_match(html).map(|m| m.url)
}
