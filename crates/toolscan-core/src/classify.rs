use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Keywords that mark a license string as open source.
const OPEN_KEYWORDS: &[&str] = &[
    "apache",
    "mit",
    "gpl",
    "bsd",
    "lgpl",
    "mpl",
    "开源",
    "open source",
    "oss",
    "mozilla",
    "eclipse",
    "agpl",
    "cc0",
    "creative commons",
];

/// Keywords that mark a license string as commercial or proprietary.
const COMMERCIAL_KEYWORDS: &[&str] = &[
    "商业",
    "企业",
    "commercial",
    "付费",
    "专有",
    "proprietary",
    "enterprise",
    "subscription",
    "许可",
];

static OPEN_MATCHER: Lazy<Option<AhoCorasick>> = Lazy::new(|| build_matcher(OPEN_KEYWORDS));
static COMMERCIAL_MATCHER: Lazy<Option<AhoCorasick>> =
    Lazy::new(|| build_matcher(COMMERCIAL_KEYWORDS));

fn build_matcher(keywords: &[&str]) -> Option<AhoCorasick> {
    match AhoCorasick::new(keywords) {
        Ok(automaton) => Some(automaton),
        Err(err) => {
            tracing::error!(error = %err, "failed to build license keyword automaton");
            None
        }
    }
}

/// Coarse license buckets used for list filtering and badge styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseCategory {
    Open,
    Commercial,
    Other,
    None,
}

impl LicenseCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Commercial => "commercial",
            Self::Other => "other",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for LicenseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorize free-text license information.
///
/// Matching is a case-insensitive substring search. Open-source keywords are
/// checked first, so `"Apache 2.0 with commercial support"` is `Open`. Blank
/// or missing text is `None`; text matching neither keyword set is `Other`.
pub fn classify(license: Option<&str>) -> LicenseCategory {
    let Some(text) = license.map(str::trim).filter(|text| !text.is_empty()) else {
        return LicenseCategory::None;
    };
    let lowered = text.to_lowercase();
    if contains_any(&OPEN_MATCHER, &lowered) {
        LicenseCategory::Open
    } else if contains_any(&COMMERCIAL_MATCHER, &lowered) {
        LicenseCategory::Commercial
    } else {
        LicenseCategory::Other
    }
}

fn contains_any(matcher: &Option<AhoCorasick>, haystack: &str) -> bool {
    matcher
        .as_ref()
        .map(|automaton| automaton.is_match(haystack))
        .unwrap_or(false)
}
