//! URL and filename validation
//!
//! Security-focused validation for user inputs:
//! - Platform whitelist for download URLs (YouTube, TikTok, Instagram)
//! - Tracking-parameter stripping
//! - Filename sanitization (remove filesystem-unsafe characters)

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

/// Maximum accepted URL length.
const MAX_URL_LENGTH: usize = 2048;

/// Maximum length of a sanitized filename stem.
const MAX_FILENAME_LENGTH: usize = 100;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("URL must be a non-empty string")]
    Empty,

    #[error("URL too long (max {MAX_URL_LENGTH} characters)")]
    TooLong,

    #[error("Invalid URL format: {0}")]
    InvalidFormat(String),

    #[error("Only HTTP/HTTPS URLs are supported")]
    UnsupportedScheme,

    #[error("Unsupported platform. Supported: YouTube, TikTok, Instagram")]
    UnsupportedPlatform,
}

/// Platform a URL was matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
}

impl Platform {
    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::TikTok => "TikTok",
            Self::Instagram => "Instagram",
        }
    }
}

static PLATFORM_PATTERNS: Lazy<Vec<(Platform, Regex)>> = Lazy::new(|| {
    vec![
        (
            Platform::YouTube,
            Regex::new(r"(?i)^(?:https?://)?(?:www\.|m\.)?youtube\.com/(?:watch\?v=|shorts/)[\w-]+").unwrap(),
        ),
        (
            Platform::YouTube,
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtu\.be/[\w-]+").unwrap(),
        ),
        (
            Platform::TikTok,
            Regex::new(r"(?i)^(?:https?://)?(?:www\.|vm\.|vt\.|m\.|lite\.)?tiktok\.com/[\w@/.-]+").unwrap(),
        ),
        (
            Platform::Instagram,
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?instagram\.com/(?:p|reel|reels|stories)/[\w-]+").unwrap(),
        ),
    ]
});

static URL_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());

/// Finds the first http(s) URL embedded in a message text.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_IN_TEXT.find(text).map(|m| m.as_str())
}

/// Validates a download URL against the platform whitelist.
///
/// Checks length, scheme and host before pattern matching, then returns
/// the parsed URL together with the detected platform.
pub fn validate_url(raw: &str) -> Result<(Url, Platform), ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }
    if raw.len() > MAX_URL_LENGTH {
        return Err(ValidationError::TooLong);
    }

    let parsed = Url::parse(raw).map_err(|e| ValidationError::InvalidFormat(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::UnsupportedScheme);
    }
    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidFormat("missing domain".to_string()));
    }

    for (platform, pattern) in PLATFORM_PATTERNS.iter() {
        if pattern.is_match(raw) {
            return Ok((parsed, *platform));
        }
    }

    Err(ValidationError::UnsupportedPlatform)
}

/// Strips tracking parameters, keeping only the ones the extractor needs
/// (`v`, `list`, `t` for YouTube).
pub fn sanitize_url(url: &Url) -> Url {
    const ESSENTIAL_PARAMS: [&str; 3] = ["v", "list", "t"];

    let mut clean = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| ESSENTIAL_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    clean.set_query(None);
    clean.set_fragment(None);
    if !kept.is_empty() {
        let mut pairs = clean.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
    }
    clean
}

/// Replaces filesystem-unsafe characters and truncates overlong names.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Collapse traversal sequences left over from the char mapping.
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "_");
    }

    if sanitized.chars().count() > MAX_FILENAME_LENGTH {
        sanitized = sanitized.chars().take(MAX_FILENAME_LENGTH).collect();
    }

    let trimmed = sanitized.trim_matches(|c: char| c == '_' || c.is_whitespace());
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}
