//! Minimal helpers for the engine's XML exchange format
//!
//! Job and folder definitions are small, flat documents; these helpers cover
//! escaping text content and reading back single elements.

use regex_lite::Regex;
use std::sync::LazyLock;

static RESOURCE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<resourceVersion>([^<]*)</resourceVersion>").expect("valid stamp pattern")
});

/// Escapes text for use as element content or attribute value
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape`]
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Reads the resource-version stamp persisted in a job definition
pub fn resource_version(xml: &str) -> Option<String> {
    RESOURCE_VERSION
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()))
        .filter(|version| !version.is_empty())
}
