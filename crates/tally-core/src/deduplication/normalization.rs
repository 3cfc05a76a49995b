//! Field normalization for duplicate comparison

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// One trailing corporate suffix token, with an optional trailing
    /// period. The `\s+` anchor keeps a bare suffix word ("Inc") intact.
    static ref CORPORATE_SUFFIX: Regex = Regex::new(
        r"(?i)\s+(inc|llc|corp|corporation|ltd|limited|co|company|group|holdings|solutions|systems|services|technologies|tech)\.?\s*$"
    )
    .expect("corporate suffix pattern");
}

/// Normalize an email address for exact-key comparison.
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Normalize a person or company name for exact-key comparison.
pub fn normalize_name(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Normalize a website for exact-key comparison.
///
/// Strips a leading scheme, a leading `www.`, and one trailing slash.
pub fn normalize_website(s: &str) -> String {
    let mut result = s.trim().to_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = result.strip_prefix(scheme) {
            result = rest.to_string();
            break;
        }
    }
    if let Some(rest) = result.strip_prefix("www.") {
        result = rest.to_string();
    }
    if let Some(rest) = result.strip_suffix('/') {
        result = rest.to_string();
    }
    result
}

/// Normalize a phone number: strip spaces, hyphens, parentheses, periods.
pub fn normalize_phone(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_ascii_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect()
}

/// Normalize a company name for similarity grouping.
///
/// Applies [`normalize_name`], then strips at most one trailing corporate
/// suffix token ("Acme Inc" and "Acme Corp." both become "acme"). Never
/// used for exact-key matching.
pub fn normalize_company_name(s: &str) -> String {
    let normalized = normalize_name(s);
    CORPORATE_SUFFIX.replace(&normalized, "").trim().to_string()
}
