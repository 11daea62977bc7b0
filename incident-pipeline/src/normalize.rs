//! Fingerprinting, CVE extraction and canonical clustering keys.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static CVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("CVE pattern is valid")
});

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Length of the fingerprint prefix used in fallback keys.
pub const KEY_FINGERPRINT_LEN: usize = 12;

/// FNV-1a over the UTF-8 bytes, rendered as 16 lowercase hex digits.
///
/// Exact-duplicate detection only. Not collision resistant.
pub fn hash_content(text: &str) -> String {
    let hash = text.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("{:016x}", hash)
}

/// Every distinct CVE id in `text`, upper-cased, in first-seen order.
pub fn extract_cves(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CVE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .filter(|cve| seen.insert(cve.clone()))
        .collect()
}

/// Deterministic cluster key for a document.
///
/// With CVEs present the key is the lexicographically smallest id, so documents
/// about the same CVE land on the same incident whichever arrives first. Otherwise
/// it is `source:YYYY-MM-DD:prefix` where the prefix comes from the fingerprint, the
/// URL hash or a hash of `source-date`, in that order.
pub fn make_canonical_key(
    cves: &[String],
    source: Option<&str>,
    date: Option<&str>,
    fingerprint: Option<&str>,
    url: Option<&str>,
) -> String {
    if let Some(smallest) = cves.iter().map(|c| c.to_uppercase()).min() {
        return smallest;
    }

    let source = source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("misc")
        .to_lowercase();
    let date: String = date.unwrap_or("").trim().chars().take(10).collect();
    let date = if date.is_empty() { "unknown".to_string() } else { date };

    let fingerprint = match (fingerprint, url) {
        (Some(fp), _) if !fp.is_empty() => prefix(fp),
        (_, Some(url)) if !url.is_empty() => prefix(&hash_content(url)),
        _ => prefix(&hash_content(&format!("{}-{}", source, date))),
    };

    format!("{}:{}:{}", source, date, fingerprint)
}

fn prefix(s: &str) -> String {
    s.chars().take(KEY_FINGERPRINT_LEN).collect()
}
