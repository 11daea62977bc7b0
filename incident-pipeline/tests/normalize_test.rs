use incident_pipeline::normalize::{extract_cves, hash_content, make_canonical_key, KEY_FINGERPRINT_LEN};

#[test]
fn test_hash_is_deterministic_and_order_sensitive() {
    let a = hash_content("Title\nBody");
    assert_eq!(a, hash_content("Title\nBody"));
    assert_ne!(a, hash_content("Body\nTitle"));
    assert_eq!(a.len(), 16);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_hash_known_value() {
    // FNV-1a 64 of the empty string is the offset basis.
    assert_eq!(hash_content(""), "cbf29ce484222325");
    assert_eq!(hash_content("a"), "af63dc4c8601ec8c");
}

#[test]
fn test_extract_cves_dedupes_case_insensitively() {
    let cves = extract_cves("See CVE-2024-1234 and cve-2024-1234");
    assert_eq!(cves, vec!["CVE-2024-1234".to_string()]);
}

#[test]
fn test_extract_cves_requires_four_digit_sequence() {
    let cves = extract_cves("CVE-2024-123 is short, CVE-2023-44487 and CVE-2021-4428 are fine");
    assert_eq!(cves, vec!["CVE-2023-44487".to_string(), "CVE-2021-4428".to_string()]);
}

#[test]
fn test_canonical_key_prefers_smallest_cve() {
    let first = vec!["CVE-2024-9999".to_string(), "cve-2023-0001".to_string()];
    let second = vec!["CVE-2023-0001".to_string()];

    let a = make_canonical_key(&first, Some("msrc"), Some("2024-03-01"), Some("abc"), None);
    let b = make_canonical_key(&second, Some("nvd"), Some("2024-04-02"), Some("def"), None);

    assert_eq!(a, "CVE-2023-0001");
    assert_eq!(a, b);
}

#[test]
fn test_fallback_key_is_deterministic() {
    let fingerprint = hash_content("Title\nBody");
    let key = make_canonical_key(&[], Some("web"), Some("2024-03-01"), Some(&fingerprint), None);

    assert_eq!(
        key,
        format!("web:2024-03-01:{}", &fingerprint[..KEY_FINGERPRINT_LEN])
    );
    assert_eq!(
        key,
        make_canonical_key(&[], Some("web"), Some("2024-03-01"), Some(&fingerprint), None)
    );
}

#[test]
fn test_fallback_key_truncates_timestamps_and_lowercases_source() {
    let key = make_canonical_key(
        &[],
        Some("MSRC"),
        Some("2024-03-01T12:00:00+00:00"),
        Some("0123456789abcdef"),
        None,
    );
    assert_eq!(key, "msrc:2024-03-01:0123456789ab");
}

#[test]
fn test_fallback_key_prefix_preference_order() {
    let url = "https://example.com/advisory";

    let from_url = make_canonical_key(&[], Some("web"), Some("2024-03-01"), None, Some(url));
    assert_eq!(
        from_url,
        format!("web:2024-03-01:{}", &hash_content(url)[..KEY_FINGERPRINT_LEN])
    );

    let from_source_date = make_canonical_key(&[], None, None, None, None);
    assert_eq!(
        from_source_date,
        format!(
            "misc:unknown:{}",
            &hash_content("misc-unknown")[..KEY_FINGERPRINT_LEN]
        )
    );
}
