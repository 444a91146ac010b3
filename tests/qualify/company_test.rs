//! Existing-relationship company matching.

use cadence::qualify::company::{companies_match, normalize_company};

#[test]
fn common_legal_suffixes_strip() {
    for (raw, expected) in [
        ("Acme Inc", "acme"),
        ("Acme, Inc.", "acme"),
        ("Acme LLC", "acme"),
        ("Acme Ltd.", "acme"),
        ("Acme Corporation", "acme"),
        ("Acme GmbH", "acme"),
    ] {
        assert_eq!(normalize_company(raw), expected, "failed on {raw}");
    }
}

#[test]
fn punctuation_and_case_are_ignored() {
    assert!(companies_match("BLUE-SKY labs", "Blue Sky Labs"));
    assert!(companies_match("O'Neill & Sons", "oneill sons"));
}

#[test]
fn suffix_inside_a_word_is_kept() {
    // "Cisco" ends in "co" but it is not a legal suffix there.
    assert_eq!(normalize_company("Cisco"), "cisco");
    assert!(!companies_match("Cisco", "Cis"));
}

#[test]
fn distinct_companies_do_not_collide() {
    assert!(!companies_match("Stripe", "Strive"));
    assert!(!companies_match("Acme", ""));
}
