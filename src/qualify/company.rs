//! Company-name fuzzy matching for the existing-relationship probe.

/// Legal suffixes stripped before comparison.
const LEGAL_SUFFIXES: &[&str] = &[
    "incorporated",
    "corporation",
    "limited",
    "company",
    "inc",
    "llc",
    "ltd",
    "corp",
    "gmbh",
    "co",
];

/// Normalized prefix length compared.
const PREFIX_LEN: usize = 12;

/// Canonicalize a company name: lowercase, legal suffixes stripped,
/// alphanumeric only, truncated to a comparison prefix.
pub fn normalize_company(name: &str) -> String {
    let mut lower = name.to_lowercase();
    for suffix in LEGAL_SUFFIXES {
        // Strip whole-word suffixes anywhere at the tail: "acme inc.",
        // "acme, inc", "acme incorporated".
        let trimmed = lower
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .to_owned();
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            let boundary_ok = stripped
                .chars()
                .last()
                .is_none_or(|c| !c.is_alphanumeric());
            if boundary_ok {
                lower = stripped.to_owned();
            }
        }
    }
    lower
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(PREFIX_LEN)
        .collect()
}

/// Whether two company names refer to the same company under the
/// normalized-prefix rule.
pub fn companies_match(a: &str, b: &str) -> bool {
    let a = normalize_company(a);
    let b = normalize_company(b);
    !a.is_empty() && a == b
}
