//! Identity normalization shared by allocation and reconciliation.
//!
//! The external authority reports tax IDs either digits-only or punctuated
//! (`123.456.789-00`), and names in whatever casing the issuer typed. Both
//! sides of every comparison go through these functions.

/// Strip everything but ASCII digits from a CPF/CNPJ-like document.
#[must_use]
pub fn normalize_document(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Uppercase a person/company name and collapse runs of whitespace.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize an optional document, mapping "no digits at all" to `None`.
#[must_use]
pub fn normalize_optional_document(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_document).filter(|d| !d.is_empty())
}

/// Normalize an optional name, mapping blank strings to `None`.
#[must_use]
pub fn normalize_optional_name(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_name).filter(|n| !n.is_empty())
}
