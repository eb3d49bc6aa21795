//! Bulk import feed types.
//!
//! Import is append-only and skip-duplicate: a code that already exists is
//! never overwritten, and a code repeated inside one feed is inserted once.

use serde::{Deserialize, Serialize};

use crate::{VoucherError, constants};

/// One line of the import feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub code: String,
    #[serde(alias = "productCode", alias = "product", default)]
    pub product_code: String,
}

impl ImportRecord {
    #[must_use]
    pub fn new(code: impl Into<String>, product_code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            product_code: product_code.into(),
        }
    }

    /// Trim the record and check it is importable.
    ///
    /// # Errors
    /// Returns `InvalidImportRecord` for blank, oversized, or whitespace-bearing codes.
    pub fn normalized(&self) -> crate::Result<Self> {
        let code = self.code.trim();
        if code.is_empty() {
            return Err(VoucherError::InvalidImportRecord {
                reason: "empty voucher code".into(),
            });
        }
        if code.len() > constants::MAX_CODE_LEN {
            return Err(VoucherError::InvalidImportRecord {
                reason: format!("voucher code longer than {} bytes", constants::MAX_CODE_LEN),
            });
        }
        if code.chars().any(char::is_whitespace) {
            return Err(VoucherError::InvalidImportRecord {
                reason: format!("voucher code {code:?} contains whitespace"),
            });
        }
        Ok(Self {
            code: code.to_string(),
            product_code: self.product_code.trim().to_string(),
        })
    }
}

/// Result of one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Records read from the feed.
    pub processed: usize,
    /// New vouchers created.
    pub inserted: usize,
    /// Records refused by validation.
    pub rejected: usize,
}

impl ImportSummary {
    /// Valid records that matched an existing code.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.processed - self.inserted - self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_trims() {
        let r = ImportRecord::new("  ABC123 ", " E-CPF-A1 ").normalized().unwrap();
        assert_eq!(r.code, "ABC123");
        assert_eq!(r.product_code, "E-CPF-A1");
    }

    #[test]
    fn blank_code_rejected() {
        let err = ImportRecord::new("   ", "X").normalized().unwrap_err();
        assert!(matches!(err, VoucherError::InvalidImportRecord { .. }));
    }

    #[test]
    fn inner_whitespace_rejected() {
        assert!(ImportRecord::new("AB C", "X").normalized().is_err());
    }

    #[test]
    fn accepts_camel_case_feed() {
        let r: ImportRecord =
            serde_json::from_str(r#"{"code":"XYZ789","productCode":"E-CNPJ-A1"}"#).unwrap();
        assert_eq!(r.product_code, "E-CNPJ-A1");
        let bare: ImportRecord = serde_json::from_str(r#"{"code":"XYZ789"}"#).unwrap();
        assert!(bare.product_code.is_empty());
    }

    #[test]
    fn summary_duplicates() {
        let s = ImportSummary {
            processed: 3,
            inserted: 1,
            rejected: 1,
        };
        assert_eq!(s.duplicates(), 1);
    }
}
