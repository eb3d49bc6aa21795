//! Operator listing: filters and pagination.

use serde::{Deserialize, Serialize};

use crate::{VoucherStatus, constants};

/// Filter for operator voucher listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherFilter {
    pub status: Option<VoucherStatus>,
    /// Case-insensitive substring of the voucher code.
    pub code: Option<String>,
    /// Substring of the client name, or of the client document (digits).
    pub client: Option<String>,
}

impl VoucherFilter {
    #[must_use]
    pub fn with_status(status: VoucherStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A 1-based page request. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    #[must_use]
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, constants::MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }

    /// Rows to return.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.per_page.clamp(1, constants::MAX_PAGE_SIZE)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, constants::DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(u64::from(self.per_page.max(1)))
        }
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps() {
        let p = PageRequest::new(0, 10_000);
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, constants::MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn page_offset() {
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn total_pages() {
        let page: Page<u8> = Page {
            items: vec![],
            page: 1,
            per_page: 25,
            total: 51,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let empty: Page<u8> = Page {
            items: vec![],
            page: 1,
            per_page: 25,
            total: 0,
        };
        assert_eq!(empty.total_pages(), 0);
        assert!(!empty.has_next());
    }
}
