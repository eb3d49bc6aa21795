//! Bulk voucher import.

use std::sync::Arc;

use certvoucher_store::VoucherStore;
use certvoucher_types::{ActorId, ImportRecord, ImportSummary, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

/// One element of a JSON feed: a full record or a bare code.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedLine {
    Record(ImportRecord),
    Code(String),
}

impl From<FeedLine> for ImportRecord {
    fn from(line: FeedLine) -> Self {
        match line {
            FeedLine::Record(record) => record,
            FeedLine::Code(code) => ImportRecord::new(code, ""),
        }
    }
}

/// Loads new vouchers into the pool. Existing codes are never touched.
pub struct VoucherImporter {
    store: Arc<dyn VoucherStore>,
}

impl VoucherImporter {
    pub fn new(store: Arc<dyn VoucherStore>) -> Self {
        Self { store }
    }

    /// Import `records`, skipping duplicates and rejecting malformed codes.
    ///
    /// Rejections are counted, not fatal; only a storage failure aborts
    /// the run, in which case nothing from this feed is inserted.
    pub fn import(&self, records: &[ImportRecord], actor: Option<ActorId>) -> Result<ImportSummary> {
        let mut valid = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for record in records {
            match record.normalized() {
                Ok(record) => valid.push(record),
                Err(e) => {
                    warn!(code = %record.code, error = %e, "Import record rejected");
                    rejected += 1;
                }
            }
        }

        let inserted = self
            .store
            .bulk_insert_ignoring_duplicates(&valid, actor, Utc::now())?;
        let summary = ImportSummary {
            processed: records.len(),
            inserted,
            rejected,
        };
        info!(
            processed = summary.processed,
            inserted = summary.inserted,
            duplicates = summary.duplicates(),
            rejected = summary.rejected,
            "Voucher import finished"
        );
        Ok(summary)
    }

    /// Import a JSON array of `{code, productCode}` records or bare code strings.
    ///
    /// # Errors
    /// `Serialization` if `raw` is not such an array.
    pub fn import_json(&self, raw: &str, actor: Option<ActorId>) -> Result<ImportSummary> {
        let lines: Vec<FeedLine> = serde_json::from_str(raw)?;
        let records: Vec<ImportRecord> = lines.into_iter().map(ImportRecord::from).collect();
        self.import(&records, actor)
    }
}
