//! SQLite-backed [`VoucherStore`].
//!
//! One connection behind a mutex; every multi-statement operation runs in
//! its own transaction. Timestamps are stored as UTC epoch milliseconds so
//! range scans compare integers, and the log table rejects UPDATE/DELETE
//! through triggers.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration as StdDuration,
};

use certvoucher_types::{
    ActorId, Expectation, GENESIS_DIGEST, ImportRecord, LogAction, NewLogEntry, Page,
    PageRequest, RequestId, Result, Voucher, VoucherChange, VoucherError, VoucherFilter,
    VoucherId, VoucherLogEntry, VoucherStatus, normalize_document, normalize_name,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{
    Connection, ErrorCode, OpenFlags, OptionalExtension, Params, Row, params, params_from_iter,
    types::Type,
};
use tracing::debug;
use uuid::Uuid;

use crate::{StatusCounts, VoucherStore};

/// Schema SQL for the voucher store.
const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS vouchers (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        product_code TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('AVAILABLE', 'RECYCLABLE', 'ALLOCATED', 'USED')),
        -- NULLs do not collide, so this enforces one voucher per request
        linked_request_id TEXT UNIQUE,
        external_ticket_id TEXT,
        client_name TEXT,
        client_document TEXT,
        allocated_at INTEGER,
        used_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        revision INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_vouchers_status ON vouchers(status, created_at);
    CREATE INDEX IF NOT EXISTS idx_vouchers_allocated ON vouchers(status, allocated_at);

    CREATE TABLE IF NOT EXISTS voucher_logs (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        voucher_id TEXT NOT NULL REFERENCES vouchers(id),
        action TEXT NOT NULL,
        description TEXT NOT NULL,
        actor_id TEXT,
        timestamp INTEGER NOT NULL,
        digest BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_logs_voucher ON voucher_logs(voucher_id, sequence);

    CREATE TRIGGER IF NOT EXISTS voucher_logs_no_update
    BEFORE UPDATE ON voucher_logs
    BEGIN
        SELECT RAISE(ABORT, 'voucher_logs is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS voucher_logs_no_delete
    BEFORE DELETE ON voucher_logs
    BEGIN
        SELECT RAISE(ABORT, 'voucher_logs is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS vouchers_no_delete
    BEFORE DELETE ON vouchers
    BEGIN
        SELECT RAISE(ABORT, 'vouchers are never deleted');
    END;
";

const VOUCHER_COLUMNS: &str = "id, code, product_code, status, linked_request_id, \
     external_ticket_id, client_name, client_document, allocated_at, used_at, created_at, \
     updated_at, revision";

const LOG_COLUMNS: &str = "sequence, voucher_id, action, description, actor_id, timestamp, digest";

/// `SQLite`-backed voucher repository.
pub struct SqliteVoucherStore {
    conn: Mutex<Connection>,
}

impl SqliteVoucherStore {
    /// Opens or creates a store at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_err)?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(db_err)?;
        conn.busy_timeout(StdDuration::from_secs(5))
            .map_err(db_err)?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "voucher store opened");

        Self::with_connection(conn)
    }

    /// Creates an in-memory store (tests, dry runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VoucherError::Persistence("voucher store mutex poisoned".into()))
    }

    fn query_one(&self, clause: &str, value: String) -> Result<Option<Voucher>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE {clause}"),
            params![value],
            row_to_voucher,
        )
        .optional()
        .map_err(db_err)
    }
}

impl VoucherStore for SqliteVoucherStore {
    fn find_allocatable(&self) -> Result<Option<Voucher>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {VOUCHER_COLUMNS} FROM vouchers
                 WHERE status IN ('RECYCLABLE', 'AVAILABLE')
                 ORDER BY CASE status WHEN 'RECYCLABLE' THEN 0 ELSE 1 END, created_at, id
                 LIMIT 1"
            ),
            [],
            row_to_voucher,
        )
        .optional()
        .map_err(db_err)
    }

    fn conditional_transition(
        &self,
        id: VoucherId,
        expected: Expectation,
        change: &VoucherChange,
        log: &NewLogEntry,
    ) -> Result<bool> {
        change.validate_from(expected.status)?;
        if log.voucher_id != id {
            return Err(VoucherError::Internal(format!(
                "log entry for {} attached to transition of {id}",
                log.voucher_id
            )));
        }
        let revision = expected
            .revision
            .map(i64::try_from)
            .transpose()
            .map_err(|_| VoucherError::Internal(format!("revision overflow on {id}")))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let updated = tx
            .execute(
                "UPDATE vouchers SET
                     status = ?1,
                     linked_request_id = ?2,
                     external_ticket_id = ?3,
                     client_name = ?4,
                     client_document = ?5,
                     allocated_at = ?6,
                     used_at = ?7,
                     updated_at = ?8,
                     revision = revision + 1
                 WHERE id = ?9 AND status = ?10 AND (?11 IS NULL OR revision = ?11)",
                params![
                    change.to.as_str(),
                    change.linked_request_id.map(|r| r.0.to_string()),
                    change.external_ticket_id,
                    change.client_name,
                    change.client_document,
                    change.allocated_at.map(to_ms),
                    change.used_at.map(to_ms),
                    to_ms(Utc::now()),
                    id.0.to_string(),
                    expected.status.as_str(),
                    revision,
                ],
            )
            .map_err(|e| match change.linked_request_id {
                Some(request) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    VoucherError::RequestAlreadyLinked(request)
                }
                _ => db_err(e),
            })?;

        if updated == 0 {
            debug!(voucher = %id, expected = %expected.status, "conditional transition lost");
            return Ok(false);
        }

        insert_log(&tx, log).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    fn append_log(&self, entry: &NewLogEntry) -> Result<VoucherLogEntry> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let committed = insert_log(&tx, entry).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(committed)
    }

    fn bulk_insert_ignoring_duplicates(
        &self,
        records: &[ImportRecord],
        actor: Option<ActorId>,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO vouchers
                     (id, code, product_code, status, created_at, updated_at, revision)
                     VALUES (?1, ?2, ?3, 'AVAILABLE', ?4, ?4, 0)",
                )
                .map_err(db_err)?;

            for record in records {
                let voucher = Voucher::imported(&record.code, &record.product_code, at);
                let changed = stmt
                    .execute(params![
                        voucher.id.0.to_string(),
                        voucher.code,
                        voucher.product_code,
                        to_ms(at),
                    ])
                    .map_err(db_err)?;
                if changed == 1 {
                    let entry = NewLogEntry::new(
                        voucher.id,
                        LogAction::Import,
                        format!(
                            "imported voucher {} (product {})",
                            voucher.code, voucher.product_code
                        ),
                        actor,
                        at,
                    );
                    insert_log(&tx, &entry).map_err(db_err)?;
                    inserted += 1;
                }
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(inserted)
    }

    fn list_allocated_older_than(&self, age: Duration, now: DateTime<Utc>) -> Result<Vec<Voucher>> {
        let cutoff = to_ms(now - age);
        let conn = self.conn()?;
        query_vouchers(
            &conn,
            &format!(
                "SELECT {VOUCHER_COLUMNS} FROM vouchers
                 WHERE status = 'ALLOCATED' AND allocated_at < ?1
                 ORDER BY allocated_at, id"
            ),
            params![cutoff],
        )
        .map_err(db_err)
    }

    fn list_by_status(&self, status: VoucherStatus) -> Result<Vec<Voucher>> {
        let conn = self.conn()?;
        query_vouchers(
            &conn,
            &format!(
                "SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE status = ?1 ORDER BY created_at, id"
            ),
            params![status.as_str()],
        )
        .map_err(db_err)
    }

    fn get(&self, id: VoucherId) -> Result<Option<Voucher>> {
        self.query_one("id = ?1", id.0.to_string())
    }

    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>> {
        self.query_one("code = ?1", code.trim().to_string())
    }

    fn find_by_request(&self, request_id: RequestId) -> Result<Option<Voucher>> {
        self.query_one("linked_request_id = ?1", request_id.0.to_string())
    }

    fn list(&self, filter: &VoucherFilter, page: PageRequest) -> Result<Page<Voucher>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(code) = filter.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            clauses.push("UPPER(code) LIKE ? ESCAPE '\\'");
            values.push(like_pattern(&code.to_uppercase()));
        }
        if let Some(client) = filter.client.as_deref().filter(|c| !c.trim().is_empty()) {
            let name = normalize_name(client);
            let document = normalize_document(client);
            if document.is_empty() {
                clauses.push("client_name LIKE ? ESCAPE '\\'");
                values.push(like_pattern(&name));
            } else {
                clauses.push("(client_name LIKE ? ESCAPE '\\' OR client_document LIKE ?)");
                values.push(like_pattern(&name));
                values.push(format!("%{document}%"));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn()?;
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM vouchers{where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let items = query_vouchers(
            &conn,
            &format!(
                "SELECT {VOUCHER_COLUMNS} FROM vouchers{where_sql}
                 ORDER BY created_at, code
                 LIMIT {} OFFSET {}",
                page.limit(),
                page.offset()
            ),
            params_from_iter(values.iter()),
        )
        .map_err(db_err)?;

        Ok(Page {
            items,
            page: page.page.max(1),
            per_page: page.limit(),
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    fn logs_for(&self, id: VoucherId) -> Result<Vec<VoucherLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM voucher_logs WHERE voucher_id = ?1 ORDER BY sequence"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id.0.to_string()], row_to_log)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn log_trail(&self) -> Result<Vec<VoucherLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM voucher_logs ORDER BY sequence"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_log).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn count_by_status(&self) -> Result<StatusCounts> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM vouchers GROUP BY status")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            counts.set(status.parse()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn db_err(err: rusqlite::Error) -> VoucherError {
    VoucherError::Persistence(err.to_string())
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion_err(idx: usize, ty: Type, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(VoucherError::Serialization(reason)))
}

fn from_ms(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_err(idx, Type::Integer, format!("timestamp {ms} out of range")))
}

fn opt_from_ms(idx: usize, ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(|v| from_ms(idx, v)).transpose()
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, Type::Text, e.to_string()))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Uuid::parse_str(&r).map_err(|e| conversion_err(idx, Type::Text, e.to_string())))
        .transpose()
}

fn row_to_voucher(row: &Row<'_>) -> rusqlite::Result<Voucher> {
    let status: String = row.get(3)?;
    let revision: i64 = row.get(12)?;
    Ok(Voucher {
        id: VoucherId(uuid_at(row, 0)?),
        code: row.get(1)?,
        product_code: row.get(2)?,
        status: status
            .parse()
            .map_err(|e: VoucherError| conversion_err(3, Type::Text, e.to_string()))?,
        linked_request_id: opt_uuid_at(row, 4)?.map(RequestId),
        external_ticket_id: row.get(5)?,
        client_name: row.get(6)?,
        client_document: row.get(7)?,
        allocated_at: opt_from_ms(8, row.get(8)?)?,
        used_at: opt_from_ms(9, row.get(9)?)?,
        created_at: from_ms(10, row.get(10)?)?,
        updated_at: from_ms(11, row.get(11)?)?,
        revision: u64::try_from(revision)
            .map_err(|e| conversion_err(12, Type::Integer, e.to_string()))?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<VoucherLogEntry> {
    let sequence: i64 = row.get(0)?;
    let action: String = row.get(2)?;
    let digest: Vec<u8> = row.get(6)?;
    Ok(VoucherLogEntry {
        sequence: u64::try_from(sequence)
            .map_err(|e| conversion_err(0, Type::Integer, e.to_string()))?,
        voucher_id: VoucherId(uuid_at(row, 1)?),
        action: action
            .parse()
            .map_err(|e: VoucherError| conversion_err(2, Type::Text, e.to_string()))?,
        description: row.get(3)?,
        actor_id: opt_uuid_at(row, 4)?.map(ActorId),
        timestamp: from_ms(5, row.get(5)?)?,
        digest: digest_from(6, digest)?,
    })
}

fn digest_from(idx: usize, bytes: Vec<u8>) -> rusqlite::Result<[u8; 32]> {
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| conversion_err(idx, Type::Blob, format!("digest of {} bytes", bytes.len())))
}

fn query_vouchers<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<Voucher>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_voucher)?;
    rows.collect()
}

/// Chain `entry` onto the last committed digest and insert it.
fn insert_log(conn: &Connection, entry: &NewLogEntry) -> rusqlite::Result<VoucherLogEntry> {
    let previous: Option<Vec<u8>> = conn
        .query_row(
            "SELECT digest FROM voucher_logs ORDER BY sequence DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let previous = match previous {
        Some(bytes) => digest_from(0, bytes)?,
        None => GENESIS_DIGEST,
    };

    // Persisted precision is milliseconds; chain over what will be read back.
    let timestamp = from_ms(0, to_ms(entry.timestamp))?;
    let stored = NewLogEntry {
        timestamp,
        ..entry.clone()
    };
    let digest = stored.chain_digest(&previous);

    conn.execute(
        "INSERT INTO voucher_logs (voucher_id, action, description, actor_id, timestamp, digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            stored.voucher_id.0.to_string(),
            stored.action.as_str(),
            stored.description,
            stored.actor_id.map(|a| a.0.to_string()),
            to_ms(timestamp),
            digest.as_slice(),
        ],
    )?;
    let sequence = conn.last_insert_rowid();

    Ok(VoucherLogEntry {
        sequence: u64::try_from(sequence).unwrap_or(0),
        voucher_id: stored.voucher_id,
        action: stored.action,
        description: stored.description,
        actor_id: stored.actor_id,
        timestamp,
        digest,
    })
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
