use crate::heuristics::{ItemKind, ParsedRepair, PriceExtraction, RepairLineItem};
use crate::valuation::{RepairJob, RepairRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub struct RepairStore {
    conn: Connection,
}

const RECORD_COLUMNS: &str = "job_id, title, status, customer_id, customer_name, technician_name,
     scheduled_date, office_notes, parsed_json, prices_json, is_completed,
     total_repair_value, labor_amount, parts_amount";

impl RepairStore {
    /// Open (or create) the SQLite repair store
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS repair_jobs (
                job_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                customer_id TEXT,
                customer_name TEXT NOT NULL,
                technician_name TEXT NOT NULL,
                scheduled_date TEXT,
                office_notes TEXT NOT NULL,
                notes_hash TEXT NOT NULL,
                invoice_number TEXT,
                parsed_json TEXT,
                prices_json TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                total_repair_value REAL NOT NULL DEFAULT 0,
                labor_amount REAL NOT NULL DEFAULT 0,
                parts_amount REAL NOT NULL DEFAULT 0,
                backend TEXT NOT NULL DEFAULT 'heuristics',
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        // One row per parsed line item, in source order
        conn.execute(
            "CREATE TABLE IF NOT EXISTS repair_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                part_number TEXT,
                quantity REAL NOT NULL,
                unit_price REAL NOT NULL,
                extended_price REAL NOT NULL,
                FOREIGN KEY (job_id) REFERENCES repair_jobs(job_id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_repair_jobs_customer ON repair_jobs(customer_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_repair_items_job ON repair_items(job_id, position)",
            [],
        )?;

        info!("Repair store initialized");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Fingerprint of a job's notes; unchanged notes need no re-parse.
    pub fn notes_hash(job_id: &str, notes: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(job_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(notes.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether the stored row for `job_id` was built from notes with this hash.
    pub fn is_current(&self, job_id: &str, hash: &str) -> SqliteResult<bool> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT notes_hash FROM repair_jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(hash))
    }

    /// Insert or replace a job and its line items
    pub fn upsert_record(&self, record: &RepairRecord, backend: &str) -> SqliteResult<()> {
        let job = &record.job;
        let hash = Self::notes_hash(&job.job_id, &job.office_notes);
        let parsed_json = record
            .parsed_repair
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let prices_json = serde_json::to_string(&record.price_extraction)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let invoice_number = record
            .parsed_repair
            .as_ref()
            .and_then(|p| p.invoice_number.clone());

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO repair_jobs
                (job_id, title, status, customer_id, customer_name, technician_name, scheduled_date,
                 office_notes, notes_hash, invoice_number, parsed_json, prices_json, is_completed,
                 total_repair_value, labor_amount, parts_amount, backend)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(job_id) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                customer_id = excluded.customer_id,
                customer_name = excluded.customer_name,
                technician_name = excluded.technician_name,
                scheduled_date = excluded.scheduled_date,
                office_notes = excluded.office_notes,
                notes_hash = excluded.notes_hash,
                invoice_number = excluded.invoice_number,
                parsed_json = excluded.parsed_json,
                prices_json = excluded.prices_json,
                is_completed = excluded.is_completed,
                total_repair_value = excluded.total_repair_value,
                labor_amount = excluded.labor_amount,
                parts_amount = excluded.parts_amount,
                backend = excluded.backend,
                updated_at = CURRENT_TIMESTAMP",
            params![
                job.job_id,
                job.title,
                job.status,
                job.customer_id,
                job.customer_name,
                job.technician_name,
                job.scheduled_date,
                job.office_notes,
                hash,
                invoice_number,
                parsed_json,
                prices_json,
                record.is_completed,
                record.total_repair_value,
                record.labor_amount,
                record.parts_amount,
                backend,
            ],
        )?;

        tx.execute(
            "DELETE FROM repair_items WHERE job_id = ?1",
            params![job.job_id],
        )?;
        let items = record.parsed_repair.as_ref().map_or(&[][..], |p| &p.items[..]);
        for (position, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO repair_items
                    (job_id, position, kind, description, part_number, quantity, unit_price, extended_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.job_id,
                    position as i64,
                    kind_str(item.kind),
                    item.description,
                    item.part_number,
                    item.quantity,
                    item.unit_price,
                    item.extended_price,
                ],
            )?;
        }
        tx.commit()?;

        info!(job_id = %job.job_id, items = items.len(), backend, "Repair stored");
        Ok(())
    }

    /// Drop a job whose notes no longer carry repair data
    pub fn remove_job(&self, job_id: &str) -> SqliteResult<bool> {
        self.conn.execute(
            "DELETE FROM repair_items WHERE job_id = ?1",
            params![job_id],
        )?;
        let removed = self
            .conn
            .execute("DELETE FROM repair_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(removed > 0)
    }

    /// Get every stored repair record, newest schedule first
    pub fn get_records(&self) -> SqliteResult<Vec<RepairRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM repair_jobs
             ORDER BY scheduled_date DESC, job_id"
        ))?;
        let rows = stmt.query_map([], |row| Self::row_to_record(row))?;
        rows.collect()
    }

    /// Get a single record by job id
    pub fn get_record(&self, job_id: &str) -> SqliteResult<Option<RepairRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM repair_jobs
             WHERE job_id = ?1"
        ))?;
        stmt.query_row(params![job_id], |row| Self::row_to_record(row))
            .optional()
    }

    /// Stored line items for a job, in source order
    pub fn get_items(&self, job_id: &str) -> SqliteResult<Vec<RepairLineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, description, part_number, quantity, unit_price, extended_price
             FROM repair_items
             WHERE job_id = ?1
             ORDER BY position",
        )?;
        let items = stmt.query_map(params![job_id], |row| {
            let kind: String = row.get(0)?;
            Ok(RepairLineItem {
                kind: parse_kind(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        Type::Text,
                        format!("unknown item kind {kind}").into(),
                    )
                })?,
                description: row.get(1)?,
                part_number: row.get(2)?,
                quantity: row.get(3)?,
                unit_price: row.get(4)?,
                extended_price: row.get(5)?,
            })
        })?;
        items.collect()
    }

    /// Helper: map a `RECORD_COLUMNS` row to `RepairRecord`.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepairRecord> {
        let parsed_json: Option<String> = row.get(8)?;
        let prices_json: String = row.get(9)?;

        let parsed_repair = parsed_json
            .map(|json| serde_json::from_str::<ParsedRepair>(&json))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
        let price_extraction = serde_json::from_str::<PriceExtraction>(&prices_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

        Ok(RepairRecord {
            job: RepairJob {
                job_id: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                customer_id: row.get(3)?,
                customer_name: row.get(4)?,
                technician_name: row.get(5)?,
                scheduled_date: row.get(6)?,
                office_notes: row.get(7)?,
            },
            parsed_repair,
            price_extraction,
            is_completed: row.get(10)?,
            total_repair_value: row.get(11)?,
            labor_amount: row.get(12)?,
            parts_amount: row.get(13)?,
        })
    }

    /// Get count of jobs, completed jobs and stored line items
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize)> {
        let jobs: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM repair_jobs", [], |row| row.get(0))?;

        let completed: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM repair_jobs WHERE is_completed = 1",
            [],
            |row| row.get(0),
        )?;

        let items: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM repair_items", [], |row| row.get(0))?;

        Ok((jobs, completed, items))
    }
}

fn kind_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Part => "part",
        ItemKind::Labor => "labor",
    }
}

fn parse_kind(raw: &str) -> Option<ItemKind> {
    match raw {
        "part" => Some(ItemKind::Part),
        "labor" => Some(ItemKind::Labor),
        _ => None,
    }
}
