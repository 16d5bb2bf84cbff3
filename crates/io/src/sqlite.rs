// SQLite-backed record store

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use srm_recon::model::{CanonicalRecord, Fields, RecordFilter, RecordUpdate, Status};
use srm_recon::store::{apply_update, RecordStore, UpsertOutcome};
use srm_recon::StoreError;

use crate::STORE_FORMAT_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    tbl TEXT NOT NULL,
    id TEXT NOT NULL,
    internal_key TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    status TEXT NOT NULL,        -- ACTIVE | INACTIVE
    fields TEXT NOT NULL,        -- JSON object
    PRIMARY KEY (tbl, id)
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const META_VERSION: &str = "format_version";
const META_NEXT_KEY: &str = "next_key";

fn io_err(e: rusqlite::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

/// All tables of one base in a single SQLite file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a store file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(io_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(io_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(io_err)?;

        let version: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![META_VERSION], |row| row.get(0))
            .optional()
            .map_err(io_err)?;
        match version {
            Some(v) => {
                let v: u32 = v
                    .parse()
                    .map_err(|_| StoreError::Io(format!("invalid store format version '{v}'")))?;
                if v > STORE_FORMAT_VERSION {
                    return Err(StoreError::Io(format!(
                        "store format version {v} is newer than supported version {STORE_FORMAT_VERSION}"
                    )));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                    params![META_VERSION, STORE_FORMAT_VERSION.to_string()],
                )
                .map_err(io_err)?;
            }
        }

        Ok(Self { conn })
    }

    /// Names of all tables holding at least one record.
    pub fn tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT tbl FROM records ORDER BY tbl")
            .map_err(io_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(io_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(io_err)
    }

    pub fn get(&self, table: &str, id: &str) -> Result<Option<CanonicalRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, internal_key, source, status, fields FROM records WHERE tbl = ?1 AND id = ?2",
                params![table, id],
                raw_row,
            )
            .optional()
            .map_err(io_err)?;
        row.map(|raw| decode(table, raw)).transpose()
    }
}

type RawRow = (String, String, String, String, String);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(table: &str, (id, internal_key, source, status, fields): RawRow) -> Result<CanonicalRecord, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        table: table.to_string(),
        id: id.clone(),
        message,
    };
    let status = Status::parse(&status).ok_or_else(|| corrupt(format!("unknown status '{status}'")))?;
    let fields: Fields = serde_json::from_str(&fields).map_err(|e| corrupt(e.to_string()))?;
    Ok(CanonicalRecord { id, internal_key, source, status, fields })
}

fn next_key(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    let value: Option<String> = tx
        .query_row("SELECT value FROM meta WHERE key = ?1", params![META_NEXT_KEY], |row| row.get(0))
        .optional()
        .map_err(io_err)?;
    match value {
        Some(v) => v.parse().map_err(|_| StoreError::Io(format!("invalid key sequence '{v}'"))),
        None => Ok(0),
    }
}

impl RecordStore for SqliteStore {
    fn list_records(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<CanonicalRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, internal_key, source, status, fields FROM records
                 WHERE tbl = ?1 AND (?2 IS NULL OR source = ?2)
                 ORDER BY id",
            )
            .map_err(io_err)?;
        let rows = stmt
            .query_map(params![table, filter.source], raw_row)
            .map_err(io_err)?;

        let mut records = Vec::new();
        for raw in rows {
            let record = decode(table, raw.map_err(io_err)?)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn upsert(
        &mut self,
        table: &str,
        records: Vec<RecordUpdate>,
        typecast: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        // Dropping the transaction on error rolls the whole batch back.
        let tx = self.conn.transaction().map_err(io_err)?;
        let mut seq = next_key(&tx)?;
        let mut outcome = UpsertOutcome::default();

        for update in records {
            let existing = tx
                .query_row(
                    "SELECT id, internal_key, source, status, fields FROM records WHERE tbl = ?1 AND id = ?2",
                    params![table, &update.id],
                    raw_row,
                )
                .optional()
                .map_err(io_err)?;

            let existing = existing.map(|raw| decode(table, raw)).transpose()?;
            if existing.is_some() {
                outcome.updated += 1;
            } else {
                outcome.created += 1;
            }
            let record = apply_update(table, existing, update, typecast, &mut seq)?;

            let fields = serde_json::to_string(&record.fields).map_err(|e| StoreError::Io(e.to_string()))?;
            tx.execute(
                "INSERT INTO records (tbl, id, internal_key, source, status, fields)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (tbl, id) DO UPDATE SET
                    source = excluded.source, status = excluded.status, fields = excluded.fields",
                params![table, record.id, record.internal_key, record.source, record.status.as_str(), fields],
            )
            .map_err(io_err)?;
        }

        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![META_NEXT_KEY, seq.to_string()],
        )
        .map_err(io_err)?;
        tx.commit().map_err(io_err)?;

        log::debug!(
            "table '{table}': {} created, {} updated",
            outcome.created,
            outcome.updated
        );
        Ok(outcome)
    }
}
