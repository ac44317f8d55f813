//! The global resource table: `(resource_id, digest, size, filter_applied)`.
//!
//! One database per blob store, shared across images. Schema and pragmas
//! mirror the content-addressed-store-over-SQLite pattern used by OCI-style
//! blob stores: WAL during active writes, foreign keys off (no FK here —
//! digests are not enforced referentially, filter chains are validated by
//! the filters themselves).

use crate::db::filter_applied::FilterApplied;
pub use crate::db::filter_applied::ResourceRow;
use crate::digest::Digest;
use crate::error::DbError;
use crate::registry::ResourceId;
use rusqlite::{params, Connection, OptionalExtension};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS resource_table (
    resource_id INTEGER PRIMARY KEY,
    digest      BLOB NOT NULL UNIQUE,
    size        INTEGER NOT NULL,
    filter_applied BLOB
);
CREATE INDEX IF NOT EXISTS idx_resource_table_filter_applied
    ON resource_table(filter_applied);
";

pub fn open(path: &std::path::Path) -> Result<Connection, DbError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub fn set_journal_mode_delete(conn: &Connection) -> Result<(), DbError> {
    conn.pragma_update(None, "journal_mode", "DELETE")?;
    Ok(())
}

pub fn vacuum(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch("VACUUM;")?;
    Ok(())
}

/// Insert a row, ignoring the insert if `digest` already exists. Returns
/// the resulting row's resource_id (either newly assigned or pre-existing).
pub fn insert_or_ignore(conn: &Connection, digest: &Digest, size: u64) -> Result<ResourceId, DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO resource_table (digest, size) VALUES (?1, ?2)",
        params![digest.as_bytes().as_slice(), size as i64],
    )?;
    let id: i64 = conn.query_row(
        "SELECT resource_id FROM resource_table WHERE digest = ?1",
        params![digest.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    Ok(id as ResourceId)
}

/// Insert a row under an explicit, pre-allocated resource_id.
pub fn insert_with_id(
    conn: &Connection,
    resource_id: ResourceId,
    digest: &Digest,
    size: u64,
) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO resource_table (resource_id, digest, size) VALUES (?1, ?2, ?3)",
        params![resource_id as i64, digest.as_bytes().as_slice(), size as i64],
    )?;
    Ok(())
}

pub fn set_filter_applied(
    conn: &Connection,
    resource_id: ResourceId,
    filter_applied: &FilterApplied,
) -> Result<(), DbError> {
    let encoded = filter_applied.encode()?;
    conn.execute(
        "UPDATE resource_table SET filter_applied = ?1 WHERE resource_id = ?2",
        params![encoded, resource_id as i64],
    )?;
    Ok(())
}

pub fn lookup_id_by_digest(conn: &Connection, digest: &Digest) -> Result<Option<ResourceId>, DbError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT resource_id FROM resource_table WHERE digest = ?1",
            params![digest.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(|id| id as ResourceId))
}

pub fn count(conn: &Connection) -> Result<u64, DbError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM resource_table", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Reserve `n` consecutive resource ids. Reads `MAX(resource_id)` once
/// rather than racing an active read cursor (spec.md §9's recommended
/// allocation strategy).
pub fn next_resource_ids(conn: &Connection, n: u64) -> Result<std::ops::Range<ResourceId>, DbError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(resource_id) FROM resource_table",
        [],
        |row| row.get(0),
    )?;
    let start = (max.unwrap_or(-1) + 1) as ResourceId;
    Ok(start..(start + n))
}

fn row_from_query(
    resource_id: i64,
    digest: Vec<u8>,
    size: i64,
    filter_applied: Option<Vec<u8>>,
) -> Result<ResourceRow, DbError> {
    let digest_arr: [u8; 32] = digest.try_into().map_err(|_| {
        DbError::Decode(rmp_serde::decode::Error::Syntax(
            "digest column is not 32 bytes".into(),
        ))
    })?;
    let filter_applied = filter_applied
        .map(|bytes| FilterApplied::decode(&bytes))
        .transpose()?;
    Ok(ResourceRow {
        resource_id: resource_id as ResourceId,
        digest: Digest::from_bytes(digest_arr),
        size: size as u64,
        filter_applied,
    })
}

/// Select candidate rows with `filter_applied IS NULL` and
/// `lower < size <= upper` (either bound optional), in stable
/// `resource_id` order. Used by the bundle/compression/slice filters,
/// which differ only in bounds and direction.
pub fn select_candidates(
    conn: &Connection,
    lower_exclusive: Option<u64>,
    upper_inclusive: Option<u64>,
) -> Result<Vec<ResourceRow>, DbError> {
    let mut sql = String::from(
        "SELECT resource_id, digest, size, filter_applied FROM resource_table WHERE filter_applied IS NULL",
    );
    if lower_exclusive.is_some() {
        sql.push_str(" AND size > ?1");
    }
    if upper_inclusive.is_some() {
        sql.push_str(if lower_exclusive.is_some() {
            " AND size <= ?2"
        } else {
            " AND size <= ?1"
        });
    }
    sql.push_str(" ORDER BY resource_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match (lower_exclusive, upper_inclusive) {
        (Some(l), Some(u)) => stmt.query_map(params![l as i64, u as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?,
        (Some(l), None) => stmt.query_map(params![l as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?,
        (None, Some(u)) => stmt.query_map(params![u as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?,
        (None, None) => stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?,
    };

    let mut out = Vec::new();
    for row in rows {
        let (resource_id, digest, size, filter_applied) = row?;
        out.push(row_from_query(resource_id, digest, size, filter_applied)?);
    }
    Ok(out)
}
