//! The per-image file table: five tables describing the filesystem tree
//! ingested from a source rootfs — `ft_inode`, `ft_directories`,
//! `ft_non_regular_files`, `ft_regular_files`, `ft_resource`.

use crate::digest::Digest;
use crate::error::DbError;
use rusqlite::{params, Connection};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ft_inode (
    inode_id INTEGER PRIMARY KEY,
    uid      INTEGER NOT NULL,
    gid      INTEGER NOT NULL,
    mode     INTEGER NOT NULL,
    xattrs   BLOB
);
CREATE TABLE IF NOT EXISTS ft_directories (
    path     TEXT PRIMARY KEY,
    inode_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS ft_non_regular_files (
    path     TEXT PRIMARY KEY,
    inode_id INTEGER NOT NULL,
    meta     BLOB
);
CREATE TABLE IF NOT EXISTS ft_regular_files (
    path        TEXT PRIMARY KEY,
    inode_id    INTEGER NOT NULL,
    resource_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS ft_resource (
    resource_id INTEGER PRIMARY KEY,
    digest      BLOB NOT NULL,
    size        INTEGER NOT NULL,
    contents    BLOB
);
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

#[derive(Debug, Clone)]
pub struct InodeRow {
    pub inode_id: i64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub xattrs: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct DirectoryRow {
    pub path: String,
    pub inode_id: i64,
}

#[derive(Debug, Clone)]
pub struct NonRegularFileRow {
    pub path: String,
    pub inode_id: i64,
    pub meta: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RegularFileRow {
    pub path: String,
    pub inode_id: i64,
    pub resource_id: i64,
}

#[derive(Debug, Clone)]
pub struct FileResourceRow {
    pub resource_id: i64,
    pub digest: Digest,
    pub size: u64,
    pub contents: Option<Vec<u8>>,
}

pub fn insert_inode(conn: &Connection, row: &InodeRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO ft_inode (inode_id, uid, gid, mode, xattrs) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![row.inode_id, row.uid, row.gid, row.mode, row.xattrs],
    )?;
    Ok(())
}

pub fn insert_directory(conn: &Connection, row: &DirectoryRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO ft_directories (path, inode_id) VALUES (?1, ?2)",
        params![row.path, row.inode_id],
    )?;
    Ok(())
}

pub fn insert_non_regular_file(conn: &Connection, row: &NonRegularFileRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO ft_non_regular_files (path, inode_id, meta) VALUES (?1, ?2, ?3)",
        params![row.path, row.inode_id, row.meta],
    )?;
    Ok(())
}

pub fn insert_regular_file(conn: &Connection, row: &RegularFileRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO ft_regular_files (path, inode_id, resource_id) VALUES (?1, ?2, ?3)",
        params![row.path, row.inode_id, row.resource_id],
    )?;
    Ok(())
}

pub fn insert_file_resource(conn: &Connection, row: &FileResourceRow) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO ft_resource (resource_id, digest, size, contents) VALUES (?1, ?2, ?3, ?4)",
        params![row.resource_id, row.digest.as_bytes().as_slice(), row.size as i64, row.contents],
    )?;
    Ok(())
}

pub fn count_entries(conn: &Connection, table: &str) -> Result<u64, DbError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as u64)
}

pub fn sum_column(conn: &Connection, table: &str, column: &str) -> Result<u64, DbError> {
    let n: Option<i64> = conn.query_row(
        &format!("SELECT SUM({column}) FROM {table}"),
        [],
        |row| row.get(0),
    )?;
    Ok(n.unwrap_or(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardlinked_inode_insert_collapses() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let row = InodeRow {
            inode_id: -42,
            uid: 0,
            gid: 0,
            mode: 0o100644,
            xattrs: None,
        };
        insert_inode(&conn, &row).unwrap();
        insert_inode(&conn, &row).unwrap();
        assert_eq!(count_entries(&conn, "ft_inode").unwrap(), 1);
    }

    #[test]
    fn regular_files_sharing_resource_are_independent_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        for (path, inode_id) in [("/a.txt", 1i64), ("/b.txt", 2), ("/c.txt", 3)] {
            insert_regular_file(
                &conn,
                &RegularFileRow {
                    path: path.to_string(),
                    inode_id,
                    resource_id: 0,
                },
            )
            .unwrap();
        }
        assert_eq!(count_entries(&conn, "ft_regular_files").unwrap(), 3);
    }
}
