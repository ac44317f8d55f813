//! Post-filter image statistics, recomputed after the filter chain runs.

use crate::db::file_table;
use crate::error::Error;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageStats {
    pub image_blobs_count: u64,
    pub image_blobs_size: u64,
    pub sys_image_size: u64,
    pub sys_image_regular_files_count: u64,
    pub sys_image_non_regular_files_count: u64,
    pub sys_image_dirs_count: u64,
    pub sys_image_unique_file_entries: u64,
    pub sys_image_unique_file_entries_size: u64,
}

/// Recompute all eight stats fields from a populated file table.
pub fn compute(conn: &Connection) -> Result<ImageStats, Error> {
    let image_blobs_count = count_non_inlined(conn)?;
    let image_blobs_size = sum_non_inlined_size(conn)?;

    let sys_image_size: i64 = conn.query_row(
        "SELECT COALESCE(SUM(r.size), 0) FROM ft_regular_files f \
         JOIN ft_resource r ON f.resource_id = r.resource_id",
        [],
        |row| row.get(0),
    )?;

    let sys_image_regular_files_count = file_table::count_entries(conn, "ft_regular_files")?;
    let sys_image_non_regular_files_count = file_table::count_entries(conn, "ft_non_regular_files")?;
    let sys_image_dirs_count = file_table::count_entries(conn, "ft_directories")?;

    let sys_image_unique_file_entries: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT r.resource_id) FROM ft_regular_files f \
         JOIN ft_resource r ON f.resource_id = r.resource_id",
        [],
        |row| row.get(0),
    )?;
    let sys_image_unique_file_entries_size: i64 = conn.query_row(
        "SELECT COALESCE(SUM(r.size), 0) FROM (SELECT DISTINCT r.resource_id, r.size \
         FROM ft_regular_files f JOIN ft_resource r ON f.resource_id = r.resource_id) r",
        [],
        |row| row.get(0),
    )?;

    Ok(ImageStats {
        image_blobs_count,
        image_blobs_size,
        sys_image_size: sys_image_size as u64,
        sys_image_regular_files_count,
        sys_image_non_regular_files_count,
        sys_image_dirs_count,
        sys_image_unique_file_entries: sys_image_unique_file_entries as u64,
        sys_image_unique_file_entries_size: sys_image_unique_file_entries_size as u64,
    })
}

fn count_non_inlined(conn: &Connection) -> Result<u64, Error> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ft_resource WHERE contents IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

fn sum_non_inlined_size(conn: &Connection) -> Result<u64, Error> {
    let n: Option<i64> = conn.query_row(
        "SELECT SUM(size) FROM ft_resource WHERE contents IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(n.unwrap_or(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_table::{self as ft, DirectoryRow, FileResourceRow, RegularFileRow};

    #[test]
    fn stats_on_empty_rootfs() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(ft::SCHEMA).unwrap();
        ft::insert_directory(&conn, &DirectoryRow { path: "/".into(), inode_id: 1 }).unwrap();
        ft::insert_file_resource(
            &conn,
            &FileResourceRow {
                resource_id: 0,
                digest: crate::digest::Digest::empty(),
                size: 0,
                contents: Some(Vec::new()),
            },
        )
        .unwrap();

        let stats = compute(&conn).unwrap();
        assert_eq!(stats.sys_image_dirs_count, 1);
        assert_eq!(stats.sys_image_regular_files_count, 0);
        assert_eq!(stats.image_blobs_count, 0);
    }

    #[test]
    fn stats_count_unique_entries_once_for_shared_content() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(ft::SCHEMA).unwrap();
        ft::insert_file_resource(
            &conn,
            &FileResourceRow {
                resource_id: 1,
                digest: crate::digest::Digest::of(b"hi"),
                size: 2,
                contents: Some(b"hi".to_vec()),
            },
        )
        .unwrap();
        for path in ["/a.txt", "/b.txt", "/c.txt"] {
            ft::insert_regular_file(
                &conn,
                &RegularFileRow {
                    path: path.to_string(),
                    inode_id: 1,
                    resource_id: 1,
                },
            )
            .unwrap();
        }

        let stats = compute(&conn).unwrap();
        assert_eq!(stats.sys_image_regular_files_count, 3);
        assert_eq!(stats.sys_image_unique_file_entries, 1);
        assert_eq!(stats.sys_image_unique_file_entries_size, 2);
        assert_eq!(stats.sys_image_size, 6);
    }
}
