//! The four composable resource filters, run strictly in sequence:
//! bundle → compression → slice. Each is idempotent (selection predicates
//! exclude already-filtered rows) and skips protected digests.

pub mod bundle;
pub mod compression;
pub mod protected;
pub mod slice;

pub use protected::{collect_protected_resources, ManifestDescriptor};

use crate::blob_store::BlobStore;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::db::{file_table, resource_table};
use crate::digest::Digest;
use crate::error::Error;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct FilterReport {
    pub bundled: usize,
    pub compressed: usize,
    pub sliced: usize,
}

#[derive(Debug, Clone)]
pub struct DbExport {
    pub file_table_digest: Digest,
    pub resource_table_digest: Digest,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FinalizeOptions {
    pub skip_bundle: bool,
    pub skip_compression: bool,
    pub skip_slice: bool,
}

/// Run bundle, compression, and slice in strict sequence over the
/// resource table, then VACUUM it. Mirrors `finalize_cmd`'s orchestration
/// minus the out-of-scope OCI index/signing steps.
pub fn finalize(
    conn: &Connection,
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    protected: &HashSet<Digest>,
    cancel: CancellationToken,
    options: FinalizeOptions,
) -> Result<FilterReport, Error> {
    let mut report = FilterReport::default();

    if !options.skip_bundle {
        info!("applying bundle filter");
        report.bundled = bundle::run(conn, blob_store, cfg, protected)?;
    } else {
        info!("skipping bundle filter");
    }

    if !options.skip_compression {
        info!("applying compression filter");
        report.compressed = compression::run(conn, blob_store, cfg, protected, cancel.clone())?;
    } else {
        info!("skipping compression filter");
    }

    if !options.skip_slice {
        info!("applying slice filter");
        report.sliced = slice::run(conn, blob_store, cfg, protected, cancel)?;
    } else {
        info!("skipping slice filter");
    }

    resource_table::vacuum(conn)?;
    Ok(report)
}

/// Publish the resource-table and file-table SQLite files as
/// zstd-compressed blobs, for the image manifest/index to reference.
/// Takes database connections only to drive them through a clean
/// `VACUUM` and back to `DELETE` journal mode before the files are read
/// off disk, so the bytes compressed below are the complete database
/// rather than a base file with pending changes in a `-wal` sidecar.
pub fn export_databases(
    resource_conn: &Connection,
    file_table_conn: &Connection,
    resource_table_path: &Path,
    file_table_path: &Path,
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
) -> Result<DbExport, Error> {
    resource_table::vacuum(resource_conn)?;
    file_table::vacuum(file_table_conn)?;
    resource_table::set_journal_mode_delete(resource_conn)?;
    file_table::set_journal_mode_delete(file_table_conn)?;

    let resource_bytes = std::fs::read(resource_table_path)?;
    let (resource_table_digest, resource_compressed_size) =
        blob_store.put_compressed(&resource_bytes, cfg.db_zstd_level)?;

    let file_bytes = std::fs::read(file_table_path)?;
    let (file_table_digest, file_compressed_size) =
        blob_store.put_compressed(&file_bytes, cfg.db_zstd_level)?;

    info!(
        resource_table_digest = %resource_table_digest,
        resource_table_size = %crate::config::human_readable_size(resource_compressed_size),
        file_table_digest = %file_table_digest,
        file_table_size = %crate::config::human_readable_size(file_compressed_size),
        "exported databases as compressed blobs"
    );
    Ok(DbExport {
        file_table_digest,
        resource_table_digest,
    })
}
