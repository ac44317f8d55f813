//! Database writer: a single background thread draining a bounded
//! multi-producer queue of typed rows into batched inserts, decoupling
//! hashing workers from SQLite's single-writer model.
//!
//! Workers never touch SQLite directly; they send [`DbRow`] values over
//! the queue and this thread performs all writes.

use crate::cancel::CancellationToken;
use crate::db::file_table::{
    self, DirectoryRow, FileResourceRow, InodeRow, NonRegularFileRow, RegularFileRow,
};
use crate::db::resource_table;
use crate::digest::Digest;
use crossbeam_channel::{Receiver, Sender};
use rusqlite::Connection;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// A single pending resource-table insert (digest, size), queued alongside
/// file-table rows so both databases are populated from the same worker
/// stream.
#[derive(Debug, Clone)]
pub struct ResourceTableInsert {
    pub digest: Digest,
    pub size: u64,
}

/// Rows sent by ingest workers to the database writer thread. `None`
/// (modeled as [`DbRow::Shutdown`]) signals graceful shutdown.
#[derive(Debug, Clone)]
pub enum DbRow {
    Inode(InodeRow),
    Directory(DirectoryRow),
    NonRegularFile(NonRegularFileRow),
    RegularFile(RegularFileRow),
    FileResource(FileResourceRow),
    ResourceTable(ResourceTableInsert),
    Shutdown,
}

pub struct DatabaseWriter {
    sender: Sender<DbRow>,
    handle: Option<JoinHandle<Result<(), crate::error::DbError>>>,
}

impl DatabaseWriter {
    /// Spawn the writer thread, opening its own connections to both
    /// databases (SQLite connections are not `Send`-shared; each thread
    /// gets its own).
    pub fn start(
        file_table_path: PathBuf,
        resource_table_path: PathBuf,
        batch_write_size: usize,
        cancel: CancellationToken,
    ) -> Result<Self, crate::error::DbError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("db-writer".into())
            .spawn(move || {
                run_writer(
                    file_table_path,
                    resource_table_path,
                    receiver,
                    batch_write_size,
                    cancel,
                )
            })
            .expect("failed to spawn db-writer thread");
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<DbRow> {
        self.sender.clone()
    }

    /// Send the shutdown sentinel and join the writer thread, propagating
    /// any error it encountered.
    pub fn finish(mut self) -> Result<(), crate::error::DbError> {
        let _ = self.sender.send(DbRow::Shutdown);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(crate::error::DbError::Sqlite(rusqlite::Error::InvalidQuery)),
            }
        } else {
            Ok(())
        }
    }
}

struct Batches {
    inodes: Vec<InodeRow>,
    directories: Vec<DirectoryRow>,
    non_regular_files: Vec<NonRegularFileRow>,
    regular_files: Vec<RegularFileRow>,
    file_resources: Vec<FileResourceRow>,
    resource_inserts: Vec<ResourceTableInsert>,
}

impl Batches {
    fn new() -> Self {
        Self {
            inodes: Vec::new(),
            directories: Vec::new(),
            non_regular_files: Vec::new(),
            regular_files: Vec::new(),
            file_resources: Vec::new(),
            resource_inserts: Vec::new(),
        }
    }

    fn pending(&self) -> usize {
        self.inodes.len()
            + self.directories.len()
            + self.non_regular_files.len()
            + self.regular_files.len()
            + self.file_resources.len()
            + self.resource_inserts.len()
    }

    fn flush(&mut self, ft_conn: &Connection, rst_conn: &Connection) -> Result<(), crate::error::DbError> {
        let ft_tx = ft_conn.unchecked_transaction()?;
        for row in self.inodes.drain(..) {
            file_table::insert_inode(ft_conn, &row)?;
        }
        for row in self.directories.drain(..) {
            file_table::insert_directory(ft_conn, &row)?;
        }
        for row in self.non_regular_files.drain(..) {
            file_table::insert_non_regular_file(ft_conn, &row)?;
        }
        for row in self.regular_files.drain(..) {
            file_table::insert_regular_file(ft_conn, &row)?;
        }
        for row in self.file_resources.drain(..) {
            file_table::insert_file_resource(ft_conn, &row)?;
        }
        ft_tx.commit()?;

        let rst_tx = rst_conn.unchecked_transaction()?;
        for insert in self.resource_inserts.drain(..) {
            resource_table::insert_or_ignore(rst_conn, &insert.digest, insert.size)?;
        }
        rst_tx.commit()?;
        Ok(())
    }
}

fn run_writer(
    file_table_path: PathBuf,
    resource_table_path: PathBuf,
    receiver: Receiver<DbRow>,
    batch_write_size: usize,
    cancel: CancellationToken,
) -> Result<(), crate::error::DbError> {
    let ft_conn = file_table::open(&file_table_path)?;
    let rst_conn = resource_table::open(&resource_table_path)?;
    let mut batches = Batches::new();

    for row in receiver.iter() {
        if cancel.is_cancelled() {
            break;
        }
        match row {
            DbRow::Inode(r) => batches.inodes.push(r),
            DbRow::Directory(r) => batches.directories.push(r),
            DbRow::NonRegularFile(r) => batches.non_regular_files.push(r),
            DbRow::RegularFile(r) => batches.regular_files.push(r),
            DbRow::FileResource(r) => batches.file_resources.push(r),
            DbRow::ResourceTable(r) => batches.resource_inserts.push(r),
            DbRow::Shutdown => break,
        }
        if batches.pending() >= batch_write_size {
            if let Err(e) = batches.flush(&ft_conn, &rst_conn) {
                error!(error = %e, "db writer flush failed, signalling cancellation");
                cancel.cancel();
                return Err(e);
            }
        }
    }

    // Final flush on clean shutdown only; an aborted run discards
    // in-flight batches, as the whole image is discarded by the caller.
    if !cancel.is_cancelled() {
        batches.flush(&ft_conn, &rst_conn)?;
        debug!("db writer flushed final batch on shutdown");
    }
    Ok(())
}
