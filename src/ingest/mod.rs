//! Ingest pipeline: walks a source rootfs with a fixed worker pool,
//! dispatches per-entry work, emits rows to the database writer, and
//! writes unique blobs to the store.
//!
//! No ordering is guaranteed between workers; correctness relies on the
//! content registry's mutual exclusion and the database writer's
//! duplicate-ignoring semantics.

use crate::blob_store::BlobStore;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::db::file_table::{DirectoryRow, FileResourceRow, InodeRow, NonRegularFileRow, RegularFileRow};
use crate::db::writer::{DbRow, ResourceTableInsert};
use crate::digest::Digest;
use crate::error::{Error, IngestError};
use crate::registry::ContentRegistry;
use crossbeam_channel::Sender;
use std::fs::{self, File};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug)]
enum EntryKind {
    Directory,
    Symlink { target: PathBuf },
    RegularFile,
    Whiteout,
    Skip,
}

#[derive(Debug)]
struct IngestJob {
    rel_path: String,
    abs_path: PathBuf,
    kind: EntryKind,
}

struct Worker<'a> {
    blob_store: &'a BlobStore,
    registry: &'a ContentRegistry,
    db_sender: Sender<DbRow>,
    inode_counter: Arc<AtomicI64>,
    cfg: &'a BuilderConfig,
}

impl<'a> Worker<'a> {
    fn fresh_inode_id(&self) -> i64 {
        self.inode_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn inode_id_for(&self, nlink: u64, is_dir: bool, ino: u64) -> i64 {
        if nlink == 1 || is_dir {
            self.fresh_inode_id()
        } else {
            -(ino as i64)
        }
    }

    fn send(&self, row: DbRow) -> Result<(), Error> {
        self.db_sender
            .send(row)
            .map_err(|_| Error::Ingest(IngestError::Cancelled))
    }

    fn process_directory(&self, job: &IngestJob) -> Result<(), Error> {
        let meta = fs::symlink_metadata(&job.abs_path)?;
        let inode_id = self.fresh_inode_id();
        self.send(DbRow::Inode(InodeRow {
            inode_id,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            xattrs: read_xattrs(&job.abs_path),
        }))?;
        self.send(DbRow::Directory(DirectoryRow {
            path: job.rel_path.clone(),
            inode_id,
        }))
    }

    fn process_symlink(&self, job: &IngestJob, target: &Path) -> Result<(), Error> {
        let meta = fs::symlink_metadata(&job.abs_path)?;
        let inode_id = self.inode_id_for(meta.nlink(), false, meta.ino());
        self.send(DbRow::Inode(InodeRow {
            inode_id,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            xattrs: None,
        }))?;
        self.send(DbRow::NonRegularFile(NonRegularFileRow {
            path: job.rel_path.clone(),
            inode_id,
            meta: Some(target.to_string_lossy().into_owned().into_bytes()),
        }))
    }

    fn process_whiteout(&self, job: &IngestJob) -> Result<(), Error> {
        let meta = fs::symlink_metadata(&job.abs_path)?;
        let inode_id = self.inode_id_for(meta.nlink(), false, meta.ino());
        self.send(DbRow::Inode(InodeRow {
            inode_id,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            xattrs: None,
        }))?;
        self.send(DbRow::NonRegularFile(NonRegularFileRow {
            path: job.rel_path.clone(),
            inode_id,
            meta: None,
        }))
    }

    fn process_regular_file(&self, job: &IngestJob, buf: &mut [u8]) -> Result<(), Error> {
        let meta = fs::symlink_metadata(&job.abs_path)?;
        let inode_id = self.inode_id_for(meta.nlink(), false, meta.ino());
        self.send(DbRow::Inode(InodeRow {
            inode_id,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            xattrs: read_xattrs(&job.abs_path),
        }))?;

        let size = meta.len();
        let resource_id = if size == 0 {
            0
        } else if size <= self.cfg.inline_threshold {
            let bytes = fs::read(&job.abs_path)?;
            let digest = Digest::of(&bytes);
            let (is_new, id) = self.registry.register(digest);
            if is_new {
                self.send(DbRow::FileResource(FileResourceRow {
                    resource_id: id as i64,
                    digest,
                    size,
                    contents: Some(bytes),
                }))?;
            }
            id as i64
        } else {
            let f = File::open(&job.abs_path)?;
            // Single read pass: stream-hash while writing into the blob
            // store, instead of hashing then re-reading the file to copy it.
            let (digest, read_len) = self.blob_store.put_reader(f, buf)?;
            if read_len != size {
                warn!(path = %job.abs_path.display(), "size changed under us during hashing");
            }
            let (is_new, id) = self.registry.register(digest);
            if is_new {
                self.send(DbRow::FileResource(FileResourceRow {
                    resource_id: id as i64,
                    digest,
                    size: read_len,
                    contents: None,
                }))?;
                self.send(DbRow::ResourceTable(ResourceTableInsert {
                    digest,
                    size: read_len,
                }))?;
            }
            id as i64
        };

        self.send(DbRow::RegularFile(RegularFileRow {
            path: job.rel_path.clone(),
            inode_id,
            resource_id,
        }))
    }
}

#[cfg(target_os = "linux")]
fn read_xattrs(path: &Path) -> Option<Vec<u8>> {
    let mut map = std::collections::HashMap::new();
    let names = xattr::list(path).ok()?;
    for name in names {
        if let Ok(Some(value)) = xattr::get(path, &name) {
            map.insert(name.to_string_lossy().into_owned(), value);
        }
    }
    if map.is_empty() {
        None
    } else {
        rmp_serde::to_vec_named(&map).ok()
    }
}

#[cfg(not(target_os = "linux"))]
fn read_xattrs(_path: &Path) -> Option<Vec<u8>> {
    None
}

/// Walk `src` and ingest every entry into the blob store and database
/// writer queue. Mirrors `SystemImageProcessor`: fixed worker pool,
/// bounded in-flight tasks, dispatch-by-type, inode policy.
pub struct SystemImageProcessor<'a> {
    pub blob_store: &'a BlobStore,
    pub registry: &'a ContentRegistry,
    pub cfg: &'a BuilderConfig,
}

impl<'a> SystemImageProcessor<'a> {
    pub fn new(blob_store: &'a BlobStore, registry: &'a ContentRegistry, cfg: &'a BuilderConfig) -> Self {
        Self {
            blob_store,
            registry,
            cfg,
        }
    }

    pub fn process(
        &self,
        src: &Path,
        db_sender: Sender<DbRow>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        if !src.is_dir() {
            return Err(Error::Ingest(IngestError::InvalidSource(src.to_path_buf())));
        }

        // Empty-file sentinel: always present, regardless of whether the
        // source tree contains any zero-byte files.
        db_sender
            .send(DbRow::FileResource(FileResourceRow {
                resource_id: 0,
                digest: Digest::empty(),
                size: 0,
                contents: Some(Vec::new()),
            }))
            .map_err(|_| Error::Ingest(IngestError::Cancelled))?;

        let (job_sender, job_receiver) =
            crossbeam_channel::bounded::<IngestJob>(self.cfg.ingest_max_concurrent_tasks);
        let inode_counter = Arc::new(AtomicI64::new(1));

        let mut handles = Vec::with_capacity(self.cfg.worker_threads);
        for _ in 0..self.cfg.worker_threads {
            let job_receiver = job_receiver.clone();
            let db_sender = db_sender.clone();
            let cancel = cancel.clone();
            let worker = Worker {
                blob_store: self.blob_store,
                registry: self.registry,
                db_sender,
                inode_counter: Arc::clone(&inode_counter),
                cfg: self.cfg,
            };
            handles.push(std::thread::spawn(move || -> Result<(), Error> {
                let mut buf = vec![0u8; worker.cfg.read_size];
                while let Ok(job) = job_receiver.recv() {
                    if cancel.is_cancelled() {
                        return Err(Error::Ingest(IngestError::Cancelled));
                    }
                    let result = match &job.kind {
                        EntryKind::Directory => worker.process_directory(&job),
                        EntryKind::Symlink { target } => worker.process_symlink(&job, target),
                        EntryKind::RegularFile => worker.process_regular_file(&job, &mut buf),
                        EntryKind::Whiteout => worker.process_whiteout(&job),
                        EntryKind::Skip => Ok(()),
                    };
                    if let Err(e) = result {
                        cancel.cancel();
                        return Err(e);
                    }
                }
                Ok(())
            }));
        }

        let walk_result = self.drive_walk(src, &job_sender, &cancel);
        drop(job_sender);

        let mut first_err = walk_result.err();
        for handle in handles {
            if let Ok(Err(e)) = handle.join() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drive_walk(
        &self,
        src: &Path,
        job_sender: &Sender<IngestJob>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        for entry in WalkDir::new(src).follow_links(false).into_iter() {
            if cancel.is_cancelled() {
                return Err(Error::Ingest(IngestError::Cancelled));
            }
            let entry = entry.map_err(IngestError::Walk)?;
            let abs_path = entry.path().to_path_buf();
            let rel_path = canonical_rel_path(src, &abs_path);
            let file_type = entry.file_type();

            let kind = if file_type.is_symlink() {
                match fs::read_link(&abs_path) {
                    Ok(target) => EntryKind::Symlink { target },
                    Err(e) => {
                        warn!(path = %abs_path.display(), error = %e, "failed to read symlink target");
                        EntryKind::Skip
                    }
                }
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::RegularFile
            } else if file_type.is_char_device() {
                match is_whiteout(&abs_path) {
                    Ok(true) => EntryKind::Whiteout,
                    Ok(false) => EntryKind::Skip,
                    Err(_) => EntryKind::Skip,
                }
            } else {
                // Block devices, fifos, sockets: skipped silently.
                EntryKind::Skip
            };

            debug!(path = %rel_path, ?kind, "dispatching ingest job");
            let job = IngestJob {
                rel_path,
                abs_path,
                kind,
            };
            if job_sender.send(job).is_err() {
                // A worker died and dropped its receiver clone; the
                // remaining clones keep the channel open, so this only
                // happens once every receiver clone is gone.
                return Err(Error::Ingest(IngestError::Cancelled));
            }
        }
        Ok(())
    }
}

fn canonical_rel_path(root: &Path, path: &Path) -> String {
    if path == root {
        return "/".to_string();
    }
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut s = String::from("/");
    s.push_str(&rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
    s
}

#[cfg(target_os = "linux")]
fn is_whiteout(path: &Path) -> std::io::Result<bool> {
    let meta = fs::symlink_metadata(path)?;
    let rdev = meta.rdev();
    let major = nix::sys::stat::major(rdev);
    let minor = nix::sys::stat::minor(rdev);
    Ok(major == 0 && minor == 0)
}

#[cfg(not(target_os = "linux"))]
fn is_whiteout(_path: &Path) -> std::io::Result<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_rel_path_handles_root_and_nested() {
        let root = Path::new("/src/rootfs");
        assert_eq!(canonical_rel_path(root, root), "/");
        assert_eq!(
            canonical_rel_path(root, &root.join("etc/hostname")),
            "/etc/hostname"
        );
    }
}
