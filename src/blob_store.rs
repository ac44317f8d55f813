//! Content-addressed blob store: a flat directory where every regular file
//! is named by the hex of its SHA-256 digest.
//!
//! Publication is atomic: write to a reserved-prefix temp name, then
//! rename into place. A rename racing another writer of the same content
//! is harmless — both produce byte-identical files at the same path.

use crate::digest::Digest;
use crate::error::BlobStoreError;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TMP_PREFIX: &str = ".tmp-";

pub struct BlobStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    fn tmp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{TMP_PREFIX}{}-{n}", std::process::id()))
    }

    /// Reserve a fresh temp path under the store, for callers (filters)
    /// that build up a blob's contents over several steps before it has a
    /// final digest.
    pub fn reserve_tmp_path(&self) -> PathBuf {
        self.tmp_path()
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.path_for(digest).is_file()
    }

    pub fn open_blob(&self, digest: &Digest) -> Result<File, BlobStoreError> {
        let path = self.path_for(digest);
        File::open(&path).map_err(|source| BlobStoreError::Io { path, source })
    }

    /// Write `bytes` into the store, returning its digest and size.
    /// Tolerates concurrent `put` of identical content: if the target
    /// already exists when we go to rename, the temp file is discarded.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<(Digest, u64), BlobStoreError> {
        let digest = Digest::of(bytes);
        if self.exists(&digest) {
            return Ok((digest, bytes.len() as u64));
        }
        let tmp = self.tmp_path();
        self.write_tmp(&tmp, |f| f.write_all(bytes))?;
        self.finish_put(&tmp, &digest)?;
        Ok((digest, bytes.len() as u64))
    }

    /// Stream-hash `reader` while writing its bytes into the store, using
    /// `buf` as the reusable per-thread read buffer.
    pub fn put_reader(
        &self,
        mut reader: impl Read,
        buf: &mut [u8],
    ) -> Result<(Digest, u64), BlobStoreError> {
        let tmp = self.tmp_path();
        let (digest, size) = {
            let mut f = File::create(&tmp).map_err(|source| BlobStoreError::Io {
                path: tmp.clone(),
                source,
            })?;
            let mut hasher = crate::digest::StreamingHasher::new();
            let mut total = 0u64;
            loop {
                let n = reader.read(buf).map_err(|source| BlobStoreError::Io {
                    path: tmp.clone(),
                    source,
                })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                f.write_all(&buf[..n])
                    .map_err(|source| BlobStoreError::Io {
                        path: tmp.clone(),
                        source,
                    })?;
                total += n as u64;
            }
            (hasher.finalize(), total)
        };
        if self.exists(&digest) {
            let _ = fs::remove_file(&tmp);
        } else {
            self.finish_put(&tmp, &digest)?;
        }
        Ok((digest, size))
    }

    /// Copy an on-disk file into the store under a digest already computed
    /// by the caller (ingest streams the hash separately, then copies).
    /// No-op if the blob already exists.
    pub fn put_file_as(&self, src: &Path, digest: &Digest) -> Result<(), BlobStoreError> {
        if self.exists(digest) {
            return Ok(());
        }
        let tmp = self.tmp_path();
        fs::copy(src, &tmp).map_err(|source| BlobStoreError::Io {
            path: src.to_path_buf(),
            source,
        })?;
        self.finish_put(&tmp, digest)
    }

    fn write_tmp(
        &self,
        tmp: &Path,
        write: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<(), BlobStoreError> {
        let mut f = File::create(tmp).map_err(|source| BlobStoreError::Io {
            path: tmp.to_path_buf(),
            source,
        })?;
        write(&mut f).map_err(|source| BlobStoreError::Io {
            path: tmp.to_path_buf(),
            source,
        })
    }

    fn finish_put(&self, tmp: &Path, digest: &Digest) -> Result<(), BlobStoreError> {
        let dst = self.path_for(digest);
        match fs::rename(tmp, &dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Another writer may have published the same digest first;
                // treat that as success and clean up our temp file.
                if dst.is_file() {
                    let _ = fs::remove_file(tmp);
                    Ok(())
                } else {
                    Err(BlobStoreError::Io {
                        path: dst,
                        source: e,
                    })
                }
            }
        }
    }

    /// zstd-compress `bytes` at `level` and publish the compressed payload.
    /// Used to store the file-table/resource-table databases as blobs.
    pub fn put_compressed(&self, bytes: &[u8], level: i32) -> Result<(Digest, u64), BlobStoreError> {
        let compressed = zstd::encode_all(bytes, level).map_err(|source| BlobStoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        self.put_bytes(&compressed)
    }

    /// Best-effort unlink; missing files are not an error.
    pub fn unlink(&self, digest: &Digest) {
        let _ = fs::remove_file(self.path_for(digest));
    }

    /// Iterate over `(digest, size)` for every blob currently in the store.
    pub fn iter(&self) -> impl Iterator<Item = (Digest, u64)> + '_ {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if name.starts_with(TMP_PREFIX) {
                    return None;
                }
                let digest = Digest::from_hex(name)?;
                let size = entry.metadata().ok()?.len();
                Some((digest, size))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_bytes_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let (digest, size) = store.put_bytes(b"hello").unwrap();
        assert_eq!(digest, Digest::of(b"hello"));
        assert_eq!(size, 5);
        assert!(store.exists(&digest));
        assert!(store.path_for(&digest).is_file());
    }

    #[test]
    fn put_bytes_concurrent_same_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let (d1, _) = store.put_bytes(b"same content").unwrap();
        let (d2, _) = store.put_bytes(b"same content").unwrap();
        assert_eq!(d1, d2);
        let entries: Vec<_> = store.iter().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn unlink_missing_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        store.unlink(&Digest::of(b"never written"));
    }

    #[test]
    fn put_reader_streams_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let data = vec![7u8; 10_000];
        let mut buf = vec![0u8; 1024];
        let (digest, size) = store.put_reader(&data[..], &mut buf).unwrap();
        assert_eq!(size, 10_000);
        assert_eq!(digest, Digest::of(&data));
    }
}
