//! Compression filter: standalone zstd compression of blobs too large to
//! bundle but not yet sliced, applied only when the compression ratio
//! clears the configured threshold.
//!
//! Worker pool + semaphore concurrency, thread-local encoder reuse, and the
//! insert-ignore-then-lookup commit pattern follow
//! `original_source/.../_resource_process/_compression_filter.py`.

use crate::blob_store::BlobStore;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::db::filter_applied::FilterApplied;
use crate::db::resource_table::{self, ResourceRow};
use crate::digest::Digest;
use crate::error::Error;
use crossbeam_channel::bounded;
use rusqlite::Connection;
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, info};

struct CompressedEntry {
    origin_resource_id: u64,
    compressed_digest: Digest,
    compressed_size: u64,
}

pub fn run(
    conn: &Connection,
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    protected: &HashSet<Digest>,
    cancel: CancellationToken,
) -> Result<usize, Error> {
    let candidates: Vec<ResourceRow> =
        resource_table::select_candidates(conn, Some(cfg.compression_lower_threshold), None)?
            .into_iter()
            .filter(|row| !protected.contains(&row.digest))
            .collect();

    if candidates.is_empty() {
        debug!("compression filter: no candidates");
        return Ok(0);
    }

    let results = compress_candidates_parallel(blob_store, cfg, &candidates, cancel)?;
    let applied = results.len();
    commit(conn, &results)?;
    info!(compressed = applied, "compression filter complete");
    Ok(applied)
}

fn compress_candidates_parallel(
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    candidates: &[ResourceRow],
    cancel: CancellationToken,
) -> Result<Vec<CompressedEntry>, Error> {
    let mut results = Vec::new();
    std::thread::scope(|scope| -> Result<(), Error> {
        let (job_tx, job_rx) = bounded::<ResourceRow>(cfg.compression_max_concurrent);
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<Result<Option<CompressedEntry>, Error>>();

        let mut worker_handles = Vec::with_capacity(cfg.compression_worker_threads);
        for _ in 0..cfg.compression_worker_threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            worker_handles.push(scope.spawn(move || {
                while let Ok(row) = job_rx.recv() {
                    if cancel.is_cancelled() {
                        let _ = result_tx.send(Err(Error::Cancelled));
                        return;
                    }
                    let outcome = compress_one(blob_store, &row, cfg.compression_zstd_level, cfg.compression_min_ratio);
                    if outcome.is_err() {
                        cancel.cancel();
                    }
                    if result_tx.send(outcome).is_err() {
                        return;
                    }
                }
            }));
        }
        drop(job_rx);
        drop(result_tx);

        for row in candidates.iter().cloned() {
            if cancel.is_cancelled() {
                break;
            }
            if job_tx.send(row).is_err() {
                break;
            }
        }
        drop(job_tx);

        for outcome in result_rx.iter() {
            match outcome {
                Ok(Some(entry)) => results.push(entry),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }

        for h in worker_handles {
            let _ = h.join();
        }
        Ok(())
    })?;

    Ok(results)
}

fn compress_one(
    blob_store: &BlobStore,
    row: &ResourceRow,
    level: i32,
    min_ratio: f64,
) -> Result<Option<CompressedEntry>, Error> {
    let mut src = blob_store.open_blob(&row.digest)?;
    let mut src_bytes = Vec::with_capacity(row.size as usize);
    src.read_to_end(&mut src_bytes)?;

    let tmp_path = blob_store.reserve_tmp_path();
    {
        let tmp_file = std::fs::File::create(&tmp_path)?;
        let mut encoder = zstd::stream::write::Encoder::new(tmp_file, level)?;
        encoder.include_checksum(true)?;
        std::io::Write::write_all(&mut encoder, &src_bytes)?;
        encoder.finish()?;
    }

    let compressed_bytes = std::fs::read(&tmp_path)?;
    let compressed_size = compressed_bytes.len() as u64;
    let ratio = row.size as f64 / compressed_size.max(1) as f64;

    if ratio >= min_ratio {
        let compressed_digest = Digest::of(&compressed_bytes);
        blob_store.put_file_as(&tmp_path, &compressed_digest)?;
        let _ = std::fs::remove_file(&tmp_path);
        blob_store.unlink(&row.digest);
        Ok(Some(CompressedEntry {
            origin_resource_id: row.resource_id,
            compressed_digest,
            compressed_size,
        }))
    } else {
        let _ = std::fs::remove_file(&tmp_path);
        Ok(None)
    }
}

fn commit(conn: &Connection, results: &[CompressedEntry]) -> Result<(), Error> {
    let tx = conn.unchecked_transaction()?;
    for entry in results {
        // Insert-ignore tolerates another concurrent build racing to the
        // same compressed digest; look the id back up by digest afterward
        // rather than trusting insert_or_ignore's own return value, since
        // a losing insert must still resolve to the winner's id.
        resource_table::insert_or_ignore(conn, &entry.compressed_digest, entry.compressed_size)?;
        let compressed_id = resource_table::lookup_id_by_digest(conn, &entry.compressed_digest)?
            .expect("just inserted or already present");
        resource_table::set_filter_applied(
            conn,
            entry.origin_resource_id,
            &FilterApplied::compress(compressed_id),
        )?;
    }
    tx.commit()?;
    Ok(())
}
