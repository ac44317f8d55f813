//! Slice filter: chunks very large blobs into bounded-size fragments so no
//! single transport request has to move more than ~1.5x the slice size.
//!
//! Buffer reuse, the "last slice may run up to 1.5x SLICE_SIZE" rule, and
//! the batched insert-ignore-then-lookup commit pattern follow
//! `original_source/.../_resource_process/_slice_filter.py`.

use crate::blob_store::BlobStore;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::db::filter_applied::FilterApplied;
use crate::db::resource_table::{self, ResourceRow};
use crate::digest::Digest;
use crate::error::Error;
use crate::registry::ResourceId;
use rusqlite::Connection;
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, info};

struct SlicedOrigin {
    origin_resource_id: ResourceId,
    slices: Vec<(Digest, u64)>,
}

pub fn run(
    conn: &Connection,
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    protected: &HashSet<Digest>,
    cancel: CancellationToken,
) -> Result<usize, Error> {
    let candidates: Vec<ResourceRow> =
        resource_table::select_candidates(conn, Some(cfg.slice_lower_bound()), None)?
            .into_iter()
            .filter(|row| !protected.contains(&row.digest))
            .collect();

    if candidates.is_empty() {
        debug!("slice filter: no candidates");
        return Ok(0);
    }

    let sliced = slice_candidates_parallel(blob_store, cfg, &candidates, cancel)?;
    let applied = sliced.len();

    for batch in sliced.chunks(cfg.slice_update_batch_size) {
        commit_batch(conn, batch)?;
    }

    info!(sliced = applied, "slice filter complete");
    Ok(applied)
}

fn slice_candidates_parallel(
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    candidates: &[ResourceRow],
    cancel: CancellationToken,
) -> Result<Vec<SlicedOrigin>, Error> {
    let mut results = Vec::new();
    std::thread::scope(|scope| -> Result<(), Error> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<ResourceRow>(cfg.slice_max_concurrent);
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<Result<SlicedOrigin, Error>>();

        let mut handles = Vec::with_capacity(cfg.slice_worker_threads);
        for _ in 0..cfg.slice_worker_threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            handles.push(scope.spawn(move || {
                let mut buf = vec![0u8; cfg.slice_last_max_size() as usize];
                while let Ok(row) = job_rx.recv() {
                    if cancel.is_cancelled() {
                        let _ = result_tx.send(Err(Error::Cancelled));
                        return;
                    }
                    let outcome = slice_one(blob_store, &row, cfg, &mut buf);
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
            results.push(outcome?);
        }
        for h in handles {
            let _ = h.join();
        }
        Ok(())
    })?;
    Ok(results)
}

fn slice_one(
    blob_store: &BlobStore,
    row: &ResourceRow,
    cfg: &BuilderConfig,
    buf: &mut [u8],
) -> Result<SlicedOrigin, Error> {
    let mut src = blob_store.open_blob(&row.digest)?;
    let mut remaining = row.size;
    let mut slices = Vec::new();
    let last_max = cfg.slice_last_max_size();
    let slice_size = cfg.slice_size;

    while remaining > last_max {
        let read_len = read_chunk(&mut src, buf, slice_size.min(remaining) as usize)?;
        let digest = Digest::of(&buf[..read_len]);
        blob_store.put_bytes(&buf[..read_len])?;
        slices.push((digest, read_len as u64));
        remaining -= read_len as u64;
    }
    // Final chunk: whatever remains, up to `1.5 * slice_size`.
    let read_len = read_chunk(&mut src, buf, remaining as usize)?;
    if read_len > 0 {
        let digest = Digest::of(&buf[..read_len]);
        blob_store.put_bytes(&buf[..read_len])?;
        slices.push((digest, read_len as u64));
    }

    blob_store.unlink(&row.digest);

    Ok(SlicedOrigin {
        origin_resource_id: row.resource_id,
        slices,
    })
}

fn read_chunk(src: &mut impl Read, buf: &mut [u8], want: usize) -> Result<usize, Error> {
    let mut filled = 0usize;
    while filled < want {
        let n = src.read(&mut buf[filled..want])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn commit_batch(conn: &Connection, batch: &[SlicedOrigin]) -> Result<(), Error> {
    let tx = conn.unchecked_transaction()?;
    for origin in batch {
        for (digest, size) in &origin.slices {
            // Collisions across origins are expected and fine: a slice
            // from one file may equal a slice from another.
            resource_table::insert_or_ignore(conn, digest, *size)?;
        }
    }
    for origin in batch {
        let mut ids = Vec::with_capacity(origin.slices.len());
        for (digest, _) in &origin.slices {
            let id = resource_table::lookup_id_by_digest(conn, digest)?
                .expect("slice digest just inserted or already present");
            ids.push(id);
        }
        resource_table::set_filter_applied(
            conn,
            origin.origin_resource_id,
            &FilterApplied::slice(ids),
        )?;
    }
    tx.commit()?;
    Ok(())
}
