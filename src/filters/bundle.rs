//! Bundle filter: coalesces many tiny blobs into a few large
//! zstd-compressed bundles to cut per-object overhead.
//!
//! Selection, batching, and commit discipline follow
//! `original_source/.../_resource_process/_bundle_filter.py`, enriched with
//! the streaming zstd encoder (checksum + content-size) described in the
//! fuller component design.

use crate::blob_store::BlobStore;
use crate::config::BuilderConfig;
use crate::db::filter_applied::FilterApplied;
use crate::db::resource_table;
use crate::digest::{Digest, StreamingHasher};
use crate::error::{Error, FilterError};
use crate::registry::ResourceId;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use tracing::{debug, info};

struct BundledEntry {
    resource_id: ResourceId,
    offset: u64,
    len: u64,
}

struct BundleBatchResult {
    bundle_digest: Digest,
    bundle_size: u64,
    compressed_digest: Digest,
    compressed_size: u64,
    entries: Vec<BundledEntry>,
}

/// Run the bundle filter over the resource table, writing new bundle blobs
/// and updating `filter_applied` for every entry it absorbs.
pub fn run(
    conn: &Connection,
    blob_store: &BlobStore,
    cfg: &BuilderConfig,
    protected: &HashSet<Digest>,
) -> Result<usize, Error> {
    let candidates = resource_table::select_candidates(
        conn,
        Some(cfg.bundle_lower_threshold),
        Some(cfg.bundle_upper_threshold),
    )?;
    let candidates: Vec<_> = candidates
        .into_iter()
        .filter(|row| !protected.contains(&row.digest))
        .collect();

    if candidates.is_empty() {
        debug!("bundle filter: no candidates");
        return Ok(0);
    }

    let min_batch_size = (cfg.bundle_blob_size as f64 * cfg.minimum_bundle_size_ratio) as u64;
    let mut batches: Vec<Vec<resource_table::ResourceRow>> = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;
    for row in candidates {
        if current_size > 0 && current_size + row.size > cfg.bundle_blob_size {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += row.size;
        current.push(row);
    }
    if !current.is_empty() && current_size > min_batch_size {
        batches.push(current);
    } else if !current.is_empty() {
        debug!(
            size = current_size,
            "dropping undersized trailing bundle batch"
        );
    }

    let mut results = Vec::new();
    let mut compressed_sum = 0u64;
    for batch in &batches {
        if compressed_sum >= cfg.bundles_compressed_maximum_sum {
            debug!(
                compressed_sum,
                cap = cfg.bundles_compressed_maximum_sum,
                "bundle filter: compressed sum cap reached, halting further bundle creation"
            );
            break;
        }
        let result = bundle_one_batch(blob_store, batch)?;
        compressed_sum += result.compressed_size;
        results.push(result);
    }

    commit(conn, &results)?;

    let entries_bundled: usize = results.iter().map(|r| r.entries.len()).sum();
    info!(
        bundles = results.len(),
        entries_bundled, "bundle filter complete"
    );
    Ok(entries_bundled)
}

fn bundle_one_batch(
    blob_store: &BlobStore,
    batch: &[resource_table::ResourceRow],
) -> Result<BundleBatchResult, Error> {
    let tmp_path = blob_store.reserve_tmp_path();
    let mut entries = Vec::with_capacity(batch.len());
    let mut offset = 0u64;
    let bundle_digest;

    {
        let tmp_file = File::create(&tmp_path)?;
        let mut encoder = zstd::stream::write::Encoder::new(tmp_file, 12)?;
        encoder.include_checksum(true)?;
        let mut hasher = StreamingHasher::new();

        for row in batch {
            let mut blob = blob_store.open_blob(&row.digest)?;
            let mut contents = Vec::with_capacity(row.size as usize);
            blob.read_to_end(&mut contents)?;
            if contents.len() as u64 != row.size {
                return Err(Error::Filter(FilterError::SizeMismatch {
                    digest: row.digest.to_hex(),
                    declared: row.size,
                    read: contents.len() as u64,
                }));
            }
            hasher.update(&contents);
            encoder.write_all(&contents)?;
            entries.push(BundledEntry {
                resource_id: row.resource_id,
                offset,
                len: row.size,
            });
            offset += row.size;
        }
        // Digest of the uncompressed stream: the origin bundle's own
        // identity, never materialized as a blob on its own (it is only
        // reconstructible by decompressing the compressed bundle below,
        // the same relationship any CompressFilter origin has to its
        // replacement).
        bundle_digest = hasher.finalize();
        encoder.finish()?;
    }

    let compressed_bytes = std::fs::read(&tmp_path)?;
    let compressed_digest = Digest::of(&compressed_bytes);
    let compressed_size = compressed_bytes.len() as u64;
    blob_store.put_file_as(&tmp_path, &compressed_digest)?;
    let _ = std::fs::remove_file(&tmp_path);

    for entry_row in batch {
        blob_store.unlink(&entry_row.digest);
    }

    Ok(BundleBatchResult {
        bundle_digest,
        bundle_size: offset,
        compressed_digest,
        compressed_size,
        entries,
    })
}

fn commit(conn: &Connection, results: &[BundleBatchResult]) -> Result<(), Error> {
    let tx = conn.unchecked_transaction()?;
    for result in results {
        let compressed_id = resource_table::insert_or_ignore(
            conn,
            &result.compressed_digest,
            result.compressed_size,
        )?;
        let ids = resource_table::next_resource_ids(conn, 1)?;
        let uncompressed_id = ids.start;
        resource_table::insert_with_id(conn, uncompressed_id, &result.bundle_digest, result.bundle_size)?;
        resource_table::set_filter_applied(
            conn,
            uncompressed_id,
            &FilterApplied::compress(compressed_id),
        )?;
        for entry in &result.entries {
            resource_table::set_filter_applied(
                conn,
                entry.resource_id,
                &FilterApplied::bundle(uncompressed_id, entry.offset, entry.len),
            )?;
        }
    }
    tx.commit()?;
    Ok(())
}
