//! Tunable constants for the resource pipeline.
//!
//! A single [`BuilderConfig`] carries every threshold/worker-count named in
//! the data model and component design, with defaults mirroring the
//! original implementation's `ImageBuilderConfig`.

/// Bytes at/under which a file's contents are stored inline in the file
/// table instead of the blob store.
pub const INLINE_THRESHOLD: u64 = 64;

/// Lower (exclusive) / upper (inclusive) size bound for bundle candidates.
pub const BUNDLE_LOWER_THRESHOLD: u64 = 64;
pub const BUNDLE_UPPER_THRESHOLD: u64 = 4096;

/// Target cumulative uncompressed size per bundle batch.
pub const BUNDLE_BLOB_SIZE: u64 = 64 * 1024 * 1024;

/// A trailing batch is only kept if it reaches this fraction of
/// `BUNDLE_BLOB_SIZE`.
pub const MINIMUM_BUNDLE_SIZE_RATIO: f64 = 0.05;

/// Overall cap on the sum of compressed bundle sizes produced by one
/// bundle filter run; once reached, no further bundles are created.
pub const BUNDLES_COMPRESSED_MAXIMUM_SUM: u64 = 2 * 1024 * 1024 * 1024;

/// zstd level used when compressing bundle payloads.
pub const BUNDLE_ZSTD_COMPRESSION_LEVEL: i32 = 12;

/// Size (exclusive lower bound) above which standalone compression is
/// attempted.
pub const COMPRESSION_LOWER_THRESHOLD: u64 = 1024;

/// Minimum origin/compressed ratio for the compression filter to keep a
/// compressed blob.
pub const COMPRESSION_MIN_RATIO: f64 = 1.25;

/// zstd level used by the standalone compression filter.
pub const COMPRESSION_ZSTD_LEVEL: i32 = 9;

/// Target slice size; a blob qualifies for slicing once it exceeds
/// `2 * SLICE_SIZE`.
pub const SLICE_SIZE: u64 = 32 * 1024 * 1024;

/// zstd level used when compressing database blobs for finalize.
pub const DB_ZSTD_COMPRESSION_LEVEL: i32 = 22;

/// Streaming read buffer size used by ingest hashing workers.
pub const READ_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Ingest worker pool size.
    pub worker_threads: usize,
    /// Max in-flight ingest tasks (bounds memory growth under backpressure).
    pub ingest_max_concurrent_tasks: usize,
    /// Rows buffered by a producer before flushing to the DB writer queue.
    pub batch_write_size: usize,
    pub inline_threshold: u64,
    pub bundle_lower_threshold: u64,
    pub bundle_upper_threshold: u64,
    pub bundle_blob_size: u64,
    pub minimum_bundle_size_ratio: f64,
    pub bundles_compressed_maximum_sum: u64,
    pub bundle_zstd_level: i32,
    pub compression_lower_threshold: u64,
    pub compression_min_ratio: f64,
    pub compression_zstd_level: i32,
    pub compression_worker_threads: usize,
    pub compression_max_concurrent: usize,
    pub slice_size: u64,
    pub slice_worker_threads: usize,
    pub slice_max_concurrent: usize,
    pub slice_update_batch_size: usize,
    pub db_zstd_level: i32,
    pub read_size: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 6,
            ingest_max_concurrent_tasks: 256,
            batch_write_size: 1024,
            inline_threshold: INLINE_THRESHOLD,
            bundle_lower_threshold: BUNDLE_LOWER_THRESHOLD,
            bundle_upper_threshold: BUNDLE_UPPER_THRESHOLD,
            bundle_blob_size: BUNDLE_BLOB_SIZE,
            minimum_bundle_size_ratio: MINIMUM_BUNDLE_SIZE_RATIO,
            bundles_compressed_maximum_sum: BUNDLES_COMPRESSED_MAXIMUM_SUM,
            bundle_zstd_level: BUNDLE_ZSTD_COMPRESSION_LEVEL,
            compression_lower_threshold: COMPRESSION_LOWER_THRESHOLD,
            compression_min_ratio: COMPRESSION_MIN_RATIO,
            compression_zstd_level: COMPRESSION_ZSTD_LEVEL,
            compression_worker_threads: 6,
            compression_max_concurrent: 12,
            slice_size: SLICE_SIZE,
            slice_worker_threads: 6,
            slice_max_concurrent: 32,
            slice_update_batch_size: 16,
            db_zstd_level: DB_ZSTD_COMPRESSION_LEVEL,
            read_size: READ_SIZE,
        }
    }
}

impl BuilderConfig {
    pub fn slice_lower_bound(&self) -> u64 {
        self.slice_size * 2
    }

    pub fn slice_last_max_size(&self) -> u64 {
        self.slice_size * 3 / 2
    }
}

/// Format a byte count using binary units, for stats logging.
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0usize;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = BuilderConfig::default();
        assert_eq!(cfg.inline_threshold, 64);
        assert_eq!(cfg.bundle_upper_threshold, 4096);
        assert_eq!(cfg.slice_size, 32 * 1024 * 1024);
        assert_eq!(cfg.slice_lower_bound(), 64 * 1024 * 1024);
        assert_eq!(cfg.slice_last_max_size(), 48 * 1024 * 1024);
        assert_eq!(cfg.bundles_compressed_maximum_sum, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn human_readable_size_formats() {
        assert_eq!(human_readable_size(512), "512 B");
        assert_eq!(human_readable_size(2048), "2.00 KiB");
        assert_eq!(human_readable_size(5 * 1024 * 1024), "5.00 MiB");
    }
}
