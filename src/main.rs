//! Thin CLI front-end exercising the resource pipeline manually.
//!
//! Argument parsing and the OCI index/signing surface are out of scope for
//! this crate (see `SPEC_FULL.md` §1); this binary exists only so the
//! library is runnable end-to-end during manual testing.

use clap::{Parser, Subcommand};
use ota_image_builder::db::writer::DatabaseWriter;
use ota_image_builder::db::{file_table, resource_table};
use ota_image_builder::error::exit_with_err_msg;
use ota_image_builder::filters::{self, FinalizeOptions};
use ota_image_builder::{
    stats, BlobStore, BuilderConfig, CancellationToken, ContentRegistry, Result, SystemImageProcessor,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ota-image-builder", about = "Content-addressed OTA image resource pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a source rootfs into an image's blob store and file table.
    Ingest { src: PathBuf, image_root: PathBuf },
    /// Run the bundle/compression/slice filter chain over an image.
    Finalize {
        image_root: PathBuf,
        #[arg(long)]
        skip_bundle: bool,
        #[arg(long)]
        skip_compression: bool,
        #[arg(long)]
        skip_slice: bool,
    },
    /// Print post-ingest/post-filter image statistics.
    Stats { image_root: PathBuf },
}

fn blobs_dir(image_root: &Path) -> PathBuf {
    image_root.join("blobs").join("sha256")
}

fn resource_table_path(image_root: &Path) -> PathBuf {
    image_root.join("resource_table.sqlite3")
}

fn file_table_path(image_root: &Path) -> PathBuf {
    image_root.join("file_table.sqlite3")
}

fn run_ingest(src: &Path, image_root: &Path) -> Result<()> {
    std::fs::create_dir_all(image_root)?;
    let cfg = BuilderConfig::default();
    let blob_store = BlobStore::open(blobs_dir(image_root))?;
    let registry = ContentRegistry::new();
    let cancel = CancellationToken::new();

    let writer = DatabaseWriter::start(
        file_table_path(image_root),
        resource_table_path(image_root),
        cfg.batch_write_size,
        cancel.clone(),
    )?;
    let sender = writer.sender();

    let processor = SystemImageProcessor::new(&blob_store, &registry, &cfg);
    let ingest_result = processor.process(src, sender, cancel);
    writer.finish()?;
    ingest_result
}

fn run_finalize(image_root: &Path, skip_bundle: bool, skip_compression: bool, skip_slice: bool) -> Result<()> {
    let cfg = BuilderConfig::default();
    let blob_store = BlobStore::open(blobs_dir(image_root))?;
    let resource_conn = resource_table::open(&resource_table_path(image_root))?;
    let file_conn = file_table::open(&file_table_path(image_root))?;
    let cancel = CancellationToken::new();
    // Full manifest-derived protected set requires the out-of-scope OCI
    // index reader; an empty set is the conservative default for this
    // standalone CLI.
    let protected: HashSet<_> = HashSet::new();

    let report = filters::finalize(
        &resource_conn,
        &blob_store,
        &cfg,
        &protected,
        cancel,
        FinalizeOptions {
            skip_bundle,
            skip_compression,
            skip_slice,
        },
    )?;
    tracing::info!(?report, "finalize complete");

    let export = filters::export_databases(
        &resource_conn,
        &file_conn,
        &resource_table_path(image_root),
        &file_table_path(image_root),
        &blob_store,
        &cfg,
    )?;
    tracing::info!(?export, "database export complete");
    Ok(())
}

fn run_stats(image_root: &Path) -> Result<()> {
    let conn = file_table::open(&file_table_path(image_root))?;
    let image_stats = stats::compute(&conn)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&image_stats).expect("ImageStats always serializes")
    );
    Ok(())
}

fn main() {
    ota_image_builder::logging::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Ingest { src, image_root } => run_ingest(src, image_root),
        Commands::Finalize {
            image_root,
            skip_bundle,
            skip_compression,
            skip_slice,
        } => run_finalize(image_root, *skip_bundle, *skip_compression, *skip_slice),
        Commands::Stats { image_root } => run_stats(image_root),
    };

    if let Err(e) = result {
        exit_with_err_msg(&e.to_string(), 1);
    }
}
