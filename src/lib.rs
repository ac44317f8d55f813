//! # ota-image-builder — resource pipeline for content-addressed OTA images
//!
//! Builds the payload of an OCI-layout-compatible OTA update image: a
//! content-addressed blob store plus two SQLite indices (a per-image file
//! table and a global resource table), populated by a concurrent ingest
//! walker and optimized by four composable resource filters.
//!
//! - Every blob is named by the hex of its SHA-256 digest; publication is
//!   atomic via temp-name + rename ([`blob_store`]).
//! - A single in-memory registry decides, under one mutex, whether a given
//!   digest has already been seen during this ingest run ([`registry`]).
//! - A background thread is the only writer to either SQLite database,
//!   draining a bounded multi-producer queue of typed rows ([`db::writer`]).
//! - Filters run strictly bundle → compression → slice
//!   ([`filters`]); each is idempotent and skips protected digests
//!   ([`filters::protected`]).
//! - Cancellation is an explicit token threaded through every worker pool,
//!   not a global flag ([`cancel`]).

pub mod blob_store;
pub mod cancel;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod filters;
pub mod ingest;
pub mod logging;
pub mod registry;
pub mod stats;
pub mod validate;

pub use blob_store::BlobStore;
pub use cancel::CancellationToken;
pub use config::BuilderConfig;
pub use digest::Digest;
pub use error::{Error, Result};
pub use filters::{export_databases, finalize, DbExport, FinalizeOptions, FilterReport};
pub use ingest::SystemImageProcessor;
pub use registry::ContentRegistry;
pub use stats::ImageStats;
