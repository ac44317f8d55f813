//! Typed row abstractions over the two SQLite databases: the per-image
//! file table and the global resource table.

pub mod file_table;
pub mod filter_applied;
pub mod resource_table;
pub mod writer;

pub use filter_applied::{FilterApplied, ResourceRow};
pub use writer::{DatabaseWriter, DbRow, ResourceTableInsert};
