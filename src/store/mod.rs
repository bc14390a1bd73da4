//! Durable state of a run
//!
//! - [`IdentifierStore`]: discovered keys with their processed flags
//! - [`ResultTable`]: collected records and the growing column set
//! - snapshot helpers shared by both (atomic CSV overwrite)

mod identifiers;
mod snapshot;
mod table;

pub use identifiers::{IdentifierRecord, IdentifierStore, ItemKey};
pub use snapshot::{remove_snapshot, SnapshotError, SnapshotResult};
pub use table::{FieldValue, Record, ResultTable, KEY_COLUMN};
