//! db — relational backend (SQLite via rusqlite).
//!
//! Разделение по подмодулям:
//! - core.rs  — Database: connection, store schema name, identifier checks, table introspection
//! - open.rs  — open/open_in_memory, attaching the durable session store
//! - scan.rs  — RowStream: paged forward-only streaming over any SELECT
//! - write.rs — insert/update/delete of records (restore side)

pub mod core;
pub mod open;
pub mod scan;
pub mod write;

pub use self::core::{check_ident, quote_table, Database, STORE_SCHEMA};
pub use scan::RowStream;
