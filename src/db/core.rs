//! db/core — Database handle, identifier validation, table introspection.

use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::StructuralError;

/// Schema name the durable session store is attached under.
pub const STORE_SCHEMA: &str = "satchel_store";

pub struct Database {
    pub(crate) conn: Connection,
    /// Where the session store tables live: "main" (inline) or STORE_SCHEMA.
    pub(crate) store_schema: String,
    pub(crate) fetch_rows: usize,
    pub(crate) path: Option<PathBuf>,
    // live RowStream count (decremented on Drop)
    pub(crate) open_streams: Cell<usize>,
    // table -> column names (PRAGMA table_info), filled lazily
    pub(crate) columns: RefCell<HashMap<String, Vec<String>>>,
}

/// Accept only plain SQL identifiers (`[A-Za-z_][A-Za-z0-9_]*`).
/// Table and column names are spliced into SQL text, so anything else is refused.
pub fn check_ident(s: &str) -> Result<&str, StructuralError> {
    let mut chars = s.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(s)
    } else {
        Err(StructuralError::InvalidIdentifier(s.to_string()))
    }
}

/// Quote a table name, optionally schema-qualified ("satchel_extlog.log_events").
pub fn quote_table(table: &str) -> Result<String, StructuralError> {
    match table.split_once('.') {
        Some((schema, name)) => Ok(format!(
            "\"{}\".\"{}\"",
            check_ident(schema)?,
            check_ident(name)?
        )),
        None => Ok(format!("\"{}\"", check_ident(table)?)),
    }
}

impl Database {
    #[inline]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    #[inline]
    pub fn fetch_rows(&self) -> usize {
        self.fetch_rows
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Fully qualified name of a session store table.
    pub fn store_table(&self, name: &str) -> String {
        format!("{}.{}", self.store_schema, name)
    }

    /// Number of RowStreams currently alive on this connection.
    pub fn open_streams(&self) -> usize {
        self.open_streams.get()
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), StructuralError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StructuralError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Column names of `table` in declaration order (cached per connection).
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, StructuralError> {
        if let Some(cols) = self.columns.borrow().get(table) {
            return Ok(cols.clone());
        }
        let pragma = match table.split_once('.') {
            Some((schema, name)) => format!(
                "PRAGMA \"{}\".table_info(\"{}\")",
                check_ident(schema)?,
                check_ident(name)?
            ),
            None => format!("PRAGMA table_info(\"{}\")", check_ident(table)?),
        };
        let mut stmt = self.conn.prepare(&pragma)?;
        let cols = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if cols.is_empty() {
            return Err(StructuralError::MalformedSource {
                path: table.to_string(),
                reason: format!("table '{}' does not exist", table),
            });
        }
        self.columns
            .borrow_mut()
            .insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    /// Forget cached column lists (after DDL).
    pub fn invalidate_columns(&self) {
        self.columns.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{check_ident, quote_table};

    #[test]
    fn identifiers() {
        assert!(check_ident("logstore_standard_log").is_ok());
        assert!(check_ident("_x1").is_ok());
        assert!(check_ident("1abc").is_err());
        assert!(check_ident("a;drop").is_err());
        assert!(check_ident("").is_err());
    }

    #[test]
    fn qualified_tables() {
        assert_eq!(quote_table("log").unwrap(), "\"log\"");
        assert_eq!(
            quote_table("satchel_extlog.log_events").unwrap(),
            "\"satchel_extlog\".\"log_events\""
        );
        assert!(quote_table("a.b.c").is_err());
    }
}
