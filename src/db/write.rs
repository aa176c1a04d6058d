//! db/write — persisting restored records.
//!
//! insert_record copies only the fields that exist as columns of the target
//! table and never the `id` (the target assigns a fresh primary key).

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use crate::error::StructuralError;
use crate::record::{value_to_sql, Record, Value};

use super::core::{check_ident, quote_table, Database};

impl Database {
    /// INSERT a record into `table`, returning the new primary key.
    pub fn insert_record(&self, table: &str, rec: &Record) -> Result<i64, StructuralError> {
        let cols = self.table_columns(table)?;
        let mut names = Vec::new();
        let mut vals: Vec<SqlValue> = Vec::new();
        for c in cols.iter().filter(|c| c.as_str() != "id") {
            if let Some(v) = rec.get(c) {
                names.push(format!("\"{}\"", c));
                vals.push(value_to_sql(v));
            }
        }
        let quoted = quote_table(table)?;
        let sql = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quoted)
        } else {
            let marks = vec!["?"; names.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quoted,
                names.join(", "),
                marks
            )
        };
        self.conn.execute(&sql, params_from_iter(vals.iter()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// UPDATE a single column of one row.
    pub fn update_field(
        &self,
        table: &str,
        id: i64,
        field: &str,
        value: &Value,
    ) -> Result<(), StructuralError> {
        let sql = format!(
            "UPDATE {} SET \"{}\" = ?1 WHERE id = ?2",
            quote_table(table)?,
            check_ident(field)?
        );
        self.conn
            .execute(&sql, rusqlite::params![value_to_sql(value), id])?;
        Ok(())
    }

    pub fn delete_row(&self, table: &str, id: i64) -> Result<(), StructuralError> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", quote_table(table)?),
            [id],
        )?;
        Ok(())
    }

    /// Fetch one row by id (None when absent).
    pub fn get_row(&self, table: &str, id: i64) -> Result<Option<Record>, StructuralError> {
        let mut rows = super::RowStream::new(
            self,
            format!("SELECT * FROM {} WHERE id = ?", quote_table(table)?),
            vec![SqlValue::Integer(id)],
        );
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, StructuralError> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_table(table)?),
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}
