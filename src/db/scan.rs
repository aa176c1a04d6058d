//! db/scan — RowStream: paged, forward-only iteration over a SELECT.
//!
//! Каждая страница выбирается отдельным запросом
//!   SELECT * FROM (<sql>) LIMIT ? OFFSET ?
//! and the prepared statement is dropped before rows are handed out, so no
//! cursor outlives a page fetch. Memory is bounded by `fetch_rows`.
//!
//! Lifetime accounting: creating a RowStream increments Database::open_streams,
//! dropping it (exhausted, abandoned mid-way, or unwound by `?`) decrements it.

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use std::collections::VecDeque;

use crate::record::{value_from_sql, Record};

use super::core::Database;

pub struct RowStream<'db> {
    db: &'db Database,
    sql: String,
    params: Vec<SqlValue>,
    page: usize,
    offset: usize,
    buf: VecDeque<Record>,
    done: bool,
}

impl<'db> RowStream<'db> {
    pub fn new(db: &'db Database, sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        db.open_streams.set(db.open_streams.get() + 1);
        Self {
            db,
            sql: sql.into(),
            params,
            page: db.fetch_rows.max(1),
            offset: 0,
            buf: VecDeque::new(),
            done: false,
        }
    }

    fn fetch_page(&mut self) -> rusqlite::Result<()> {
        let sql = format!("SELECT * FROM ({}) LIMIT ? OFFSET ?", self.sql);
        let mut stmt = self.db.conn.prepare_cached(&sql)?;
        let cols: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut bind = self.params.clone();
        bind.push(SqlValue::Integer(self.page as i64));
        bind.push(SqlValue::Integer(self.offset as i64));

        let mut rows = stmt.query(params_from_iter(bind.iter()))?;
        let mut n = 0usize;
        while let Some(row) = rows.next()? {
            let mut rec = Record::new();
            for (i, c) in cols.iter().enumerate() {
                rec.set(c.clone(), value_from_sql(row.get_ref(i)?));
            }
            self.buf.push_back(rec);
            n += 1;
        }
        self.offset += n;
        if n < self.page {
            self.done = true;
        }
        Ok(())
    }
}

impl Iterator for RowStream<'_> {
    type Item = rusqlite::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.done {
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buf.pop_front().map(Ok)
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        let n = self.db.open_streams.get();
        self.db.open_streams.set(n.saturating_sub(1));
    }
}
