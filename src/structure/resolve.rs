//! structure/resolve — Source resolver: one iteration contract over four backends.
//!
//! Resolution order (first match wins):
//! 1. no source and no final fields   -> one empty record (wrapper)
//! 2. Literal                         -> records in declared order
//! 3. Table                           -> filtered rows, optional sort
//! 4. Query                           -> raw SELECT
//! 5. Annotated                       -> join against final store entries
//! 6. otherwise                       -> empty (no data, not an error)
//!
//! Returned iterators are restartable per call (resolve again) but never
//! shared; SQL-backed ones are RowStreams released on drop.

use rusqlite::types::Value as SqlValue;

use crate::db::{check_ident, RowStream};
use crate::error::StructuralError;
use crate::record::Record;
use crate::store::{ids::final_type, IdKind};

use super::vars::VarScope;
use super::{Element, Source};

pub enum RecordIter<'db> {
    Empty,
    Single(Option<Record>),
    Literal(std::vec::IntoIter<Record>),
    Rows { path: String, rows: RowStream<'db> },
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record, StructuralError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RecordIter::Empty => None,
            RecordIter::Single(r) => r.take().map(Ok),
            RecordIter::Literal(it) => it.next().map(Ok),
            RecordIter::Rows { path, rows } => rows.next().map(|r| {
                r.map_err(|source| StructuralError::Source {
                    path: path.clone(),
                    source,
                })
            }),
        }
    }
}

/// Count `?` placeholders outside quoted literals.
fn count_placeholders(sql: &str) -> usize {
    let mut n = 0;
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == '?' => n += 1,
            None => {}
        }
    }
    n
}

fn ident<'a>(s: &'a str, path: &str) -> Result<&'a str, StructuralError> {
    check_ident(s).map_err(|_| StructuralError::MalformedSource {
        path: path.to_string(),
        reason: format!("invalid identifier '{}'", s),
    })
}

/// Resolve the source of `el` into a record iterator.
/// `path` is the element's full path, used to tag failures.
pub fn resolve<'db>(
    el: &Element,
    scope: &VarScope<'_, 'db>,
    path: &str,
) -> Result<RecordIter<'db>, StructuralError> {
    let db = scope.session.db();
    let source = match el.source() {
        None if el.finals().is_empty() => return Ok(RecordIter::Single(Some(Record::new()))),
        None => return Ok(RecordIter::Empty),
        Some(s) => s,
    };

    match source {
        Source::Literal(records) => Ok(RecordIter::Literal(records.clone().into_iter())),

        Source::Table {
            table,
            filters,
            sort,
        } => {
            let t = ident(table, path)?;
            let mut sql = format!("SELECT * FROM \"{}\"", t);
            let mut params = Vec::with_capacity(filters.len());
            for (i, (col, p)) in filters.iter().enumerate() {
                let c = ident(col, path)?;
                sql.push_str(if i == 0 { " WHERE " } else { " AND " });
                match scope.resolve_param(p, path)? {
                    SqlValue::Null => sql.push_str(&format!("\"{}\" IS NULL", c)),
                    v => {
                        sql.push_str(&format!("\"{}\" = ?", c));
                        params.push(v);
                    }
                }
            }
            if let Some(s) = sort {
                sql.push_str(&format!(" ORDER BY \"{}\"", ident(s, path)?));
            }
            Ok(RecordIter::Rows {
                path: path.to_string(),
                rows: RowStream::new(db, sql, params),
            })
        }

        Source::Query { sql, params } => {
            let expected = count_placeholders(sql);
            if expected != params.len() {
                return Err(StructuralError::MalformedSource {
                    path: path.to_string(),
                    reason: format!(
                        "query has {} placeholder(s) but {} parameter(s)",
                        expected,
                        params.len()
                    ),
                });
            }
            let bound = params
                .iter()
                .map(|p| scope.resolve_param(p, path))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RecordIter::Rows {
                path: path.to_string(),
                rows: RowStream::new(db, sql.clone(), bound),
            })
        }

        Source::Annotated {
            entity_type,
            table,
            kind,
        } => {
            let ids = db.store_table("satchel_ids");
            let key = match kind {
                IdKind::Plain => "t.id",
                IdKind::Scale => "-t.id",
            };
            let sql = match table {
                Some(table) => format!(
                    "SELECT t.* FROM \"{t}\" t JOIN {ids} bi ON bi.item_id = {key}
                     WHERE bi.session_id = ? AND bi.item_type = ? ORDER BY t.id",
                    t = ident(table, path)?,
                ),
                None => match kind {
                    IdKind::Plain => format!(
                        "SELECT item_id AS id FROM {ids}
                         WHERE session_id = ? AND item_type = ? AND item_id > 0 ORDER BY item_id"
                    ),
                    IdKind::Scale => format!(
                        "SELECT -item_id AS id FROM {ids}
                         WHERE session_id = ? AND item_type = ? AND item_id < 0 ORDER BY item_id DESC"
                    ),
                },
            };
            let params = vec![
                scope.var(super::ProcessorVar::BackupId, path)?,
                SqlValue::Text(final_type(entity_type)),
            ];
            Ok(RecordIter::Rows {
                path: path.to_string(),
                rows: RowStream::new(db, sql, params),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::count_placeholders;

    #[test]
    fn placeholders_outside_quotes() {
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"), 2);
        assert_eq!(count_placeholders("SELECT '?' AS q FROM t WHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT 1"), 0);
    }
}
