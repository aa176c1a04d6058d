//! plugins/logstore — the log store contract and its shared restore logic.
//!
//! Concrete stores:
//! - standard.rs — `logstore_standard_log` (columns == LogRecord fields)
//! - legacy.rs   — flat `log` table, own column names, mapped to/from LogRecord
//! - database.rs — same layout as standard, in an external SQLite file
//!
//! Backup and restore drive every store through LogStore only.

pub mod database;
pub mod legacy;
pub mod standard;

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use crate::db::{Database, RowStream};
use crate::error::{RecordError, StructuralError};
use crate::record::{Record, Value};
use crate::restore::translate::translate_id;
use crate::restore::{ContextRemap, IdField, ObjectMapping, PathHandler, RestoreContext};
use crate::store::{IdKind, Scope};
use crate::structure::{Element, Param, ProcessorVar, Source};

use super::ContributionContext;

/// One event of the event system, as the pipeline carries it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    pub id: Option<i64>,
    pub eventname: String,
    pub component: String,
    pub action: String,
    pub target: String,
    pub objecttable: Option<String>,
    pub objectid: Option<i64>,
    pub crud: String,
    pub edulevel: i64,
    pub contextid: i64,
    pub contextlevel: i64,
    pub contextinstanceid: i64,
    pub userid: i64,
    pub courseid: Option<i64>,
    pub relateduserid: Option<i64>,
    pub anonymous: i64,
    /// Serialized associative payload; opaque to the engine.
    pub other: Option<String>,
    pub timecreated: i64,
    pub origin: Option<String>,
    pub ip: Option<String>,
    pub realuserid: Option<i64>,
}

/// Fields of a standard log row, in column order.
pub const LOG_FIELDS: [&str; 21] = [
    "id",
    "eventname",
    "component",
    "action",
    "target",
    "objecttable",
    "objectid",
    "crud",
    "edulevel",
    "contextid",
    "contextlevel",
    "contextinstanceid",
    "userid",
    "courseid",
    "relateduserid",
    "anonymous",
    "other",
    "timecreated",
    "origin",
    "ip",
    "realuserid",
];

impl LogRecord {
    pub fn from_record(rec: &Record) -> Result<Self, StructuralError> {
        Ok(serde_json::from_value(serde_json::to_value(rec)?)?)
    }

    pub fn to_record(&self) -> Result<Record, StructuralError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub contextid: Option<i64>,
    pub courseid: Option<i64>,
    pub userid: Option<i64>,
    pub eventname: Option<String>,
    /// timecreated >= since
    pub since: Option<i64>,
    /// timecreated < until
    pub until: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogSort {
    #[default]
    TimeAsc,
    TimeDesc,
}

pub trait LogStore {
    fn write(&self, db: &Database, records: &[LogRecord]) -> Result<usize, StructuralError>;

    fn read(
        &self,
        db: &Database,
        filter: &LogFilter,
        sort: LogSort,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StructuralError>;

    fn record_count(&self, db: &Database, filter: &LogFilter) -> Result<i64, StructuralError>;

    /// Backup subtree (rooted at the reserved plugin name), or None.
    fn backup_schema(&self, ctx: &ContributionContext<'_>) -> Result<Option<Element>, StructuralError>;

    fn restore_record(
        &self,
        record: Record,
        ctx: &mut RestoreContext<'_, '_>,
    ) -> Result<(), RecordError>;
}

/// Path handler delegating to a store.
pub struct LogStoreHandler<S: LogStore>(pub S);

impl<S: LogStore> PathHandler for LogStoreHandler<S> {
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        self.0.restore_record(record, ctx)
    }
}

/// Column names a store uses for the filterable LogRecord fields.
pub(crate) struct LogColumns {
    pub contextid: Option<&'static str>,
    pub courseid: &'static str,
    pub userid: &'static str,
    pub eventname: Option<&'static str>,
    pub time: &'static str,
}

pub(crate) const STANDARD_COLUMNS: LogColumns = LogColumns {
    contextid: Some("contextid"),
    courseid: "courseid",
    userid: "userid",
    eventname: Some("eventname"),
    time: "timecreated",
};

/// WHERE clause for `filter`. A filter on a field the store does not have matches nothing.
pub(crate) fn where_clause(filter: &LogFilter, cols: &LogColumns) -> (String, Vec<SqlValue>) {
    let mut conds: Vec<String> = Vec::new();
    let mut params = Vec::new();
    let mut eq = |col: Option<&str>, v: SqlValue| match col {
        Some(c) => {
            conds.push(format!("\"{}\" = ?", c));
            params.push(v);
        }
        None => conds.push("0".to_string()),
    };
    if let Some(v) = filter.contextid {
        eq(cols.contextid, SqlValue::Integer(v));
    }
    if let Some(v) = filter.courseid {
        eq(Some(cols.courseid), SqlValue::Integer(v));
    }
    if let Some(v) = filter.userid {
        eq(Some(cols.userid), SqlValue::Integer(v));
    }
    if let Some(v) = &filter.eventname {
        eq(cols.eventname, SqlValue::Text(v.clone()));
    }
    if let Some(v) = filter.since {
        conds.push(format!("\"{}\" >= ?", cols.time));
        params.push(SqlValue::Integer(v));
    }
    if let Some(v) = filter.until {
        conds.push(format!("\"{}\" < ?", cols.time));
        params.push(SqlValue::Integer(v));
    }
    if conds.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conds.join(" AND ")), params)
    }
}

/// Rows of `quoted_table` matching `filter`, sorted by time then id.
pub(crate) fn read_rows(
    db: &Database,
    quoted_table: &str,
    cols: &LogColumns,
    filter: &LogFilter,
    sort: LogSort,
    offset: usize,
    limit: usize,
) -> Result<Vec<Record>, StructuralError> {
    let (wh, mut params) = where_clause(filter, cols);
    let dir = match sort {
        LogSort::TimeAsc => "ASC",
        LogSort::TimeDesc => "DESC",
    };
    let sql = format!(
        "SELECT * FROM {}{} ORDER BY \"{}\" {dir}, id {dir} LIMIT ? OFFSET ?",
        quoted_table, wh, cols.time
    );
    params.push(SqlValue::Integer(limit as i64));
    params.push(SqlValue::Integer(offset as i64));
    let rows = RowStream::new(db, sql, params).collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn count_rows(
    db: &Database,
    quoted_table: &str,
    cols: &LogColumns,
    filter: &LogFilter,
) -> Result<i64, StructuralError> {
    let (wh, params) = where_clause(filter, cols);
    let n: i64 = db.conn().query_row(
        &format!("SELECT COUNT(*) FROM {}{}", quoted_table, wh),
        rusqlite::params_from_iter(params.iter()),
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Standard-shaped `log` element over `source`, wrapped in the plugin root.
pub(crate) fn log_subtree(root: &str, source: Source) -> Result<Element, StructuralError> {
    let log = Element::new("log")
        .with_finals(LOG_FIELDS)
        .with_source(source)?
        .annotate_field("userid", "user", IdKind::Plain)
        .annotate_field("relateduserid", "user", IdKind::Plain)
        .annotate_field("realuserid", "user", IdKind::Plain);
    Element::new(root).with_child(log)
}

/// Table source selecting the log rows of the backed-up scope.
pub(crate) fn scope_source(table: &str, scope: Scope) -> Source {
    match scope {
        Scope::Course { .. } => Source::table(table)
            .filter("courseid", Param::Var(ProcessorVar::CourseId))
            .sort("id"),
        Scope::Activity { .. } => Source::table(table)
            .filter("contextlevel", Param::literal(crate::lms::CONTEXT_MODULE))
            .filter("contextinstanceid", Param::Var(ProcessorVar::ActivityId))
            .sort("id"),
    }
}

/// Shared id translation of a standard-shaped log record.
pub fn translate_log_record(
    rec: &mut Record,
    ctx: &RestoreContext<'_, '_>,
) -> Result<(), RecordError> {
    translate_id(rec, &IdField::required("contextid", "context"), ctx)?;
    ContextRemap::new("contextlevel", "contextinstanceid").apply(rec, ctx)?;
    rec.set("courseid", ctx.course_id());
    translate_id(rec, &IdField::required("userid", "user"), ctx)?;
    translate_id(rec, &IdField::optional("relateduserid", "user"), ctx)?;
    translate_id(rec, &IdField::optional("realuserid", "user"), ctx)?;

    let eventname = rec.get_str("eventname").unwrap_or_default().to_string();
    if let Some(old) = rec.get_i64("objectid").filter(|v| *v > 0) {
        match ctx.resolvers().object_mapping(&eventname) {
            None => {
                return Err(RecordError::MissingTypeResolver {
                    path: ctx.path().to_string(),
                    type_name: eventname,
                    old_id: old,
                })
            }
            Some(ObjectMapping::NotMapped) => {}
            Some(ObjectMapping::Entity(t)) => match ctx.map_id(t, old) {
                Some(new) => rec.set("objectid", new),
                None => rec.clear("objectid"),
            },
        }
    }

    if let Some(resolver) = ctx.resolvers().other_resolver(&eventname) {
        if let Some(other) = rec.get_str("other").map(str::to_string) {
            let resolved = resolver.resolve(&other, ctx)?;
            rec.set("other", Value::String(resolved));
        }
    }
    Ok(())
}
