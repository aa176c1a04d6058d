//! logstore/legacy — the flat `log` table of older installations.
//!
//! Columns: id, time, userid, ip, course, module, cmid, action, url, info.
//! Mapped to/from LogRecord:
//!   time <-> timecreated, course <-> courseid, module <-> component,
//!   cmid <-> contextinstanceid (module level; 0 means course level),
//!   info <-> other. The url has no LogRecord counterpart and is dropped.

use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::{RecordError, StructuralError};
use crate::lms::{CONTEXT_COURSE, CONTEXT_MODULE};
use crate::record::{Record, Value};
use crate::restore::translate::translate_id;
use crate::restore::{IdField, PathHandler, RestoreContext, RestoreTask};
use crate::store::{IdKind, Scope};
use crate::structure::{Element, Param, ProcessorVar, Source};

use super::{count_rows, read_rows, LogColumns, LogFilter, LogRecord, LogSort, LogStore, LogStoreHandler};
use crate::plugins::{
    subtree_name, BackupContributor, ContributionContext, Plugin, RestoreContributor,
    FAMILY_LOGSTORE,
};

pub const NAME: &str = "legacy";
pub const TABLE: &str = "log";

const FIELDS: [&str; 10] = [
    "id", "time", "userid", "ip", "course", "module", "cmid", "action", "url", "info",
];

const COLUMNS: LogColumns = LogColumns {
    contextid: None,
    courseid: "course",
    userid: "userid",
    eventname: None,
    time: "time",
};

/// Event name given to legacy rows.
pub const LEGACY_EVENT: &str = "\\logstore_legacy\\event\\legacy_logged";

pub fn factory(_cfg: &SatchelConfig) -> Box<dyn Plugin> {
    Box::new(LegacyLogStore)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyLogStore;

fn to_log_record(row: &Record) -> LogRecord {
    let cmid = row.get_i64("cmid").unwrap_or(0);
    let course = row.get_i64("course").unwrap_or(0);
    let (contextlevel, contextinstanceid) = if cmid > 0 {
        (CONTEXT_MODULE, cmid)
    } else {
        (CONTEXT_COURSE, course)
    };
    LogRecord {
        id: row.id(),
        eventname: LEGACY_EVENT.to_string(),
        component: row.get_str("module").unwrap_or_default().to_string(),
        action: row.get_str("action").unwrap_or_default().to_string(),
        crud: "r".to_string(),
        contextlevel,
        contextinstanceid,
        userid: row.get_i64("userid").unwrap_or(0),
        courseid: Some(course),
        other: row.get_str("info").map(str::to_string),
        timecreated: row.get_i64("time").unwrap_or(0),
        ip: row.get_str("ip").map(str::to_string),
        ..Default::default()
    }
}

fn from_log_record(log: &LogRecord) -> Record {
    let cmid = if log.contextlevel == CONTEXT_MODULE {
        log.contextinstanceid
    } else {
        0
    };
    Record::from_pairs([
        ("time", Value::from(log.timecreated)),
        ("userid", Value::from(log.userid)),
        ("ip", Value::from(log.ip.clone().unwrap_or_default())),
        ("course", Value::from(log.courseid.unwrap_or(0))),
        ("module", Value::from(log.component.clone())),
        ("cmid", Value::from(cmid)),
        ("action", Value::from(log.action.clone())),
        ("url", Value::from("")),
        ("info", Value::from(log.other.clone().unwrap_or_default())),
    ])
}

impl LogStore for LegacyLogStore {
    fn write(&self, db: &Database, records: &[LogRecord]) -> Result<usize, StructuralError> {
        let tx = db.conn().unchecked_transaction()?;
        for log in records {
            db.insert_record(TABLE, &from_log_record(log))?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn read(
        &self,
        db: &Database,
        filter: &LogFilter,
        sort: LogSort,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StructuralError> {
        let rows = read_rows(db, &format!("\"{}\"", TABLE), &COLUMNS, filter, sort, offset, limit)?;
        Ok(rows.iter().map(to_log_record).collect())
    }

    fn record_count(&self, db: &Database, filter: &LogFilter) -> Result<i64, StructuralError> {
        count_rows(db, &format!("\"{}\"", TABLE), &COLUMNS, filter)
    }

    fn backup_schema(&self, ctx: &ContributionContext<'_>) -> Result<Option<Element>, StructuralError> {
        let source = match ctx.scope {
            Scope::Course { .. } => Source::table(TABLE)
                .filter("course", Param::Var(ProcessorVar::CourseId))
                .sort("id"),
            Scope::Activity { .. } => Source::table(TABLE)
                .filter("cmid", Param::Var(ProcessorVar::ActivityId))
                .sort("id"),
        };
        let log = Element::new("log")
            .with_finals(FIELDS)
            .with_source(source)?
            .annotate_field("userid", "user", IdKind::Plain);
        Ok(Some(
            Element::new(&subtree_name(FAMILY_LOGSTORE, NAME)).with_child(log)?,
        ))
    }

    fn restore_record(
        &self,
        mut record: Record,
        ctx: &mut RestoreContext<'_, '_>,
    ) -> Result<(), RecordError> {
        record.set("course", ctx.course_id());
        translate_id(&mut record, &IdField::required("userid", "user"), ctx)?;
        // cmid is NOT NULL: a module outside the archive becomes course level (0)
        let cmid = record
            .get_i64("cmid")
            .filter(|v| *v > 0)
            .map(|old| ctx.map_id("course_module", old).unwrap_or(0))
            .unwrap_or(0);
        record.set("cmid", cmid);
        ctx.insert(TABLE, &record)?;
        Ok(())
    }
}

impl Plugin for LegacyLogStore {
    fn family(&self) -> &'static str {
        FAMILY_LOGSTORE
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn as_backup(&self) -> Option<&dyn BackupContributor> {
        Some(self)
    }

    fn as_restore(&self) -> Option<&dyn RestoreContributor> {
        Some(self)
    }
}

impl BackupContributor for LegacyLogStore {
    fn contribute_subtree(
        &self,
        ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError> {
        self.backup_schema(ctx)
    }
}

impl RestoreContributor for LegacyLogStore {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)> {
        vec![(
            task.plugin_path(FAMILY_LOGSTORE, NAME, "/log"),
            Box::new(LogStoreHandler(*self)),
        )]
    }
}
