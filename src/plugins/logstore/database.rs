//! logstore/database — standard-shaped log table in an external SQLite file.
//!
//! The file (cfg.external_log_db) is ATTACHed to the working connection as
//! EXTERNAL_SCHEMA; the table name comes from cfg.external_log_table.
//! Without a configured file the store contributes nothing and refuses
//! restores record by record.

use log::debug;

use crate::config::SatchelConfig;
use crate::db::{check_ident, quote_table, Database};
use crate::error::{RecordError, StructuralError};
use crate::record::Record;
use crate::restore::{PathHandler, RestoreContext, RestoreTask};
use crate::structure::{Element, Param, ProcessorVar, Source};
use crate::store::Scope;

use super::{
    count_rows, log_subtree, read_rows, translate_log_record, LogFilter, LogRecord, LogSort,
    LogStore, LogStoreHandler, STANDARD_COLUMNS,
};
use crate::plugins::{
    subtree_name, BackupContributor, ContributionContext, Plugin, RestoreContributor,
    FAMILY_LOGSTORE,
};

pub const NAME: &str = "database";
pub const EXTERNAL_SCHEMA: &str = "satchel_extlog";

pub fn factory(cfg: &SatchelConfig) -> Box<dyn Plugin> {
    Box::new(DatabaseLogStore::from_config(cfg))
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseLogStore {
    path: Option<String>,
    table: String,
}

impl DatabaseLogStore {
    pub fn new(path: Option<String>, table: &str) -> Self {
        Self {
            path,
            table: table.to_string(),
        }
    }

    pub fn from_config(cfg: &SatchelConfig) -> Self {
        Self::new(cfg.external_log_db.clone(), &cfg.external_log_table)
    }

    /// "satchel_extlog.<table>"
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", EXTERNAL_SCHEMA, self.table)
    }

    /// Attach the external file; Ok(false) when none is configured.
    pub fn attach(&self, db: &Database) -> Result<bool, StructuralError> {
        match &self.path {
            Some(p) => {
                db.attach(p, EXTERNAL_SCHEMA)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn attached_table(&self, db: &Database) -> Result<String, StructuralError> {
        if !self.attach(db)? {
            return Err(StructuralError::MalformedSource {
                path: subtree_name(FAMILY_LOGSTORE, NAME),
                reason: "external log database is not configured".to_string(),
            });
        }
        quote_table(&self.qualified_table())
    }

    /// Create the external table (standard layout) if missing.
    pub fn ensure_schema(&self, db: &Database) -> Result<(), StructuralError> {
        let quoted = self.attached_table(db)?;
        db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                eventname TEXT NOT NULL,
                component TEXT NOT NULL,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                objecttable TEXT,
                objectid INTEGER,
                crud TEXT NOT NULL DEFAULT 'r',
                edulevel INTEGER NOT NULL DEFAULT 0,
                contextid INTEGER NOT NULL,
                contextlevel INTEGER NOT NULL,
                contextinstanceid INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                courseid INTEGER,
                relateduserid INTEGER,
                anonymous INTEGER NOT NULL DEFAULT 0,
                other TEXT,
                timecreated INTEGER NOT NULL,
                origin TEXT,
                ip TEXT,
                realuserid INTEGER
            );"
        ))?;
        db.invalidate_columns();
        Ok(())
    }
}

impl LogStore for DatabaseLogStore {
    fn write(&self, db: &Database, records: &[LogRecord]) -> Result<usize, StructuralError> {
        self.attached_table(db)?;
        let table = self.qualified_table();
        let tx = db.conn().unchecked_transaction()?;
        for log in records {
            db.insert_record(&table, &log.to_record()?)?;
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
        let quoted = self.attached_table(db)?;
        read_rows(db, &quoted, &STANDARD_COLUMNS, filter, sort, offset, limit)?
            .iter()
            .map(LogRecord::from_record)
            .collect()
    }

    fn record_count(&self, db: &Database, filter: &LogFilter) -> Result<i64, StructuralError> {
        let quoted = self.attached_table(db)?;
        count_rows(db, &quoted, &STANDARD_COLUMNS, filter)
    }

    fn backup_schema(&self, ctx: &ContributionContext<'_>) -> Result<Option<Element>, StructuralError> {
        if self.path.is_none() {
            debug!("logstore/database: no external database configured, nothing to back up");
            return Ok(None);
        }
        let quoted = self.attached_table(ctx.db)?;
        let source = match ctx.scope {
            Scope::Course { .. } => Source::query(
                &format!("SELECT * FROM {} WHERE courseid = ? ORDER BY id", quoted),
                vec![Param::Var(ProcessorVar::CourseId)],
            ),
            Scope::Activity { .. } => Source::query(
                &format!(
                    "SELECT * FROM {} WHERE contextlevel = ? AND contextinstanceid = ? ORDER BY id",
                    quoted
                ),
                vec![
                    Param::literal(crate::lms::CONTEXT_MODULE),
                    Param::Var(ProcessorVar::ActivityId),
                ],
            ),
        };
        Ok(Some(log_subtree(&subtree_name(FAMILY_LOGSTORE, NAME), source)?))
    }

    fn restore_record(
        &self,
        mut record: Record,
        ctx: &mut RestoreContext<'_, '_>,
    ) -> Result<(), RecordError> {
        if self.path.is_none() {
            return Err(RecordError::Persist {
                path: ctx.path().to_string(),
                table: self.table.clone(),
                reason: "external log database is not configured".to_string(),
            });
        }
        translate_log_record(&mut record, ctx)?;
        ctx.insert(&self.qualified_table(), &record)?;
        Ok(())
    }
}

impl Plugin for DatabaseLogStore {
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

impl BackupContributor for DatabaseLogStore {
    fn contribute_subtree(
        &self,
        ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError> {
        self.backup_schema(ctx)
    }
}

impl RestoreContributor for DatabaseLogStore {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)> {
        vec![(
            task.plugin_path(FAMILY_LOGSTORE, NAME, "/log"),
            Box::new(LogStoreHandler(self.clone())),
        )]
    }

    fn before_restore(&self, db: &Database) -> Result<(), StructuralError> {
        if self.attach(db)? {
            check_ident(&self.table)?;
        }
        Ok(())
    }
}
