//! logstore/standard — table-backed log store (`logstore_standard_log`).

use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::{RecordError, StructuralError};
use crate::record::Record;
use crate::restore::{PathHandler, RestoreContext, RestoreTask};

use super::{
    count_rows, log_subtree, read_rows, scope_source, translate_log_record, LogFilter, LogRecord,
    LogSort, LogStore, LogStoreHandler, STANDARD_COLUMNS,
};
use crate::plugins::{
    subtree_name, BackupContributor, ContributionContext, Plugin, RestoreContributor,
    FAMILY_LOGSTORE,
};
use crate::structure::Element;

pub const NAME: &str = "standard";
pub const TABLE: &str = "logstore_standard_log";

pub fn factory(_cfg: &SatchelConfig) -> Box<dyn Plugin> {
    Box::new(StandardLogStore)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLogStore;

impl LogStore for StandardLogStore {
    fn write(&self, db: &Database, records: &[LogRecord]) -> Result<usize, StructuralError> {
        let tx = db.conn().unchecked_transaction()?;
        for log in records {
            db.insert_record(TABLE, &log.to_record()?)?;
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
        read_rows(db, &format!("\"{}\"", TABLE), &STANDARD_COLUMNS, filter, sort, offset, limit)?
            .iter()
            .map(LogRecord::from_record)
            .collect()
    }

    fn record_count(&self, db: &Database, filter: &LogFilter) -> Result<i64, StructuralError> {
        count_rows(db, &format!("\"{}\"", TABLE), &STANDARD_COLUMNS, filter)
    }

    fn backup_schema(&self, ctx: &ContributionContext<'_>) -> Result<Option<Element>, StructuralError> {
        let root = subtree_name(FAMILY_LOGSTORE, NAME);
        Ok(Some(log_subtree(&root, scope_source(TABLE, ctx.scope))?))
    }

    fn restore_record(
        &self,
        mut record: Record,
        ctx: &mut RestoreContext<'_, '_>,
    ) -> Result<(), RecordError> {
        translate_log_record(&mut record, ctx)?;
        ctx.insert(TABLE, &record)?;
        Ok(())
    }
}

impl Plugin for StandardLogStore {
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

impl BackupContributor for StandardLogStore {
    fn contribute_subtree(
        &self,
        ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError> {
        self.backup_schema(ctx)
    }
}

impl RestoreContributor for StandardLogStore {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)> {
        vec![(
            task.plugin_path(FAMILY_LOGSTORE, NAME, "/log"),
            Box::new(LogStoreHandler(*self)),
        )]
    }
}
