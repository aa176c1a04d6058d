//! restore — Restore driver / path dispatcher.
//!
//! PARSE_NEXT_EVENT -> MATCH_HANDLER(path)
//!   -> no handler: SKIP (expected: plugin disabled or absent on the target)
//!   -> handler:    TRANSLATE_IDS -> PERSIST -> RECORD_MAPPING
//!
//! Matching is by exact path only. Subtrees registered as late (logs) are
//! left out of the regular pass and dispatched in a second pass over the same
//! stream once every other stream is restored, so their references can point
//! at anything in the archive.
//!
//! Every handler call runs inside its own
//! transaction: a record-level error rolls back whatever the handler wrote
//! for that record (no half-persisted rows, no orphan mappings), then the
//! error is logged and the pipeline continues.

pub mod deferred;
pub mod plan;
pub mod resolvers;
pub mod translate;

use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};

use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::{RecordError, StructuralError};
use crate::metrics::{record_restore_persisted, record_restore_skipped, record_restore_unmatched};
use crate::record::{Record, Value};
use crate::store::{DeferredRef, MappingWrite, Session};

pub use deferred::{resolve_deferred, DeferredStats};
pub use plan::{restore_from_dir, restore_into, RestoreReport, RestoreTarget};
pub use resolvers::{EventResolverRegistry, ObjectMapping, OtherPayloadResolver};
pub use translate::{ContextRemap, FixedValue, IdField, Policy, TableRestorer, Target};

/// Everything a path handler may use while restoring one record.
pub struct RestoreContext<'s, 'db> {
    session: &'s Session<'db>,
    cfg: &'s SatchelConfig,
    resolvers: &'s EventResolverRegistry,
    course_id: i64,
    course_context_id: i64,
    new_course: bool,
    path: String,
}

impl<'s, 'db> RestoreContext<'s, 'db> {
    pub fn new(
        session: &'s Session<'db>,
        cfg: &'s SatchelConfig,
        resolvers: &'s EventResolverRegistry,
        course_id: i64,
        course_context_id: i64,
        new_course: bool,
    ) -> Self {
        Self {
            session,
            cfg,
            resolvers,
            course_id,
            course_context_id,
            new_course,
            path: String::new(),
        }
    }

    #[inline]
    pub fn session(&self) -> &'s Session<'db> {
        self.session
    }

    #[inline]
    pub fn db(&self) -> &'db Database {
        self.session.db()
    }

    pub fn cfg(&self) -> &SatchelConfig {
        self.cfg
    }

    pub fn resolvers(&self) -> &EventResolverRegistry {
        self.resolvers
    }

    /// Target course id.
    pub fn course_id(&self) -> i64 {
        self.course_id
    }

    pub fn course_context_id(&self) -> i64 {
        self.course_context_id
    }

    /// True when restoring into a course created for this restore.
    pub fn is_new_course(&self) -> bool {
        self.new_course
    }

    /// Path of the record being processed.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        self.path.clear();
        self.path.push_str(path);
    }

    /// New id for (entity_type, old_id). A store failure is treated as "not found".
    pub fn map_id(&self, entity_type: &str, old_id: i64) -> Option<i64> {
        match self.session.get_new_id(entity_type, old_id) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "restore: mapping lookup {} {} failed, treated as not found: {}",
                    entity_type, old_id, e
                );
                None
            }
        }
    }

    /// RECORD_MAPPING: old -> new, written at most once.
    pub fn record_mapping(
        &self,
        entity_type: &str,
        old_id: i64,
        new_id: i64,
    ) -> Result<(), RecordError> {
        self.record_mapping_with(entity_type, old_id, new_id, None, None)
    }

    pub fn record_mapping_with(
        &self,
        entity_type: &str,
        old_id: i64,
        new_id: i64,
        parent_id: Option<i64>,
        info: Option<&Value>,
    ) -> Result<(), RecordError> {
        match self
            .session
            .set_mapping_with(entity_type, old_id, new_id, parent_id, info)
        {
            Ok(MappingWrite::Written) | Ok(MappingWrite::Unchanged) => Ok(()),
            Ok(MappingWrite::Conflict { existing }) => Err(RecordError::MappingConflict {
                path: self.path.clone(),
                entity_type: entity_type.to_string(),
                old_id,
                existing,
                new_id,
            }),
            Err(e) => Err(self.persist_error("satchel_ids", e)),
        }
    }

    /// PERSIST: insert into `table`, returning the new id.
    pub fn insert(&self, table: &str, rec: &Record) -> Result<i64, RecordError> {
        self.db()
            .insert_record(table, rec)
            .map_err(|e| self.persist_error(table, e))
    }

    pub fn update(&self, table: &str, id: i64, field: &str, value: &Value) -> Result<(), RecordError> {
        self.db()
            .update_field(table, id, field, value)
            .map_err(|e| self.persist_error(table, e))
    }

    /// Register a reference to be fixed after all streams.
    pub fn defer(&self, r: &DeferredRef) -> Result<(), RecordError> {
        self.session
            .defer_reference(r)
            .map_err(|e| self.persist_error("satchel_deferred", e))
    }

    pub fn persist_error(&self, table: &str, e: StructuralError) -> RecordError {
        RecordError::Persist {
            path: self.path.clone(),
            table: table.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Read-side handler of one path.
pub trait PathHandler {
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError>;
}

impl<F> PathHandler for F
where
    F: Fn(Record, &mut RestoreContext<'_, '_>) -> Result<(), RecordError>,
{
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        self(record, ctx)
    }
}

/// Where a plugin family's subtrees hang in the stream being restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTask {
    pub parent_path: String,
}

impl RestoreTask {
    pub fn new(parent_path: impl Into<String>) -> Self {
        Self {
            parent_path: parent_path.into(),
        }
    }

    /// `<parent>/plugin_<family>_<name><rel>`
    pub fn plugin_path(&self, family: &str, name: &str, rel: &str) -> String {
        format!(
            "{}/{}{}",
            self.parent_path,
            crate::plugins::subtree_name(family, name),
            rel
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub persisted: u64,
    pub skipped: u64,
    pub unmatched: u64,
    pub unmatched_paths: BTreeSet<String>,
    pub errors: Vec<RecordError>,
}

impl DispatchStats {
    pub fn merge(&mut self, other: DispatchStats) {
        self.persisted += other.persisted;
        self.skipped += other.skipped;
        self.unmatched += other.unmatched;
        self.unmatched_paths.extend(other.unmatched_paths);
        self.errors.extend(other.errors);
    }
}

/// Which records a dispatcher run handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pass {
    /// Everything outside the late subtrees.
    #[default]
    Regular,
    /// Only the late subtrees.
    Late,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Box<dyn PathHandler>>,
    late: Vec<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most one handler per path.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        handler: Box<dyn PathHandler>,
    ) -> Result<(), StructuralError> {
        let path = path.into();
        if self.handlers.contains_key(&path) {
            return Err(StructuralError::DuplicateHandler(path));
        }
        self.handlers.insert(path, handler);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        handlers: Vec<(String, Box<dyn PathHandler>)>,
    ) -> Result<(), StructuralError> {
        for (path, h) in handlers {
            self.register(path, h)?;
        }
        Ok(())
    }

    /// Records under `prefix` are only dispatched in the late pass.
    pub fn defer_subtree(&mut self, prefix: impl Into<String>) {
        self.late.push(prefix.into());
    }

    pub fn is_late(&self, path: &str) -> bool {
        self.late.iter().any(|p| {
            path.strip_prefix(p.as_str())
                .map(|rest| rest.is_empty() || rest.starts_with('/'))
                .unwrap_or(false)
        })
    }

    pub fn has_late(&self) -> bool {
        !self.late.is_empty()
    }

    pub fn has_handler(&self, path: &str) -> bool {
        self.handlers.contains_key(path)
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        v.sort_unstable();
        v
    }

    /// Drain `events` through the registered handlers (regular pass).
    pub fn run<I>(
        &self,
        events: I,
        ctx: &mut RestoreContext<'_, '_>,
    ) -> Result<DispatchStats, StructuralError>
    where
        I: Iterator<Item = Result<(String, Record), StructuralError>>,
    {
        self.run_pass(events, ctx, Pass::Regular)
    }

    pub fn run_pass<I>(
        &self,
        events: I,
        ctx: &mut RestoreContext<'_, '_>,
        pass: Pass,
    ) -> Result<DispatchStats, StructuralError>
    where
        I: Iterator<Item = Result<(String, Record), StructuralError>>,
    {
        let mut stats = DispatchStats::default();
        for ev in events {
            let (path, record) = ev?;
            if self.is_late(&path) != (pass == Pass::Late) {
                continue;
            }
            let Some(handler) = self.handlers.get(&path) else {
                record_restore_unmatched();
                stats.unmatched += 1;
                if stats.unmatched_paths.insert(path.clone()) {
                    debug!("restore: no handler for {}, skipping", path);
                }
                continue;
            };

            ctx.set_path(&path);
            let db = ctx.db();
            let tx = db.conn().unchecked_transaction()?;
            match handler.process(record, ctx) {
                Ok(()) => {
                    tx.commit()?;
                    stats.persisted += 1;
                    record_restore_persisted();
                }
                Err(e) => {
                    drop(tx);
                    warn!("restore: skipping record: {}", e);
                    record_restore_skipped();
                    stats.skipped += 1;
                    stats.errors.push(e);
                }
            }
        }
        Ok(stats)
    }
}
