//! backup — Backup driver: depth-first walk of an element tree.
//!
//! Per element:
//!   START -> RESOLVE_SOURCE -> (EMIT_RECORD -> SUBSTITUTE_FINAL_FIELDS -> RECURSE_CHILDREN)* -> CLOSE
//!
//! - A record-level problem (e.g. an id-bearing field that is not an id) is
//!   logged, counted and the record is skipped; the element's iteration
//!   continues with the next record.
//! - A resolution/substitution failure aborts the element subtree and is
//!   returned upward tagged with the element path. Open RowStreams are
//!   dropped while unwinding, so no cursor outlives the failure.
//!
//! Annotations (self id, id fields, attached files) are written before the
//! children are visited, with the emitted record as the innermost frame.

pub mod plan;

use log::{debug, warn};
use rusqlite::types::Value as SqlValue;

use crate::error::{RecordError, StructuralError};
use crate::metrics::{record_annotations, record_backup_emitted, record_backup_skipped};
use crate::record::Record;
use crate::store::{AnnotatedId, Session};
use crate::stream::EventSink;
use crate::structure::{resolve, Element, FileAnnotation, Frames, VarScope};

pub use plan::{backup_to_dir, BackupPlan, BackupReport, BackupStep};

/// Entity type file annotations are recorded under.
pub const FILE: &str = "file";
/// Table holding file metadata.
pub const FILES_TABLE: &str = "files";

pub struct BackupDriver<'s, 'db> {
    session: &'s Session<'db>,
    emitted: u64,
    errors: Vec<RecordError>,
}

impl<'s, 'db> BackupDriver<'s, 'db> {
    pub fn new(session: &'s Session<'db>) -> Self {
        Self {
            session,
            emitted: 0,
            errors: Vec::new(),
        }
    }

    /// Walk `root` and write its events into `sink`.
    pub fn run(&mut self, root: &Element, sink: &mut dyn EventSink) -> Result<(), StructuralError> {
        let mut frames = Frames::new();
        self.walk(root, "", &mut frames, sink)
    }

    /// Records emitted so far (all runs of this driver).
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<RecordError> {
        self.errors
    }

    fn walk(
        &mut self,
        el: &Element,
        parent_path: &str,
        frames: &mut Frames,
        sink: &mut dyn EventSink,
    ) -> Result<(), StructuralError> {
        let path = format!("{}/{}", parent_path, el.name());
        let records = {
            let scope = VarScope::new(self.session, frames);
            resolve(el, &scope, &path)?
        };

        let mut n = 0u64;
        for item in records {
            let rec = item?;

            if let Err(e) = check_record(el, &rec, &path) {
                warn!("backup: skipping record: {}", e);
                record_backup_skipped();
                self.errors.push(e);
                continue;
            }

            sink.open(el.name())?;
            if !el.finals().is_empty() {
                sink.data(&rec.project(el.finals()))?;
                self.emitted += 1;
                n += 1;
                record_backup_emitted();
            }

            frames.push(el.name(), rec);
            let res = self.descend(el, &path, frames, sink);
            frames.pop();
            res?;

            sink.close(el.name())?;
        }

        debug!("backup: {} -> {} record(s)", path, n);
        Ok(())
    }

    fn descend(
        &mut self,
        el: &Element,
        path: &str,
        frames: &mut Frames,
        sink: &mut dyn EventSink,
    ) -> Result<(), StructuralError> {
        self.annotate(el, frames, path)?;
        for child in el.children() {
            self.walk(child, path, frames, sink)?;
        }
        Ok(())
    }

    /// Annotations of the innermost frame's record.
    fn annotate(&self, el: &Element, frames: &Frames, path: &str) -> Result<(), StructuralError> {
        let Some(rec) = frames.current() else {
            return Ok(());
        };

        if let Some(entity_type) = el.self_annotation() {
            if let Some(id) = rec.id() {
                self.session.annotate(entity_type, [id]).map_err(|e| e.at(path))?;
            }
        }

        for fa in el.field_annotations() {
            if let Some(raw) = rec.get_i64(&fa.field) {
                self.session
                    .annotate(&fa.entity_type, [AnnotatedId::of(fa.kind, raw)])
                    .map_err(|e| e.at(path))?;
            }
        }

        for fa in el.file_annotations() {
            self.annotate_files(fa, rec, frames, path)?;
        }
        Ok(())
    }

    fn annotate_files(
        &self,
        fa: &FileAnnotation,
        rec: &Record,
        frames: &Frames,
        path: &str,
    ) -> Result<(), StructuralError> {
        let scope = VarScope::new(self.session, frames);
        let context = scope.resolve_param(&fa.context, path)?;
        if context == SqlValue::Null {
            return Ok(());
        }

        let db = self.session.db();
        let mut sql = format!(
            "INSERT OR IGNORE INTO {} (session_id, item_type, item_id, value)
             SELECT ?, ?, f.id, 1 FROM {} f
             WHERE f.id > 0 AND f.contextid = ? AND f.component = ? AND f.filearea = ?",
            db.store_table("satchel_ids"),
            FILES_TABLE
        );
        let mut params = vec![
            SqlValue::Text(self.session.id().to_string()),
            SqlValue::Text(FILE.to_string()),
            context,
            SqlValue::Text(fa.component.clone()),
            SqlValue::Text(fa.filearea.clone()),
        ];
        if let Some(field) = &fa.item_field {
            let Some(item) = rec.get_i64(field) else {
                return Ok(());
            };
            sql.push_str(" AND f.itemid = ?");
            params.push(SqlValue::Integer(item));
        }

        let n = db
            .conn()
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(|source| StructuralError::Source {
                path: path.to_string(),
                source,
            })?;
        record_annotations(n as u64);
        Ok(())
    }
}

/// Record-level validation before anything is emitted.
fn check_record(el: &Element, rec: &Record, path: &str) -> Result<(), RecordError> {
    if el.self_annotation().is_some() && rec.id().is_none() {
        return Err(RecordError::InvalidField {
            path: path.to_string(),
            field: "id".to_string(),
            reason: "record has no integer id to annotate".to_string(),
        });
    }
    for fa in el.field_annotations() {
        match rec.get(&fa.field) {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) if v.as_str().map(|s| s.trim().is_empty()).unwrap_or(false) => {}
            Some(v) => {
                if rec.get_i64(&fa.field).is_none() {
                    return Err(RecordError::InvalidField {
                        path: path.to_string(),
                        field: fa.field.clone(),
                        reason: format!("{} reference is not an id: {}", fa.entity_type, v),
                    });
                }
            }
        }
    }
    Ok(())
}
