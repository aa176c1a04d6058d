//! restore/translate — TRANSLATE_IDS / PERSIST / RECORD_MAPPING for table-shaped records.
//!
//! A TableRestorer declares:
//! - id fields: (field, target entity type, Required|Optional[, deferred]);
//!   the target is either fixed or taken from another field of the record
//!   (polymorphic references such as grade_items.iteminstance);
//! - an optional (context level, instance id) pair re-derived by level;
//! - fixed overrides (course id of the restore target, ...);
//! - the entity type its own id is mapped under;
//! - optionally the context level of a context row to create for each new row.
//!
//! Values <= 0 in id fields mean "no reference" and are left as they are.

use crate::error::RecordError;
use crate::lms::{self, CONTEXT_COURSE, CONTEXT_COURSECAT, CONTEXT_MODULE, CONTEXT_SYSTEM, CONTEXT_USER};
use crate::record::{value_as_i64, Record, Value};
use crate::store::DeferredRef;

use super::{PathHandler, RestoreContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Unmapped -> the record is not persisted (record-level error).
    Required,
    /// Unmapped -> the field is written as null.
    Optional,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Entity(String),
    /// Entity type = prefix + value of `type_field`.
    FromField { type_field: String, prefix: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdField {
    pub field: String,
    pub target: Target,
    pub policy: Policy,
    /// Target may arrive later in the archive: persist now, fix after all streams.
    pub deferred: bool,
}

impl IdField {
    pub fn required(field: &str, entity_type: &str) -> Self {
        Self {
            field: field.to_string(),
            target: Target::Entity(entity_type.to_string()),
            policy: Policy::Required,
            deferred: false,
        }
    }

    pub fn optional(field: &str, entity_type: &str) -> Self {
        Self {
            policy: Policy::Optional,
            ..Self::required(field, entity_type)
        }
    }

    pub fn polymorphic(field: &str, type_field: &str, prefix: &str, policy: Policy) -> Self {
        Self {
            field: field.to_string(),
            target: Target::FromField {
                type_field: type_field.to_string(),
                prefix: prefix.to_string(),
            },
            policy,
            deferred: false,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    fn entity_type(&self, rec: &Record) -> Option<String> {
        match &self.target {
            Target::Entity(t) => Some(t.clone()),
            Target::FromField { type_field, prefix } => match rec.get_str(type_field) {
                Some(t) if !t.trim().is_empty() => Some(format!("{}{}", prefix, t.trim())),
                _ => None,
            },
        }
    }
}

/// (context level, instance id) pair re-derived by level.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRemap {
    pub level_field: String,
    pub instance_field: String,
}

impl ContextRemap {
    pub fn new(level_field: &str, instance_field: &str) -> Self {
        Self {
            level_field: level_field.to_string(),
            instance_field: instance_field.to_string(),
        }
    }

    pub fn apply(&self, rec: &mut Record, ctx: &RestoreContext<'_, '_>) -> Result<(), RecordError> {
        let Some(level) = rec.get_i64(&self.level_field) else {
            return Ok(());
        };
        let old = rec.get_i64(&self.instance_field).unwrap_or(0);
        let required = |entity_type: &str| -> Result<i64, RecordError> {
            ctx.map_id(entity_type, old)
                .ok_or_else(|| RecordError::UnmappedRequired {
                    path: ctx.path().to_string(),
                    field: self.instance_field.clone(),
                    entity_type: entity_type.to_string(),
                    old_id: old,
                })
        };
        let new = match level {
            CONTEXT_SYSTEM => 0,
            CONTEXT_COURSE => ctx.course_id(),
            CONTEXT_MODULE => required("course_module")?,
            CONTEXT_USER => required("user")?,
            // categories are not part of a course archive
            CONTEXT_COURSECAT => old,
            other => {
                return Err(RecordError::InvalidField {
                    path: ctx.path().to_string(),
                    field: self.level_field.clone(),
                    reason: format!("unknown context level {}", other),
                })
            }
        };
        rec.set(self.instance_field.clone(), new);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixedValue {
    CourseId,
    CourseContextId,
    Value(Value),
}

/// Reference left for resolve_deferred.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingRef {
    field: String,
    entity_type: String,
    old_id: i64,
    required: bool,
}

/// Translate one id field in place. Returns a pending reference when deferred.
pub(crate) fn translate_id(
    rec: &mut Record,
    idf: &IdField,
    ctx: &RestoreContext<'_, '_>,
) -> Result<Option<PendingRef>, RecordError> {
    let raw = match rec.get(&idf.field) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v.clone(),
    };
    let old_id = match value_as_i64(&raw) {
        Some(n) => n,
        None if raw.as_str().map(|s| s.trim().is_empty()).unwrap_or(false) => return Ok(None),
        None => {
            return Err(RecordError::InvalidField {
                path: ctx.path().to_string(),
                field: idf.field.clone(),
                reason: format!("not an id: {}", raw),
            })
        }
    };
    if old_id <= 0 {
        return Ok(None);
    }

    let entity_type = idf.entity_type(rec);
    if let Some(t) = &entity_type {
        if let Some(new_id) = ctx.map_id(t, old_id) {
            rec.set(idf.field.clone(), new_id);
            return Ok(None);
        }
    }

    match (entity_type, idf.deferred, idf.policy) {
        (Some(t), true, policy) => Ok(Some(PendingRef {
            field: idf.field.clone(),
            entity_type: t,
            old_id,
            required: policy == Policy::Required,
        })),
        (t, _, Policy::Required) => Err(RecordError::UnmappedRequired {
            path: ctx.path().to_string(),
            field: idf.field.clone(),
            entity_type: t.unwrap_or_else(|| "<untyped>".to_string()),
            old_id,
        }),
        (_, _, Policy::Optional) => {
            rec.clear(&idf.field);
            Ok(None)
        }
    }
}

/// Generic table-shaped path handler.
#[derive(Debug, Clone)]
pub struct TableRestorer {
    table: String,
    entity_type: Option<String>,
    id_fields: Vec<IdField>,
    context_remap: Option<ContextRemap>,
    fixed: Vec<(String, FixedValue)>,
    own_context: Option<i64>,
}

impl TableRestorer {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            entity_type: None,
            id_fields: Vec::new(),
            context_remap: None,
            fixed: Vec::new(),
            own_context: None,
        }
    }

    /// Entity type the record's original id is mapped under.
    pub fn maps_as(mut self, entity_type: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self
    }

    pub fn id(mut self, f: IdField) -> Self {
        self.id_fields.push(f);
        self
    }

    pub fn remap_context(mut self, level_field: &str, instance_field: &str) -> Self {
        self.context_remap = Some(ContextRemap::new(level_field, instance_field));
        self
    }

    pub fn fixed(mut self, field: &str, value: FixedValue) -> Self {
        self.fixed.push((field.to_string(), value));
        self
    }

    /// Create a context row of `level` for each new row; the record's
    /// `contextid` is mapped to it under "context".
    pub fn own_context(mut self, level: i64) -> Self {
        self.own_context = Some(level);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// TRANSLATE_IDS in place; returns references to defer.
    pub(crate) fn translate(
        &self,
        rec: &mut Record,
        ctx: &RestoreContext<'_, '_>,
    ) -> Result<Vec<PendingRef>, RecordError> {
        let mut pending = Vec::new();
        for idf in &self.id_fields {
            if let Some(p) = translate_id(rec, idf, ctx)? {
                pending.push(p);
            }
        }
        if let Some(cr) = &self.context_remap {
            cr.apply(rec, ctx)?;
        }
        for (field, v) in &self.fixed {
            let v = match v {
                FixedValue::CourseId => Value::from(ctx.course_id()),
                FixedValue::CourseContextId => Value::from(ctx.course_context_id()),
                FixedValue::Value(v) => v.clone(),
            };
            rec.set(field.clone(), v);
        }
        Ok(pending)
    }

    /// Full pipeline for one record; returns the new id.
    pub fn persist(&self, mut rec: Record, ctx: &RestoreContext<'_, '_>) -> Result<i64, RecordError> {
        let old_id = rec.id();
        let old_context = rec.get_i64("contextid");
        let pending = self.translate(&mut rec, ctx)?;

        let new_id = ctx.insert(&self.table, &rec)?;

        if let (Some(t), Some(old)) = (&self.entity_type, old_id) {
            ctx.record_mapping(t, old, new_id)?;
        }
        if let Some(level) = self.own_context {
            let new_ctx = lms::ensure_context(ctx.db(), level, new_id)
                .map_err(|e| ctx.persist_error(lms::CONTEXT_TABLE, e))?;
            if let Some(old) = old_context.filter(|c| *c > 0) {
                ctx.record_mapping("context", old, new_ctx)?;
            }
        }
        for p in pending {
            ctx.defer(&DeferredRef {
                path: ctx.path().to_string(),
                table: self.table.clone(),
                row_id: new_id,
                field: p.field,
                entity_type: p.entity_type,
                old_id: p.old_id,
                required: p.required,
                owner: self.entity_type.clone().zip(old_id),
            })?;
        }
        Ok(new_id)
    }
}

impl PathHandler for TableRestorer {
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        self.persist(record, ctx).map(|_| ())
    }
}
