//! structure/vars — processor variables and pending values.
//!
//! Frames is the stack of (element name, current record) of the elements
//! enclosing the one being resolved. A pending value (Param::Ancestor,
//! Param::ParentId) reads from it; if no enclosing element has set it yet
//! that is a coding-contract violation (StructuralError), not absent data.

use rusqlite::types::Value as SqlValue;

use crate::error::StructuralError;
use crate::record::{value_to_sql, Record, Value};
use crate::store::Session;

use super::{Param, ProcessorVar};

#[derive(Debug, Default)]
pub struct Frames {
    stack: Vec<(String, Record)>,
}

impl Frames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, record: Record) {
        self.stack.push((name.to_string(), record));
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Record of the innermost frame.
    pub fn current(&self) -> Option<&Record> {
        self.stack.last().map(|(_, r)| r)
    }

    /// `id` of the nearest enclosing record that has one (wrappers are skipped).
    pub fn parent_id(&self) -> Option<i64> {
        self.stack.iter().rev().find_map(|(_, r)| r.id())
    }

    /// Field of the nearest enclosing element called `node`.
    /// Outer None: no such element; inner None: element has no such field.
    pub fn ancestor(&self, node: &str, field: &str) -> Option<Option<&Value>> {
        self.stack
            .iter()
            .rev()
            .find(|(n, _)| n == node)
            .map(|(_, r)| r.get(field))
    }
}

/// Everything a parameter can be resolved against.
pub struct VarScope<'s, 'db> {
    pub session: &'s Session<'db>,
    pub frames: &'s Frames,
}

impl<'s, 'db> VarScope<'s, 'db> {
    pub fn new(session: &'s Session<'db>, frames: &'s Frames) -> Self {
        Self { session, frames }
    }

    pub fn var(&self, var: ProcessorVar, path: &str) -> Result<SqlValue, StructuralError> {
        let missing = || StructuralError::MissingVariable {
            path: path.to_string(),
            var: var.name(),
        };
        Ok(match var {
            ProcessorVar::BackupId => SqlValue::Text(self.session.id().to_string()),
            ProcessorVar::CourseId => SqlValue::Integer(self.session.scope().course_id()),
            ProcessorVar::ContextId => {
                SqlValue::Integer(self.session.context_id().ok_or_else(missing)?)
            }
            ProcessorVar::ActivityId => {
                SqlValue::Integer(self.session.scope().activity_id().ok_or_else(missing)?)
            }
        })
    }

    /// Resolve one parameter to a concrete SQL value.
    pub fn resolve_param(&self, p: &Param, path: &str) -> Result<SqlValue, StructuralError> {
        match p {
            Param::Var(v) => self.var(*v, path),
            Param::ParentId => self.frames.parent_id().map(SqlValue::Integer).ok_or_else(|| {
                StructuralError::UnsetPendingValue {
                    path: path.to_string(),
                    node: "<parent>".to_string(),
                    field: "id".to_string(),
                }
            }),
            Param::Ancestor { node, field } => match self.frames.ancestor(node, field) {
                // present-but-null resolves to NULL (absent data)
                Some(Some(v)) => Ok(value_to_sql(v)),
                Some(None) | None => Err(StructuralError::UnsetPendingValue {
                    path: path.to_string(),
                    node: node.clone(),
                    field: field.clone(),
                }),
            },
            Param::Literal(v) => Ok(value_to_sql(v)),
        }
    }
}
