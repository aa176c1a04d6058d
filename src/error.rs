//! error — two result kinds of the engine.
//!
//! - StructuralError: tree misconstruction, unresolved pending value,
//!   malformed source, store/stream breakage. Fatal to the enclosing
//!   operation, always tagged with the offending node path where one exists.
//! - RecordError: a single record cannot be translated or persisted.
//!   Logged, the record is skipped, the pipeline continues.
//!
//! Plan/CLI level code wraps both into anyhow::Error (with context);
//! callers that need the kind back use `anyhow::Error::downcast_ref`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuralError {
    #[error("element {path}: source already set")]
    SourceAlreadySet { path: String },

    #[error("element {parent}: duplicate child '{child}'")]
    DuplicateChild { parent: String, child: String },

    #[error("element {parent}: child '{child}' clashes with a final field of the same name")]
    ChildShadowsFinal { parent: String, child: String },

    #[error("element {path}: pending value {node}.{field} is not set by any enclosing element")]
    UnsetPendingValue {
        path: String,
        node: String,
        field: String,
    },

    #[error("element {path}: processor variable {var} is not available in this session")]
    MissingVariable { path: String, var: &'static str },

    #[error("element {path}: malformed source: {reason}")]
    MalformedSource { path: String, reason: String },

    #[error("element {path}: source failed: {source}")]
    Source {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid sql identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("plugin {family}/{name}: contributed subtree '{got}', expected '{expected}'")]
    PluginSubtreeName {
        family: String,
        name: String,
        got: String,
        expected: String,
    },

    #[error("plugin {family}/{name} is registered twice")]
    DuplicatePlugin { family: String, name: String },

    #[error("unknown plugin {family}/{name}")]
    UnknownPlugin { family: String, name: String },

    #[error("path {0} already has a registered handler")]
    DuplicateHandler(String),

    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("stream: {0}")]
    Stream(String),

    #[error("session store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl StructuralError {
    /// Re-tag a low-level error with the path of the element being processed.
    pub fn at(self, path: &str) -> Self {
        match self {
            StructuralError::Store(source) => StructuralError::Source {
                path: path.to_string(),
                source,
            },
            other => other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{path}: required {entity_type} id {old_id} in field '{field}' has no mapping")]
    UnmappedRequired {
        path: String,
        field: String,
        entity_type: String,
        old_id: i64,
    },

    #[error("{path}: no object resolver registered for event type '{type_name}' (objectid {old_id})")]
    MissingTypeResolver {
        path: String,
        type_name: String,
        old_id: i64,
    },

    #[error("{path}: {entity_type} id {old_id} already mapped to {existing}, refusing {new_id}")]
    MappingConflict {
        path: String,
        entity_type: String,
        old_id: i64,
        existing: i64,
        new_id: i64,
    },

    #[error("{path}: persisting into {table} failed: {reason}")]
    Persist {
        path: String,
        table: String,
        reason: String,
    },

    #[error("{path}: field '{field}': {reason}")]
    InvalidField {
        path: String,
        field: String,
        reason: String,
    },
}

impl RecordError {
    pub fn path(&self) -> &str {
        match self {
            RecordError::UnmappedRequired { path, .. }
            | RecordError::MissingTypeResolver { path, .. }
            | RecordError::MappingConflict { path, .. }
            | RecordError::Persist { path, .. }
            | RecordError::InvalidField { path, .. } => path,
        }
    }
}

/// Overall outcome reported to the surrounding job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    SucceededWithWarnings,
}

impl Outcome {
    pub fn from_warnings(n: usize) -> Self {
        if n == 0 {
            Outcome::Succeeded
        } else {
            Outcome::SucceededWithWarnings
        }
    }
}
