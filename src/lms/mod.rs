//! lms — the course data model the engine ships with.
//!
//! - schema.rs  — DDL of the source/target tables
//! - backup.rs  — element trees of the backup plan steps
//! - restore.rs — core path handlers
//!
//! Contexts: every course / module / user / category owns one row of
//! `context(id, contextlevel, instanceid)`.

pub mod backup;
pub mod restore;
pub mod schema;

use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::StructuralError;

pub use schema::{init_schema, SCHEMA};

pub const CONTEXT_SYSTEM: i64 = 10;
pub const CONTEXT_USER: i64 = 30;
pub const CONTEXT_COURSECAT: i64 = 40;
pub const CONTEXT_COURSE: i64 = 50;
pub const CONTEXT_MODULE: i64 = 70;

pub const CONTEXT_TABLE: &str = "context";
pub const COURSE_TABLE: &str = "course";

/// Context id of (level, instance), if one exists.
pub fn context_id(db: &Database, level: i64, instance_id: i64) -> Result<Option<i64>, StructuralError> {
    let id = db
        .conn()
        .query_row(
            "SELECT id FROM context WHERE contextlevel = ?1 AND instanceid = ?2 ORDER BY id LIMIT 1",
            [level, instance_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Context id of (level, instance), created when missing.
pub fn ensure_context(db: &Database, level: i64, instance_id: i64) -> Result<i64, StructuralError> {
    if let Some(id) = context_id(db, level, instance_id)? {
        return Ok(id);
    }
    db.conn().execute(
        "INSERT INTO context (contextlevel, instanceid) VALUES (?1, ?2)",
        [level, instance_id],
    )?;
    Ok(db.conn().last_insert_rowid())
}

/// Empty course row plus its context; returns (course id, context id).
pub fn create_course_shell(db: &Database) -> Result<(i64, i64), StructuralError> {
    db.conn().execute(
        "INSERT INTO course (shortname, fullname) VALUES ('', '')",
        [],
    )?;
    let course_id = db.conn().last_insert_rowid();
    let context_id = ensure_context(db, CONTEXT_COURSE, course_id)?;
    Ok((course_id, context_id))
}
