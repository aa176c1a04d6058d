//! store — session-scoped annotation / mapping store.
//!
//! Everything lives in three tables (inline in "main" or in the attached
//! durable store, see db/open.rs):
//! - satchel_sessions — one row per backup/restore session
//! - satchel_ids      — (session_id, item_type, item_id) -> value [+ parent_id, info]
//!                      annotations (value = 1) and mappings (value = new id)
//! - satchel_deferred — references whose target arrives later in the archive
//!
//! A Session is the explicit handle passed into resolvers and dispatchers;
//! there is no ambient "current backup id".

pub mod deferred;
pub mod ids;
pub mod question_bank;

use log::{debug, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::Database;
use crate::error::StructuralError;

pub use deferred::DeferredRef;
pub use ids::{AnnotatedId, IdKind, Mapping, MappingWrite, FINAL_SUFFIX};
pub use question_bank::{annotate_question_categories, QuestionBankSchema, QuestionBankStats};

/// Create the store tables if missing.
pub fn ensure_store_schema(db: &Database) -> Result<(), StructuralError> {
    let s = &db.store_schema;
    db.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {s}.satchel_sessions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            scope TEXT NOT NULL,
            context_id INTEGER,
            status TEXT NOT NULL,
            created_ms INTEGER NOT NULL,
            updated_ms INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS {s}.satchel_ids (
            session_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            value INTEGER NOT NULL DEFAULT 1,
            parent_id INTEGER,
            info TEXT,
            PRIMARY KEY (session_id, item_type, item_id)
        );
        CREATE TABLE IF NOT EXISTS {s}.satchel_deferred (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            path TEXT NOT NULL,
            tbl TEXT NOT NULL,
            row_id INTEGER NOT NULL,
            field TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            old_id INTEGER NOT NULL,
            required INTEGER NOT NULL,
            owner_type TEXT,
            owner_id INTEGER
        );
        CREATE INDEX IF NOT EXISTS {s}.idx_satchel_deferred_session
            ON satchel_deferred (session_id);
        "
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Backup,
    Restore,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Backup => "backup",
            SessionKind::Restore => "restore",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "backup" => Some(SessionKind::Backup),
            "restore" => Some(SessionKind::Restore),
            _ => None,
        }
    }
}

/// Target scope of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    Course { course_id: i64 },
    Activity { course_id: i64, cmid: i64 },
}

impl Scope {
    pub fn course_id(&self) -> i64 {
        match self {
            Scope::Course { course_id } | Scope::Activity { course_id, .. } => *course_id,
        }
    }

    pub fn activity_id(&self) -> Option<i64> {
        match self {
            Scope::Course { .. } => None,
            Scope::Activity { cmid, .. } => Some(*cmid),
        }
    }
}

/// One backup or restore operation.
pub struct Session<'db> {
    db: &'db Database,
    id: String,
    kind: SessionKind,
    scope: Scope,
    context_id: Option<i64>,
    keep: bool,
}

/// Persisted session row (list_sessions).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub kind: String,
    pub scope: String,
    pub context_id: Option<i64>,
    pub status: String,
    pub created_ms: i64,
    pub entries: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Random session id (hex, 32 chars).
pub fn generate_session_id() -> String {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

impl<'db> Session<'db> {
    pub fn create(
        db: &'db Database,
        kind: SessionKind,
        scope: Scope,
    ) -> Result<Self, StructuralError> {
        let id = generate_session_id();
        let now = now_ms();
        db.conn.execute(
            &format!(
                "INSERT INTO {} (id, kind, scope, context_id, status, created_ms, updated_ms)
                 VALUES (?1, ?2, ?3, NULL, 'running', ?4, ?4)",
                db.store_table("satchel_sessions")
            ),
            rusqlite::params![id, kind.as_str(), serde_json::to_string(&scope)?, now],
        )?;
        info!("session: created {} ({}, {:?})", id, kind.as_str(), scope);
        Ok(Self {
            db,
            id,
            kind,
            scope,
            context_id: None,
            keep: false,
        })
    }

    /// Reattach to a persisted session (interrupted job resumed by its runner).
    pub fn resume(db: &'db Database, id: &str) -> Result<Self, StructuralError> {
        let row = db.conn.query_row(
            &format!(
                "SELECT kind, scope, context_id FROM {} WHERE id = ?1",
                db.store_table("satchel_sessions")
            ),
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<i64>>(2)?,
                ))
            },
        );
        let (kind, scope, context_id) = match row {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StructuralError::UnknownSession(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let kind = SessionKind::parse(&kind)
            .ok_or_else(|| StructuralError::UnknownSession(id.to_string()))?;
        let scope: Scope = serde_json::from_str(&scope)?;
        db.conn.execute(
            &format!(
                "UPDATE {} SET status = 'running', updated_ms = ?2 WHERE id = ?1",
                db.store_table("satchel_sessions")
            ),
            rusqlite::params![id, now_ms()],
        )?;
        debug!("session: resumed {}", id);
        Ok(Self {
            db,
            id: id.to_string(),
            kind,
            scope,
            context_id,
            keep: false,
        })
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    #[inline]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[inline]
    pub fn db(&self) -> &'db Database {
        self.db
    }

    pub fn context_id(&self) -> Option<i64> {
        self.context_id
    }

    /// Record the context the session operates in (ContextId processor variable).
    pub fn set_context_id(&mut self, context_id: i64) -> Result<(), StructuralError> {
        self.db.conn.execute(
            &format!(
                "UPDATE {} SET context_id = ?2, updated_ms = ?3 WHERE id = ?1",
                self.db.store_table("satchel_sessions")
            ),
            rusqlite::params![self.id, context_id, now_ms()],
        )?;
        self.context_id = Some(context_id);
        Ok(())
    }

    /// Keep entries after finish/abort (inspection).
    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    /// Completed: mark and destroy entries.
    pub fn finish(self) -> Result<(), StructuralError> {
        self.close("completed")
    }

    /// Failed: mark and destroy entries.
    pub fn abort(self) -> Result<(), StructuralError> {
        self.close("failed")
    }

    fn close(self, status: &str) -> Result<(), StructuralError> {
        self.db.conn.execute(
            &format!(
                "UPDATE {} SET status = ?2, updated_ms = ?3 WHERE id = ?1",
                self.db.store_table("satchel_sessions")
            ),
            rusqlite::params![self.id, status, now_ms()],
        )?;
        if !self.keep {
            drop_session_entries(self.db, &self.id)?;
        }
        info!("session: {} {}", self.id, status);
        Ok(())
    }
}

/// Delete all ids/deferred rows of a session (the session row stays as history).
pub fn drop_session_entries(db: &Database, session_id: &str) -> Result<(), StructuralError> {
    db.conn.execute(
        &format!(
            "DELETE FROM {} WHERE session_id = ?1",
            db.store_table("satchel_ids")
        ),
        [session_id],
    )?;
    db.conn.execute(
        &format!(
            "DELETE FROM {} WHERE session_id = ?1",
            db.store_table("satchel_deferred")
        ),
        [session_id],
    )?;
    Ok(())
}

/// Remove a session completely (row and entries).
pub fn drop_session(db: &Database, session_id: &str) -> Result<bool, StructuralError> {
    drop_session_entries(db, session_id)?;
    let n = db.conn.execute(
        &format!(
            "DELETE FROM {} WHERE id = ?1",
            db.store_table("satchel_sessions")
        ),
        [session_id],
    )?;
    Ok(n > 0)
}

pub fn list_sessions(db: &Database) -> Result<Vec<SessionInfo>, StructuralError> {
    let mut stmt = db.conn.prepare(&format!(
        "SELECT s.id, s.kind, s.scope, s.context_id, s.status, s.created_ms,
                (SELECT COUNT(*) FROM {ids} i WHERE i.session_id = s.id)
         FROM {sessions} s ORDER BY s.created_ms, s.id",
        ids = db.store_table("satchel_ids"),
        sessions = db.store_table("satchel_sessions"),
    ))?;
    let out = stmt
        .query_map([], |r| {
            Ok(SessionInfo {
                id: r.get(0)?,
                kind: r.get(1)?,
                scope: r.get(2)?,
                context_id: r.get(3)?,
                status: r.get(4)?,
                created_ms: r.get(5)?,
                entries: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(out)
}
