//! db/open — открытие Database с конфигом, подключение session store.
//!
//! - cfg.session_store = None: store tables are created inline ("main").
//! - cfg.session_store = Some(path): the file is ATTACHed as STORE_SCHEMA so
//!   annotation-backed sources can join against it from the same connection,
//!   and mappings survive the process (resume by session id).

use log::debug;
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

use crate::config::SatchelConfig;
use crate::error::StructuralError;
use crate::store::ensure_store_schema;

use super::core::{check_ident, Database, STORE_SCHEMA};

impl Database {
    /// Open (or create) a database file.
    pub fn open(path: &Path, cfg: &SatchelConfig) -> Result<Self, StructuralError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_conn(conn, Some(path), cfg)
    }

    /// In-memory database (tests, scratch targets).
    pub fn open_in_memory(cfg: &SatchelConfig) -> Result<Self, StructuralError> {
        let conn = Connection::open_in_memory()?;
        Self::from_conn(conn, None, cfg)
    }

    /// ATTACH another database file under `schema` (no-op if already attached).
    pub fn attach(&self, path: &str, schema: &str) -> Result<(), StructuralError> {
        let schema = check_ident(schema)?;
        let mut stmt = self.conn.prepare("PRAGMA database_list")?;
        let attached = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if attached.iter().any(|s| s == schema) {
            return Ok(());
        }
        self.conn
            .execute(&format!("ATTACH DATABASE ?1 AS \"{}\"", schema), [path])?;
        debug!("db: attached {} as {}", path, schema);
        Ok(())
    }

    fn from_conn(
        conn: Connection,
        path: Option<&Path>,
        cfg: &SatchelConfig,
    ) -> Result<Self, StructuralError> {
        let store_schema = match cfg.session_store.as_deref() {
            Some(store) => {
                conn.execute("ATTACH DATABASE ?1 AS satchel_store", [store])?;
                debug!("db: session store attached from {}", store);
                STORE_SCHEMA.to_string()
            }
            None => "main".to_string(),
        };

        let db = Self {
            conn,
            store_schema,
            fetch_rows: cfg.fetch_rows.max(1),
            path: path.map(|p| p.to_path_buf()),
            open_streams: Cell::new(0),
            columns: RefCell::new(HashMap::new()),
        };
        ensure_store_schema(&db)?;
        Ok(db)
    }
}
