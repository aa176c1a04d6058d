#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

// Реляционный бэкенд и session store
pub mod db;    // src/db/{mod,core,open,scan,write}.rs
pub mod store; // src/store/{mod,ids,deferred,question_bank}.rs

// Element tree + serialized stream + archive layout
pub mod structure; // src/structure/{mod,resolve,vars}.rs
pub mod stream;
pub mod archive;

// Drivers
pub mod backup;  // src/backup/{mod,plan}.rs
pub mod restore; // src/restore/{mod,translate,resolvers,deferred,plan}.rs

// Extension points (logstore, gradingrule, disguise)
pub mod plugins;

// Course data model shipped with the engine
pub mod lms;

// Удобные реэкспорты
pub use backup::{backup_to_dir, BackupDriver, BackupPlan, BackupReport, BackupStep};
pub use config::SatchelConfig;
pub use db::Database;
pub use error::{Outcome, RecordError, StructuralError};
pub use plugins::PluginRegistry;
pub use record::{Record, Value};
pub use restore::{restore_from_dir, restore_into, RestoreReport, RestoreTarget};
pub use store::{list_sessions, AnnotatedId, IdKind, Scope, Session, SessionKind};
pub use structure::{Element, Param, ProcessorVar, Source};
