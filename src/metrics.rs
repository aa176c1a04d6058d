//! Lightweight global metrics for Satchel.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Backup driver (records emitted / skipped, annotations)
//! - Restore dispatcher (records persisted / skipped, unmatched paths)
//! - Mapping store (mappings written, deferred references resolved)
//!
//! Per-run numbers live in BackupReport/RestoreReport; these are process totals.

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Backup -----
static BACKUP_RECORDS_EMITTED: AtomicU64 = AtomicU64::new(0);
static BACKUP_RECORDS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static ANNOTATIONS_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Restore -----
static RESTORE_RECORDS_PERSISTED: AtomicU64 = AtomicU64::new(0);
static RESTORE_RECORDS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static RESTORE_PATHS_UNMATCHED: AtomicU64 = AtomicU64::new(0);

// ----- Mapping store -----
static MAPPINGS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static DEFERRED_RESOLVED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    // Backup
    pub backup_records_emitted: u64,
    pub backup_records_skipped: u64,
    pub annotations_written: u64,

    // Restore
    pub restore_records_persisted: u64,
    pub restore_records_skipped: u64,
    pub restore_paths_unmatched: u64,

    // Mapping store
    pub mappings_written: u64,
    pub deferred_resolved: u64,
}

impl MetricsSnapshot {
    /// Share of restore records that were skipped.
    pub fn restore_skip_ratio(&self) -> f64 {
        let total = self.restore_records_persisted + self.restore_records_skipped;
        if total == 0 {
            0.0
        } else {
            self.restore_records_skipped as f64 / total as f64
        }
    }
}

// ----- Recorders (Backup) -----
pub fn record_backup_emitted() {
    BACKUP_RECORDS_EMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_backup_skipped() {
    BACKUP_RECORDS_SKIPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_annotation() {
    ANNOTATIONS_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_annotations(n: u64) {
    ANNOTATIONS_WRITTEN.fetch_add(n, Ordering::Relaxed);
}

// ----- Recorders (Restore) -----
pub fn record_restore_persisted() {
    RESTORE_RECORDS_PERSISTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_restore_skipped() {
    RESTORE_RECORDS_SKIPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_restore_unmatched() {
    RESTORE_PATHS_UNMATCHED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Mapping store) -----
pub fn record_mapping_written() {
    MAPPINGS_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_deferred_resolved() {
    DEFERRED_RESOLVED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        backup_records_emitted: BACKUP_RECORDS_EMITTED.load(Ordering::Relaxed),
        backup_records_skipped: BACKUP_RECORDS_SKIPPED.load(Ordering::Relaxed),
        annotations_written: ANNOTATIONS_WRITTEN.load(Ordering::Relaxed),

        restore_records_persisted: RESTORE_RECORDS_PERSISTED.load(Ordering::Relaxed),
        restore_records_skipped: RESTORE_RECORDS_SKIPPED.load(Ordering::Relaxed),
        restore_paths_unmatched: RESTORE_PATHS_UNMATCHED.load(Ordering::Relaxed),

        mappings_written: MAPPINGS_WRITTEN.load(Ordering::Relaxed),
        deferred_resolved: DEFERRED_RESOLVED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    BACKUP_RECORDS_EMITTED.store(0, Ordering::Relaxed);
    BACKUP_RECORDS_SKIPPED.store(0, Ordering::Relaxed);
    ANNOTATIONS_WRITTEN.store(0, Ordering::Relaxed);

    RESTORE_RECORDS_PERSISTED.store(0, Ordering::Relaxed);
    RESTORE_RECORDS_SKIPPED.store(0, Ordering::Relaxed);
    RESTORE_PATHS_UNMATCHED.store(0, Ordering::Relaxed);

    MAPPINGS_WRITTEN.store(0, Ordering::Relaxed);
    DEFERRED_RESOLVED.store(0, Ordering::Relaxed);
}
