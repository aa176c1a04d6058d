//! restore/deferred — second pass over references persisted before their target.
//!
//! Runs after every stream has been dispatched. Per reference:
//! - target mapped      -> field rewritten to the new id;
//! - required, unmapped -> the row is deleted together with its own mapping,
//!   record-level error; the row's remaining references are skipped;
//! - optional, unmapped -> field set to null.
//! Each reference is fixed in its own transaction.

use log::{debug, warn};
use std::collections::HashSet;

use crate::error::{RecordError, StructuralError};
use crate::metrics::{record_deferred_resolved, record_restore_skipped};
use crate::record::Value;

use super::RestoreContext;

#[derive(Debug, Clone, Default)]
pub struct DeferredStats {
    pub resolved: u64,
    pub nulled: u64,
    /// Rows deleted (each one a record that had been persisted).
    pub dropped: u64,
    pub errors: Vec<RecordError>,
}

pub fn resolve_deferred(ctx: &RestoreContext<'_, '_>) -> Result<DeferredStats, StructuralError> {
    let session = ctx.session();
    let db = ctx.db();
    let mut stats = DeferredStats::default();
    let mut deleted: HashSet<(String, i64)> = HashSet::new();

    for r in session.deferred()? {
        if deleted.contains(&(r.table.clone(), r.row_id)) {
            debug!("restore: {} row {} already dropped, skipping {}", r.table, r.row_id, r.field);
            continue;
        }
        let tx = db.conn().unchecked_transaction()?;
        match ctx.map_id(&r.entity_type, r.old_id) {
            Some(new_id) => {
                db.update_field(&r.table, r.row_id, &r.field, &Value::from(new_id))?;
                stats.resolved += 1;
                record_deferred_resolved();
            }
            None if r.required => {
                db.delete_row(&r.table, r.row_id)?;
                if let Some((owner_type, owner_id)) = &r.owner {
                    session.remove_mapping(owner_type, *owner_id)?;
                }
                deleted.insert((r.table.clone(), r.row_id));
                let e = RecordError::UnmappedRequired {
                    path: r.path.clone(),
                    field: r.field.clone(),
                    entity_type: r.entity_type.clone(),
                    old_id: r.old_id,
                };
                warn!("restore: dropping {} row {}: {}", r.table, r.row_id, e);
                record_restore_skipped();
                stats.dropped += 1;
                stats.errors.push(e);
            }
            None => {
                db.update_field(&r.table, r.row_id, &r.field, &Value::Null)?;
                stats.nulled += 1;
            }
        }
        tx.commit()?;
    }
    session.clear_deferred()?;

    debug!(
        "restore: deferred references: {} resolved, {} nulled, {} dropped",
        stats.resolved, stats.nulled, stats.dropped
    );
    Ok(stats)
}
