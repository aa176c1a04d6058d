//! store/deferred — references persisted before their target was mapped.
//!
//! A restore handler may insert a row whose reference points at an entity
//! that only arrives in a later stream (e.g. quiz slots -> questions). The
//! pending reference is stored durably here and resolved after all streams
//! by restore::deferred::resolve_deferred.

use crate::error::StructuralError;

use super::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct DeferredRef {
    pub path: String,
    pub table: String,
    pub row_id: i64,
    pub field: String,
    pub entity_type: String,
    pub old_id: i64,
    pub required: bool,
    /// (entity type, old id) the row itself is mapped under; removed with the row.
    pub owner: Option<(String, i64)>,
}

impl<'db> Session<'db> {
    pub fn defer_reference(&self, r: &DeferredRef) -> Result<(), StructuralError> {
        self.db().conn.execute(
            &format!(
                "INSERT INTO {} (session_id, path, tbl, row_id, field, entity_type, old_id, required,
                                 owner_type, owner_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                self.db().store_table("satchel_deferred")
            ),
            rusqlite::params![
                self.id(),
                r.path,
                r.table,
                r.row_id,
                r.field,
                r.entity_type,
                r.old_id,
                r.required as i64,
                r.owner.as_ref().map(|(t, _)| t.as_str()),
                r.owner.as_ref().map(|(_, id)| *id)
            ],
        )?;
        Ok(())
    }

    /// All pending references in insertion order.
    pub fn deferred(&self) -> Result<Vec<DeferredRef>, StructuralError> {
        let mut stmt = self.db().conn.prepare(&format!(
            "SELECT path, tbl, row_id, field, entity_type, old_id, required, owner_type, owner_id
             FROM {} WHERE session_id = ?1 ORDER BY id",
            self.db().store_table("satchel_deferred")
        ))?;
        let out = stmt
            .query_map([self.id()], |r| {
                Ok(DeferredRef {
                    path: r.get(0)?,
                    table: r.get(1)?,
                    row_id: r.get(2)?,
                    field: r.get(3)?,
                    entity_type: r.get(4)?,
                    old_id: r.get(5)?,
                    required: r.get::<_, i64>(6)? != 0,
                    owner: match (r.get::<_, Option<String>>(7)?, r.get::<_, Option<i64>>(8)?) {
                        (Some(t), Some(id)) => Some((t, id)),
                        _ => None,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    pub fn clear_deferred(&self) -> Result<(), StructuralError> {
        self.db().conn.execute(
            &format!(
                "DELETE FROM {} WHERE session_id = ?1",
                self.db().store_table("satchel_deferred")
            ),
            [self.id()],
        )?;
        Ok(())
    }
}
