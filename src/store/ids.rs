//! store/ids — annotations (backup) and mappings (restore) over satchel_ids.
//!
//! Annotation rules:
//! - ids <= 0 mean "no reference" and are dropped silently;
//! - scale references share the id space of gradable items and are stored
//!   negated (AnnotatedId::Scale(7) -> -7), distinct from Item(7);
//! - annotate is idempotent (INSERT OR IGNORE).
//!
//! Provisional vs final: entries of type T are provisional; promote_to_final(T)
//! copies them forward into "T" + FINAL_SUFFIX (existing final entries win)
//! and purges the provisional ones.
//!
//! Mappings: value = new id. Written at most once per (type, old id).

use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;

use crate::db::RowStream;
use crate::error::StructuralError;
use crate::metrics::{record_annotation, record_mapping_written};
use crate::record::Value;

use super::Session;

/// Reserved suffix of confirmed ("final") entity types.
pub const FINAL_SUFFIX: &str = "final";

pub fn final_type(entity_type: &str) -> String {
    format!("{entity_type}{FINAL_SUFFIX}")
}

/// How an id found in a field is to be annotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdKind {
    #[default]
    Plain,
    /// Scale reference: stored negated in the gradable-item id space.
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatedId {
    Item(i64),
    Scale(i64),
}

impl AnnotatedId {
    pub fn of(kind: IdKind, raw: i64) -> Self {
        match kind {
            IdKind::Plain => AnnotatedId::Item(raw),
            IdKind::Scale => AnnotatedId::Scale(raw),
        }
    }

    /// Stored key, or None when the id means "no reference".
    pub fn stored(self) -> Option<i64> {
        match self {
            AnnotatedId::Item(n) if n > 0 => Some(n),
            AnnotatedId::Item(_) => None,
            AnnotatedId::Scale(0) => None,
            // i64::MIN has no positive counterpart
            AnnotatedId::Scale(n) => n.checked_abs().map(|a| -a),
        }
    }
}

impl From<i64> for AnnotatedId {
    fn from(n: i64) -> Self {
        AnnotatedId::Item(n)
    }
}

/// A restore-side mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub new_id: i64,
    pub parent_id: Option<i64>,
    pub info: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingWrite {
    Written,
    /// Same value already recorded.
    Unchanged,
    /// A different value is already recorded; nothing written.
    Conflict { existing: i64 },
}

impl<'db> Session<'db> {
    fn ids_table(&self) -> String {
        self.db.store_table("satchel_ids")
    }

    /// Record that ids of `entity_type` must be included.
    pub fn annotate<I>(&self, entity_type: &str, ids: I) -> Result<(), StructuralError>
    where
        I: IntoIterator,
        I::Item: Into<AnnotatedId>,
    {
        self.annotate_with_parent(entity_type, ids, None)
    }

    /// Same as annotate, remembering a parent id (e.g. owning context) for new entries.
    pub fn annotate_with_parent<I>(
        &self,
        entity_type: &str,
        ids: I,
        parent_id: Option<i64>,
    ) -> Result<(), StructuralError>
    where
        I: IntoIterator,
        I::Item: Into<AnnotatedId>,
    {
        let mut stmt = self.db.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} (session_id, item_type, item_id, value, parent_id)
             VALUES (?1, ?2, ?3, 1, ?4)",
            self.ids_table()
        ))?;
        for id in ids {
            if let Some(key) = id.into().stored() {
                let n = stmt.execute(rusqlite::params![self.id, entity_type, key, parent_id])?;
                if n > 0 {
                    record_annotation();
                }
            }
        }
        Ok(())
    }

    /// True iff at least one (provisional) entry of `entity_type` exists.
    pub fn exists(&self, entity_type: &str) -> Result<bool, StructuralError> {
        let hit: Option<i64> = self
            .db
            .conn
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE session_id = ?1 AND item_type = ?2 LIMIT 1",
                    self.ids_table()
                ),
                rusqlite::params![self.id, entity_type],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn count(&self, entity_type: &str) -> Result<i64, StructuralError> {
        let n: i64 = self.db.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE session_id = ?1 AND item_type = ?2",
                self.ids_table()
            ),
            rusqlite::params![self.id, entity_type],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// All entries of this session (annotations and mappings, every type).
    pub fn entries(&self) -> Result<i64, StructuralError> {
        let n: i64 = self.db.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE session_id = ?1", self.ids_table()),
            [&self.id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Copy provisional entries forward into the final namespace, then purge them.
    /// Entries already final are left untouched; a second call is a no-op.
    pub fn promote_to_final(&self, entity_type: &str) -> Result<(), StructuralError> {
        let tx = self.db.conn.unchecked_transaction()?;
        let copied = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {t} (session_id, item_type, item_id, value, parent_id, info)
                 SELECT session_id, ?3, item_id, value, parent_id, info
                 FROM {t} WHERE session_id = ?1 AND item_type = ?2",
                t = self.ids_table()
            ),
            rusqlite::params![self.id, entity_type, final_type(entity_type)],
        )?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE session_id = ?1 AND item_type = ?2",
                self.ids_table()
            ),
            rusqlite::params![self.id, entity_type],
        )?;
        tx.commit()?;
        debug!(
            "store: promoted {} new {} entr(ies) to final (session {})",
            copied, entity_type, self.id
        );
        Ok(())
    }

    fn stream_ids(&self, item_type: String) -> impl Iterator<Item = Result<i64, StructuralError>> + 'db {
        RowStream::new(
            self.db,
            format!(
                "SELECT item_id FROM {} WHERE session_id = ? AND item_type = ? ORDER BY item_id",
                self.ids_table()
            ),
            vec![SqlValue::Text(self.id.clone()), SqlValue::Text(item_type)],
        )
        .map(|r| {
            let rec = r?;
            rec.get_i64("item_id").ok_or_else(|| {
                StructuralError::Stream("satchel_ids.item_id is not an integer".to_string())
            })
        })
    }

    /// Lazy sequence over the provisional entries of `entity_type`.
    pub fn enumerate(
        &self,
        entity_type: &str,
    ) -> impl Iterator<Item = Result<i64, StructuralError>> + 'db {
        self.stream_ids(entity_type.to_string())
    }

    /// Lazy sequence over the final entries of `entity_type`.
    pub fn enumerate_final(
        &self,
        entity_type: &str,
    ) -> impl Iterator<Item = Result<i64, StructuralError>> + 'db {
        self.stream_ids(final_type(entity_type))
    }

    /// Drop all provisional entries of `entity_type`.
    pub fn purge(&self, entity_type: &str) -> Result<(), StructuralError> {
        self.purge_item_type(entity_type)
    }

    /// Drop all final entries of `entity_type`.
    pub fn purge_final(&self, entity_type: &str) -> Result<(), StructuralError> {
        self.purge_item_type(&final_type(entity_type))
    }

    fn purge_item_type(&self, item_type: &str) -> Result<(), StructuralError> {
        self.db.conn.execute(
            &format!(
                "DELETE FROM {} WHERE session_id = ?1 AND item_type = ?2",
                self.ids_table()
            ),
            rusqlite::params![self.id, item_type],
        )?;
        Ok(())
    }

    // ---------- mappings (restore) ----------

    pub fn set_mapping(
        &self,
        entity_type: &str,
        old_id: i64,
        new_id: i64,
    ) -> Result<MappingWrite, StructuralError> {
        self.set_mapping_with(entity_type, old_id, new_id, None, None)
    }

    pub fn set_mapping_with(
        &self,
        entity_type: &str,
        old_id: i64,
        new_id: i64,
        parent_id: Option<i64>,
        info: Option<&Value>,
    ) -> Result<MappingWrite, StructuralError> {
        if let Some(existing) = self.get_mapping(entity_type, old_id)? {
            return Ok(if existing.new_id == new_id {
                MappingWrite::Unchanged
            } else {
                MappingWrite::Conflict {
                    existing: existing.new_id,
                }
            });
        }
        let info = info.map(|v| v.to_string());
        self.db.conn.execute(
            &format!(
                "INSERT INTO {} (session_id, item_type, item_id, value, parent_id, info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.ids_table()
            ),
            rusqlite::params![self.id, entity_type, old_id, new_id, parent_id, info],
        )?;
        record_mapping_written();
        Ok(MappingWrite::Written)
    }

    /// Mapping for (entity_type, old_id); None = not found (never a guess).
    pub fn get_mapping(
        &self,
        entity_type: &str,
        old_id: i64,
    ) -> Result<Option<Mapping>, StructuralError> {
        let row = self
            .db
            .conn
            .query_row(
                &format!(
                    "SELECT value, parent_id, info FROM {}
                     WHERE session_id = ?1 AND item_type = ?2 AND item_id = ?3",
                    self.ids_table()
                ),
                rusqlite::params![self.id, entity_type, old_id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, Option<i64>>(1)?,
                        r.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((new_id, parent_id, info)) = row else {
            return Ok(None);
        };
        let info = match info {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        };
        Ok(Some(Mapping {
            new_id,
            parent_id,
            info,
        }))
    }

    pub fn get_new_id(&self, entity_type: &str, old_id: i64) -> Result<Option<i64>, StructuralError> {
        Ok(self.get_mapping(entity_type, old_id)?.map(|m| m.new_id))
    }

    /// Forget (entity_type, old_id), e.g. after its row was deleted. False if absent.
    pub fn remove_mapping(&self, entity_type: &str, old_id: i64) -> Result<bool, StructuralError> {
        let n = self.db.conn.execute(
            &format!(
                "DELETE FROM {} WHERE session_id = ?1 AND item_type = ?2 AND item_id = ?3",
                self.ids_table()
            ),
            rusqlite::params![self.id, entity_type, old_id],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotated_id_encoding() {
        assert_eq!(AnnotatedId::Item(7).stored(), Some(7));
        assert_eq!(AnnotatedId::Item(0).stored(), None);
        assert_eq!(AnnotatedId::Item(-7).stored(), None);
        assert_eq!(AnnotatedId::Scale(7).stored(), Some(-7));
        assert_eq!(AnnotatedId::Scale(-7).stored(), Some(-7));
        assert_eq!(AnnotatedId::Scale(0).stored(), None);
        assert_eq!(AnnotatedId::Scale(i64::MIN).stored(), None);
        assert_eq!(AnnotatedId::Scale(i64::MAX).stored(), Some(-i64::MAX));
    }
}
