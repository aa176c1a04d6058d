//! store/question_bank — two-phase question category inclusion.
//!
//! Phase 1: every category owned by the target context.
//! Phase 2: categories in *other* contexts that own already-annotated
//!          questions, found with one batched DISTINCT join against the
//!          store (no per-question queries).
//! Owning contexts of all annotated categories are annotated under "context".

use log::debug;

use crate::db::check_ident;
use crate::error::StructuralError;
use crate::metrics::record_annotations;

use super::ids::final_type;
use super::Session;

pub const QUESTION: &str = "question";
pub const QUESTION_CATEGORY: &str = "question_category";
pub const CONTEXT: &str = "context";

/// Where questions and categories live in the source schema.
#[derive(Debug, Clone)]
pub struct QuestionBankSchema {
    pub question_table: String,
    pub question_category_field: String,
    pub category_table: String,
    pub category_context_field: String,
}

impl Default for QuestionBankSchema {
    fn default() -> Self {
        Self {
            question_table: "question".to_string(),
            question_category_field: "category".to_string(),
            category_table: "question_categories".to_string(),
            category_context_field: "contextid".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestionBankStats {
    pub direct: usize,
    pub foreign: usize,
}

pub fn annotate_question_categories(
    session: &Session<'_>,
    schema: &QuestionBankSchema,
    target_context_id: i64,
) -> Result<QuestionBankStats, StructuralError> {
    let q = check_ident(&schema.question_table)?;
    let qcat = check_ident(&schema.question_category_field)?;
    let c = check_ident(&schema.category_table)?;
    let cctx = check_ident(&schema.category_context_field)?;
    let ids = session.db().store_table("satchel_ids");
    let conn = &session.db().conn;

    // 1) categories of the target context
    let direct = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {ids} (session_id, item_type, item_id, value, parent_id)
             SELECT ?1, ?2, c.id, 1, c.{cctx} FROM {c} c
             WHERE c.{cctx} = ?3 AND c.id > 0"
        ),
        rusqlite::params![session.id(), QUESTION_CATEGORY, target_context_id],
    )?;

    // 2) categories of annotated questions living elsewhere (shared banks)
    let foreign = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {ids} (session_id, item_type, item_id, value, parent_id)
             SELECT DISTINCT ?1, ?2, c.id, 1, c.{cctx}
             FROM {q} qq
             JOIN {ids} bi ON bi.item_id = qq.id
                          AND bi.session_id = ?1
                          AND bi.item_type IN (?3, ?4)
             JOIN {c} c ON c.id = qq.{qcat}
             WHERE c.{cctx} <> ?5 AND c.id > 0"
        ),
        rusqlite::params![
            session.id(),
            QUESTION_CATEGORY,
            QUESTION,
            final_type(QUESTION),
            target_context_id
        ],
    )?;

    // owning contexts travel with their categories
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {ids} (session_id, item_type, item_id, value)
             SELECT DISTINCT ?1, ?2, parent_id, 1 FROM {ids}
             WHERE session_id = ?1 AND item_type = ?3 AND parent_id > 0"
        ),
        rusqlite::params![session.id(), CONTEXT, QUESTION_CATEGORY],
    )?;

    record_annotations((direct + foreign) as u64);
    debug!(
        "question bank: {} direct + {} foreign categor(ies), session {}",
        direct,
        foreign,
        session.id()
    );
    Ok(QuestionBankStats { direct, foreign })
}
