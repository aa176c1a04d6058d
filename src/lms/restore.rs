//! lms/restore — core path handlers.
//!
//! Streams are dispatched users -> scales -> main -> questions -> files, so
//! most references are already mapped when a record arrives. The ones that
//! point forward (slot.questionid, cm.instance -> module row, category
//! parent, rule.pluginid) are deferred and fixed after all streams.

use log::debug;
use rusqlite::OptionalExtension;

use crate::error::RecordError;
use crate::record::Record;
use crate::restore::translate::translate_id;
use crate::restore::{
    FixedValue, IdField, PathHandler, Policy, RestoreContext, TableRestorer,
};
use crate::store::Scope;

use super::{CONTEXT_MODULE, COURSE_TABLE};

/// Where the activity subtree is rooted for `scope`.
pub fn activity_path(scope: Scope) -> &'static str {
    match scope {
        Scope::Course { .. } => "/course/activities/activity",
        Scope::Activity { .. } => "/activity",
    }
}

/// Root path of the main stream for `scope`.
pub fn main_root(scope: Scope) -> &'static str {
    match scope {
        Scope::Course { .. } => "/course",
        Scope::Activity { .. } => "/activity",
    }
}

/// Course row: fills the shell created for this restore, never touches an
/// existing course. The course id mapping is recorded up front by the plan.
pub struct CourseRestorer;

const COURSE_SETTINGS: [&str; 4] = ["shortname", "fullname", "format", "startdate"];

impl PathHandler for CourseRestorer {
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        if !ctx.is_new_course() {
            debug!("restore: existing target course {}, settings kept", ctx.course_id());
            return Ok(());
        }
        for field in COURSE_SETTINGS {
            if let Some(v) = record.get(field).filter(|v| !v.is_null()) {
                ctx.update(COURSE_TABLE, ctx.course_id(), field, v)?;
            }
        }
        Ok(())
    }
}

/// Users are matched by username; only missing ones are created.
pub struct UserRestorer;

impl PathHandler for UserRestorer {
    fn process(&self, record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        let Some(old_id) = record.id() else {
            return Err(RecordError::InvalidField {
                path: ctx.path().to_string(),
                field: "id".to_string(),
                reason: "user record without id".to_string(),
            });
        };
        let username = match record.get_str("username").map(str::trim) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => {
                return Err(RecordError::InvalidField {
                    path: ctx.path().to_string(),
                    field: "username".to_string(),
                    reason: "empty username".to_string(),
                })
            }
        };
        let existing: Option<i64> = ctx
            .db()
            .conn()
            .query_row("SELECT id FROM users WHERE username = ?1", [&username], |r| r.get(0))
            .optional()
            .map_err(|e| ctx.persist_error("users", e.into()))?;
        let new_id = match existing {
            Some(id) => {
                debug!("restore: user '{}' matched existing {}", username, id);
                id
            }
            None => ctx.insert("users", &record)?,
        };
        ctx.record_mapping("user", old_id, new_id)
    }
}

/// Question categories keep their context when it travelled with the
/// archive; otherwise they move to the target course context (and the old
/// context is mapped there so attached files follow).
pub struct QuestionCategoryRestorer {
    inner: TableRestorer,
}

impl Default for QuestionCategoryRestorer {
    fn default() -> Self {
        Self {
            inner: TableRestorer::new("question_categories")
                .id(IdField::optional("parent", "question_category").deferred())
                .maps_as("question_category"),
        }
    }
}

impl PathHandler for QuestionCategoryRestorer {
    fn process(&self, mut record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        let old_ctx = record.get_i64("contextid").unwrap_or(0);
        let new_ctx = match ctx.map_id("context", old_ctx) {
            Some(c) => c,
            None => {
                let c = ctx.course_context_id();
                if old_ctx > 0 {
                    ctx.record_mapping("context", old_ctx, c)?;
                }
                c
            }
        };
        record.set("contextid", new_ctx);
        self.inner.persist(record, ctx).map(|_| ())
    }
}

/// (component, filearea) -> entity type of files.itemid.
const FILE_ITEM_TYPES: [(&str, &str, &str); 1] = [("question", "questiontext", "question")];

pub struct FileRestorer {
    inner: TableRestorer,
}

impl Default for FileRestorer {
    fn default() -> Self {
        Self {
            inner: TableRestorer::new("files")
                .id(IdField::required("contextid", "context"))
                .id(IdField::optional("userid", "user"))
                .maps_as("file"),
        }
    }
}

impl PathHandler for FileRestorer {
    fn process(&self, mut record: Record, ctx: &mut RestoreContext<'_, '_>) -> Result<(), RecordError> {
        let component = record.get_str("component").unwrap_or_default().to_string();
        let filearea = record.get_str("filearea").unwrap_or_default().to_string();
        let item_type = FILE_ITEM_TYPES
            .iter()
            .find(|(c, a, _)| *c == component && *a == filearea)
            .map(|(_, _, t)| *t);
        if let Some(t) = item_type {
            translate_id(&mut record, &IdField::required("itemid", t), ctx)?;
        }
        self.inner.persist(record, ctx).map(|_| ())
    }
}

/// Every core (path, handler) pair for an archive of `scope`.
pub fn core_handlers(scope: Scope) -> Vec<(String, Box<dyn PathHandler>)> {
    let act = activity_path(scope);
    let mut out: Vec<(String, Box<dyn PathHandler>)> = Vec::new();

    if let Scope::Course { .. } = scope {
        out.push(("/course".to_string(), Box::new(CourseRestorer)));
    }

    out.push((
        act.to_string(),
        Box::new(
            TableRestorer::new("course_modules")
                .fixed("course", FixedValue::CourseId)
                .id(IdField::polymorphic("instance", "modname", "", Policy::Optional).deferred())
                .own_context(CONTEXT_MODULE)
                .maps_as("course_module"),
        ),
    ));
    out.push((
        format!("{act}/quiz"),
        Box::new(
            TableRestorer::new("quiz")
                .fixed("course", FixedValue::CourseId)
                .maps_as("quiz"),
        ),
    ));
    out.push((
        format!("{act}/quiz/slots/slot"),
        Box::new(
            TableRestorer::new("quiz_slots")
                .id(IdField::required("quizid", "quiz"))
                .id(IdField::required("questionid", "question").deferred())
                .maps_as("quiz_slot"),
        ),
    ));
    out.push((
        format!("{act}/grade_items/grade_item"),
        Box::new(
            TableRestorer::new("grade_items")
                .fixed("courseid", FixedValue::CourseId)
                .id(IdField::polymorphic("iteminstance", "itemmodule", "", Policy::Optional))
                .id(IdField::optional("scaleid", "scale"))
                .maps_as("grade_item"),
        ),
    ));
    out.push((
        format!("{act}/grade_items/grade_item/grading_rules/grading_rule"),
        Box::new(
            TableRestorer::new("grading_rules")
                .id(IdField::required("gradeitem", "grade_item"))
                .id(IdField::polymorphic("pluginid", "plugin", "gradingrule_", Policy::Optional).deferred())
                .maps_as("grading_rules"),
        ),
    ));

    out.push((
        "/question_categories/question_category".to_string(),
        Box::new(QuestionCategoryRestorer::default()),
    ));
    out.push((
        "/question_categories/question_category/questions/question".to_string(),
        Box::new(
            TableRestorer::new("question")
                .id(IdField::required("category", "question_category"))
                .id(IdField::optional("createdby", "user"))
                .maps_as("question"),
        ),
    ));
    out.push((
        "/scales/scale".to_string(),
        Box::new(
            TableRestorer::new("scale")
                .id(IdField::optional("courseid", "course"))
                .maps_as("scale"),
        ),
    ));
    out.push(("/files/file".to_string(), Box::new(FileRestorer::default())));
    out.push(("/users/user".to_string(), Box::new(UserRestorer)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_paths_follow_scope() {
        let course: Vec<String> = core_handlers(Scope::Course { course_id: 1 })
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert!(course.contains(&"/course".to_string()));
        assert!(course.contains(&"/course/activities/activity/quiz/slots/slot".to_string()));

        let activity: Vec<String> = core_handlers(Scope::Activity { course_id: 1, cmid: 2 })
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert!(!activity.contains(&"/course".to_string()));
        assert!(activity.contains(&"/activity/grade_items/grade_item".to_string()));
    }
}
