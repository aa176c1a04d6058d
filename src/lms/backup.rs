//! lms/backup — element trees of the backup plan steps.
//!
//! main (course.jsonl | activity.jsonl):
//!   /course                                  course row (+ contextid)
//!     /activities/activity                   course_modules (+ contextid)
//!       /quiz/slots/slot                     quiz, quiz_slots (questionid -> "question")
//!       /grade_items/grade_item              scaleid -> scale space of "grade_item"
//!         /grading_rules/grading_rule/plugin_gradingrule_*
//!     /plugin_disguise_*
//!     /logs/plugin_logstore_*
//! Activity scope roots the same activity subtree at /activity.
//!
//! Auxiliary steps read back what main annotated (final entries only).

use std::collections::BTreeMap;

use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::StructuralError;
use crate::plugins::{
    add_plugin_structure, ContributionContext, PluginRegistry, FAMILY_DISGUISE,
    FAMILY_GRADINGRULE, FAMILY_LOGSTORE,
};
use crate::store::{IdKind, Scope};
use crate::structure::{Element, Param, ProcessorVar, Source};

use super::{CONTEXT_COURSE, CONTEXT_MODULE};

/// Plugins that contributed to a tree, family -> names.
pub type Contributions = BTreeMap<String, Vec<String>>;

pub const COURSE_FIELDS: [&str; 6] = ["id", "shortname", "fullname", "format", "startdate", "contextid"];
pub const ACTIVITY_FIELDS: [&str; 7] = ["id", "course", "modname", "instance", "section", "visible", "contextid"];
pub const QUIZ_FIELDS: [&str; 7] = ["id", "course", "name", "intro", "grade", "timeopen", "cmid"];
pub const SLOT_FIELDS: [&str; 5] = ["id", "quizid", "slot", "questionid", "maxmark"];
pub const GRADE_ITEM_FIELDS: [&str; 8] = [
    "id", "courseid", "itemtype", "itemmodule", "iteminstance", "itemname", "scaleid", "grademax",
];
pub const GRADING_RULE_FIELDS: [&str; 4] = ["id", "gradeitem", "plugin", "pluginid"];
pub const CATEGORY_FIELDS: [&str; 4] = ["id", "name", "contextid", "parent"];
pub const QUESTION_FIELDS: [&str; 6] = ["id", "category", "name", "questiontext", "qtype", "createdby"];
pub const SCALE_FIELDS: [&str; 4] = ["id", "courseid", "name", "scale"];
pub const FILE_FIELDS: [&str; 10] = [
    "id", "contenthash", "contextid", "component", "filearea", "itemid", "filepath", "filename",
    "userid", "filesize",
];
pub const USER_FIELDS: [&str; 5] = ["id", "username", "firstname", "lastname", "email"];

/// Builds the plugin-extended main tree for one scope.
pub struct TreeBuilder<'a> {
    pub db: &'a Database,
    pub cfg: &'a SatchelConfig,
    pub registry: &'a PluginRegistry,
    pub scope: Scope,
    contributions: Contributions,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        db: &'a Database,
        cfg: &'a SatchelConfig,
        registry: &'a PluginRegistry,
        scope: Scope,
    ) -> Self {
        Self {
            db,
            cfg,
            registry,
            scope,
            contributions: Contributions::new(),
        }
    }

    pub fn into_contributions(self) -> Contributions {
        self.contributions
    }

    fn splice(&mut self, parent: &mut Element, family: &str) -> Result<(), StructuralError> {
        let name = parent.name().to_string();
        let ctx = ContributionContext {
            db: self.db,
            cfg: self.cfg,
            scope: self.scope,
            parent: &name,
        };
        let names = add_plugin_structure(parent, family, self.registry, &ctx)?;
        if !names.is_empty() {
            let entry = self.contributions.entry(family.to_string()).or_default();
            for n in names {
                if !entry.contains(&n) {
                    entry.push(n);
                }
            }
        }
        Ok(())
    }

    /// Main structure: /course or /activity.
    pub fn main_tree(&mut self) -> Result<Element, StructuralError> {
        match self.scope {
            Scope::Course { .. } => self.course_tree(),
            Scope::Activity { .. } => {
                let mut activity = self.activity_element()?;
                if self.cfg.include_logs {
                    activity.add_child(self.logs_element()?)?;
                }
                Ok(activity)
            }
        }
    }

    fn course_tree(&mut self) -> Result<Element, StructuralError> {
        let mut course = Element::new("course")
            .with_finals(COURSE_FIELDS)
            .with_source(Source::query(
                &format!(
                    "SELECT c.*, x.id AS contextid FROM course c
                     LEFT JOIN context x ON x.contextlevel = {CONTEXT_COURSE} AND x.instanceid = c.id
                     WHERE c.id = ?"
                ),
                vec![Param::Var(ProcessorVar::CourseId)],
            ))?
            .annotate_files("course", "overviewfiles", None, Param::Var(ProcessorVar::ContextId));

        let activity = self.activity_element()?;
        course.add_child(Element::new("activities").with_child(activity)?)?;
        self.splice(&mut course, FAMILY_DISGUISE)?;
        if self.cfg.include_logs {
            course.add_child(self.logs_element()?)?;
        }
        Ok(course)
    }

    fn activity_element(&mut self) -> Result<Element, StructuralError> {
        let (filter, param) = match self.scope {
            Scope::Course { .. } => ("cm.course", ProcessorVar::CourseId),
            Scope::Activity { .. } => ("cm.id", ProcessorVar::ActivityId),
        };
        let mut activity = Element::new("activity")
            .with_finals(ACTIVITY_FIELDS)
            .with_source(Source::query(
                &format!(
                    "SELECT cm.*, x.id AS contextid FROM course_modules cm
                     LEFT JOIN context x ON x.contextlevel = {CONTEXT_MODULE} AND x.instanceid = cm.id
                     WHERE {filter} = ? ORDER BY cm.id"
                ),
                vec![Param::Var(param)],
            ))?
            .annotate_self("course_module");

        activity.add_child(quiz_element()?)?;

        let mut rule = Element::new("grading_rule")
            .with_finals(GRADING_RULE_FIELDS)
            .with_source(
                Source::table("grading_rules")
                    .filter("gradeitem", Param::ParentId)
                    .sort("id"),
            )?;
        self.splice(&mut rule, FAMILY_GRADINGRULE)?;

        let grade_item = Element::new("grade_item")
            .with_finals(GRADE_ITEM_FIELDS)
            .with_source(Source::query(
                "SELECT * FROM grade_items
                 WHERE courseid = ? AND itemmodule = ? AND iteminstance = ? ORDER BY id",
                vec![
                    Param::Var(ProcessorVar::CourseId),
                    Param::ancestor("activity", "modname"),
                    Param::ancestor("activity", "instance"),
                ],
            ))?
            .annotate_field("scaleid", "grade_item", IdKind::Scale)
            .with_child(Element::new("grading_rules").with_child(rule)?)?;
        activity.add_child(Element::new("grade_items").with_child(grade_item)?)?;
        Ok(activity)
    }

    fn logs_element(&mut self) -> Result<Element, StructuralError> {
        let mut logs = Element::new("logs");
        self.splice(&mut logs, FAMILY_LOGSTORE)?;
        Ok(logs)
    }
}

fn quiz_element() -> Result<Element, StructuralError> {
    let slot = Element::new("slot")
        .with_finals(SLOT_FIELDS)
        .with_source(Source::table("quiz_slots").filter("quizid", Param::ParentId).sort("slot"))?
        .annotate_field("questionid", "question", IdKind::Plain);
    Element::new("quiz")
        .with_finals(QUIZ_FIELDS)
        .with_source(Source::query(
            "SELECT q.*, cm.id AS cmid FROM quiz q
             JOIN course_modules cm ON cm.instance = q.id AND cm.modname = 'quiz'
             WHERE cm.id = ?",
            vec![Param::ParentId],
        ))?
        .annotate_files("mod_quiz", "intro", None, Param::ancestor("activity", "contextid"))
        .with_child(Element::new("slots").with_child(slot)?)
}

/// Question bank: annotated categories and all their questions.
pub fn question_tree() -> Result<Element, StructuralError> {
    let question = Element::new("question")
        .with_finals(QUESTION_FIELDS)
        .with_source(Source::table("question").filter("category", Param::ParentId).sort("id"))?
        .annotate_field("createdby", "user", IdKind::Plain)
        .annotate_files(
            "question",
            "questiontext",
            Some("id"),
            Param::ancestor("question_category", "contextid"),
        );
    let category = Element::new("question_category")
        .with_finals(CATEGORY_FIELDS)
        .with_source(Source::annotated("question_category", Some("question_categories")))?
        .with_child(Element::new("questions").with_child(question)?)?;
    Element::new("question_categories").with_child(category)
}

/// Scales referenced by grade items (negated entries of the "grade_item" space).
pub fn scale_tree() -> Result<Element, StructuralError> {
    let scale = Element::new("scale")
        .with_finals(SCALE_FIELDS)
        .with_source(Source::annotated_scales("grade_item", "scale"))?;
    Element::new("scales").with_child(scale)
}

pub fn file_tree() -> Result<Element, StructuralError> {
    let file = Element::new("file")
        .with_finals(FILE_FIELDS)
        .with_source(Source::annotated(crate::backup::FILE, Some(crate::backup::FILES_TABLE)))?
        .annotate_field("userid", "user", IdKind::Plain);
    Element::new("files").with_child(file)
}

pub fn user_tree() -> Result<Element, StructuralError> {
    let user = Element::new("user")
        .with_finals(USER_FIELDS)
        .with_source(Source::annotated("user", Some("users")))?;
    Element::new("users").with_child(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_tree_paths_include_enabled_plugins_only() {
        let cfg = SatchelConfig::default()
            .with_enabled_plugins(FAMILY_LOGSTORE, &["standard"])
            .with_enabled_plugins::<&str>(FAMILY_DISGUISE, &[]);
        let db = Database::open_in_memory(&cfg).unwrap();
        let registry = PluginRegistry::with_defaults().unwrap();
        let mut b = TreeBuilder::new(&db, &cfg, &registry, Scope::Course { course_id: 1 });
        let paths = b.main_tree().unwrap().paths();
        assert!(paths.contains(&"/course/activities/activity/quiz/slots/slot".to_string()));
        assert!(paths.contains(&"/course/logs/plugin_logstore_standard/log".to_string()));
        assert!(paths.contains(
            &"/course/activities/activity/grade_items/grade_item/grading_rules/grading_rule/plugin_gradingrule_penalty/penalty"
                .to_string()
        ));
        assert!(!paths.iter().any(|p| p.contains("plugin_logstore_legacy")));
        assert!(!paths.iter().any(|p| p.contains("plugin_disguise")));

        let contributed = b.into_contributions();
        assert_eq!(contributed.get(FAMILY_LOGSTORE), Some(&vec!["standard".to_string()]));
        assert!(contributed.get(FAMILY_DISGUISE).is_none());
    }

    #[test]
    fn activity_scope_roots_at_activity() {
        let cfg = SatchelConfig::default().with_include_logs(false);
        let db = Database::open_in_memory(&cfg).unwrap();
        let registry = PluginRegistry::with_defaults().unwrap();
        let mut b = TreeBuilder::new(&db, &cfg, &registry, Scope::Activity { course_id: 1, cmid: 4 });
        let root = b.main_tree().unwrap();
        assert_eq!(root.name(), "activity");
        assert!(root.child("logs").is_none());
    }
}
