//! plugins/gradingrule — `penalty` grading rule.
//!
//! Hangs under each grading_rule element; one `penalty` row per rule
//! (gradingrule_penalty.ruleid -> grading_rules.id). The rule itself points
//! back through grading_rules.pluginid, restored as entity type
//! "gradingrule_penalty".

use crate::config::SatchelConfig;
use crate::error::StructuralError;
use crate::restore::{IdField, PathHandler, RestoreTask, TableRestorer};
use crate::structure::{Element, Param, Source};

use super::{
    subtree_name, BackupContributor, ContributionContext, Plugin, RestoreContributor,
    FAMILY_GRADINGRULE,
};

pub const NAME: &str = "penalty";
pub const TABLE: &str = "gradingrule_penalty";

pub fn factory(_cfg: &SatchelConfig) -> Box<dyn Plugin> {
    Box::new(PenaltyRule)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PenaltyRule;

impl Plugin for PenaltyRule {
    fn family(&self) -> &'static str {
        FAMILY_GRADINGRULE
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn as_backup(&self) -> Option<&dyn BackupContributor> {
        Some(self)
    }

    fn as_restore(&self) -> Option<&dyn RestoreContributor> {
        Some(self)
    }
}

impl BackupContributor for PenaltyRule {
    fn contribute_subtree(
        &self,
        _ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError> {
        let penalty = Element::new("penalty")
            .with_finals(["id", "ruleid", "penalty"])
            .with_source(Source::table(TABLE).filter("ruleid", Param::ParentId).sort("id"))?;
        Ok(Some(
            Element::new(&subtree_name(FAMILY_GRADINGRULE, NAME)).with_child(penalty)?,
        ))
    }
}

impl RestoreContributor for PenaltyRule {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)> {
        let handler = TableRestorer::new(TABLE)
            .id(IdField::required("ruleid", "grading_rules"))
            .maps_as("gradingrule_penalty");
        vec![(
            task.plugin_path(FAMILY_GRADINGRULE, NAME, "/penalty"),
            Box::new(handler),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_path_hangs_under_the_rule() {
        let task = RestoreTask::new("/course/activities/activity/grade_items/grade_item/grading_rules/grading_rule");
        let paths: Vec<String> = PenaltyRule.register_paths(&task).into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec!["/course/activities/activity/grade_items/grade_item/grading_rules/grading_rule/plugin_gradingrule_penalty/penalty"]
        );
    }
}
