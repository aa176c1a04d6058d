//! plugins/disguise — per-course pseudonyms (`disguise_pseudonym`).
//!
//! Course scope only; an activity archive carries no pseudonyms.

use crate::config::SatchelConfig;
use crate::error::StructuralError;
use crate::restore::{FixedValue, IdField, PathHandler, RestoreTask, TableRestorer};
use crate::store::{IdKind, Scope};
use crate::structure::{Element, Param, ProcessorVar, Source};

use super::{
    subtree_name, BackupContributor, ContributionContext, Plugin, RestoreContributor,
    FAMILY_DISGUISE,
};

pub const NAME: &str = "pseudonym";
pub const TABLE: &str = "disguise_pseudonym";

pub fn factory(_cfg: &SatchelConfig) -> Box<dyn Plugin> {
    Box::new(Pseudonym)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pseudonym;

impl Plugin for Pseudonym {
    fn family(&self) -> &'static str {
        FAMILY_DISGUISE
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

impl BackupContributor for Pseudonym {
    fn contribute_subtree(
        &self,
        ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError> {
        if !matches!(ctx.scope, Scope::Course { .. }) {
            return Ok(None);
        }
        let pseudonym = Element::new("pseudonym")
            .with_finals(["id", "courseid", "userid", "pseudonym"])
            .with_source(
                Source::table(TABLE)
                    .filter("courseid", Param::Var(ProcessorVar::CourseId))
                    .sort("id"),
            )?
            .annotate_field("userid", "user", IdKind::Plain);
        Ok(Some(
            Element::new(&subtree_name(FAMILY_DISGUISE, NAME)).with_child(pseudonym)?,
        ))
    }
}

impl RestoreContributor for Pseudonym {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)> {
        let handler = TableRestorer::new(TABLE)
            .id(IdField::required("userid", "user"))
            .fixed("courseid", FixedValue::CourseId)
            .maps_as("disguise_pseudonym");
        vec![(
            task.plugin_path(FAMILY_DISGUISE, NAME, "/pseudonym"),
            Box::new(handler),
        )]
    }
}
