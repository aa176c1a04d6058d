//! plugins — independently versioned extensions contributing sub-structures.
//!
//! A plugin is created by a named factory registered under (family, name).
//! Capabilities are separate traits reached through `as_backup()` /
//! `as_restore()`; the core never looks at concrete plugin types.
//!
//! Backup: a contributor returns zero or one subtree whose root must be named
//! `plugin_<family>_<name>`. Restore: a contributor returns (path, handler)
//! pairs for a RestoreTask (where the family's subtrees hang).
//!
//! The registry also carries the event resolvers log restores consult: a
//! plugin that emits its own event types registers their object mapping (and
//! optionally an `other` payload resolver) next to its factory.
//!
//! A disabled plugin is simply never instantiated: its subtree is absent
//! from the stream and its paths have no handler.

pub mod disguise;
pub mod gradingrule;
pub mod logstore;

use log::debug;
use std::collections::BTreeMap;

use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::StructuralError;
use crate::restore::{
    EventResolverRegistry, ObjectMapping, OtherPayloadResolver, PathHandler, RestoreTask,
};
use crate::store::Scope;
use crate::structure::Element;

pub const FAMILY_LOGSTORE: &str = "logstore";
pub const FAMILY_GRADINGRULE: &str = "gradingrule";
pub const FAMILY_DISGUISE: &str = "disguise";

/// Reserved root name of a plugin's subtree.
pub fn subtree_name(family: &str, name: &str) -> String {
    format!("plugin_{}_{}", family, name)
}

/// What a backup contributor gets to see.
pub struct ContributionContext<'a> {
    pub db: &'a Database,
    pub cfg: &'a SatchelConfig,
    pub scope: Scope,
    /// Name of the element the subtree is attached to.
    pub parent: &'a str,
}

pub trait BackupContributor {
    fn contribute_subtree(
        &self,
        ctx: &ContributionContext<'_>,
    ) -> Result<Option<Element>, StructuralError>;
}

pub trait RestoreContributor {
    fn register_paths(&self, task: &RestoreTask) -> Vec<(String, Box<dyn PathHandler>)>;

    /// Called once before any stream is dispatched, outside transactions.
    fn before_restore(&self, _db: &Database) -> Result<(), StructuralError> {
        Ok(())
    }
}

pub trait Plugin {
    fn family(&self) -> &'static str;
    fn name(&self) -> &'static str;

    fn as_backup(&self) -> Option<&dyn BackupContributor> {
        None
    }

    fn as_restore(&self) -> Option<&dyn RestoreContributor> {
        None
    }
}

pub type PluginFactory = fn(&SatchelConfig) -> Box<dyn Plugin>;

#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<(String, String), PluginFactory>,
    events: EventResolverRegistry,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin and the built-in event types.
    pub fn with_defaults() -> Result<Self, StructuralError> {
        let mut r = Self {
            factories: BTreeMap::new(),
            events: EventResolverRegistry::with_defaults(),
        };
        r.register(FAMILY_LOGSTORE, logstore::standard::NAME, logstore::standard::factory)?;
        r.register(FAMILY_LOGSTORE, logstore::legacy::NAME, logstore::legacy::factory)?;
        r.register(FAMILY_LOGSTORE, logstore::database::NAME, logstore::database::factory)?;
        r.register(FAMILY_GRADINGRULE, gradingrule::NAME, gradingrule::factory)?;
        r.register(FAMILY_DISGUISE, disguise::NAME, disguise::factory)?;
        Ok(r)
    }

    pub fn register(
        &mut self,
        family: &str,
        name: &str,
        factory: PluginFactory,
    ) -> Result<(), StructuralError> {
        let key = (family.to_string(), name.to_string());
        if self.factories.contains_key(&key) {
            return Err(StructuralError::DuplicatePlugin {
                family: family.to_string(),
                name: name.to_string(),
            });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Register (or replace) what `objectid` means for `eventname`.
    pub fn register_event(&mut self, eventname: &str, mapping: ObjectMapping) -> &mut Self {
        self.events.register_object(eventname, mapping);
        self
    }

    pub fn register_other_resolver(
        &mut self,
        eventname: &str,
        resolver: Box<dyn OtherPayloadResolver>,
    ) -> &mut Self {
        self.events.register_other(eventname, resolver);
        self
    }

    pub fn event_resolvers(&self) -> &EventResolverRegistry {
        &self.events
    }

    pub fn create(
        &self,
        family: &str,
        name: &str,
        cfg: &SatchelConfig,
    ) -> Result<Box<dyn Plugin>, StructuralError> {
        self.factories
            .get(&(family.to_string(), name.to_string()))
            .map(|f| f(cfg))
            .ok_or_else(|| StructuralError::UnknownPlugin {
                family: family.to_string(),
                name: name.to_string(),
            })
    }

    pub fn families(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.factories.keys().map(|(f, _)| f.as_str()).collect();
        v.dedup();
        v
    }

    /// Registered names of `family`, sorted.
    pub fn names(&self, family: &str) -> Vec<&str> {
        self.factories
            .keys()
            .filter(|(f, _)| f == family)
            .map(|(_, n)| n.as_str())
            .collect()
    }

    /// Instances of the enabled plugins of `family`.
    pub fn enabled(&self, family: &str, cfg: &SatchelConfig) -> Vec<Box<dyn Plugin>> {
        self.factories
            .iter()
            .filter(|((f, n), _)| f == family && cfg.is_plugin_enabled(f, n))
            .map(|(_, factory)| factory(cfg))
            .collect()
    }
}

/// Splice the subtrees of `family`'s enabled plugins under `parent`.
/// Returns the names of the plugins that contributed.
pub fn add_plugin_structure(
    parent: &mut Element,
    family: &str,
    registry: &PluginRegistry,
    ctx: &ContributionContext<'_>,
) -> Result<Vec<String>, StructuralError> {
    let mut contributed = Vec::new();
    for plugin in registry.enabled(family, ctx.cfg) {
        let Some(b) = plugin.as_backup() else {
            continue;
        };
        let Some(subtree) = b.contribute_subtree(ctx)? else {
            continue;
        };
        let expected = subtree_name(plugin.family(), plugin.name());
        if subtree.name() != expected {
            return Err(StructuralError::PluginSubtreeName {
                family: plugin.family().to_string(),
                name: plugin.name().to_string(),
                got: subtree.name().to_string(),
                expected,
            });
        }
        parent.add_child(subtree)?;
        debug!("plugins: {}/{} contributed under {}", family, plugin.name(), parent.name());
        contributed.push(plugin.name().to_string());
    }
    Ok(contributed)
}

/// Restore handlers of `family`'s enabled plugins for one task.
pub fn plugin_handlers(
    registry: &PluginRegistry,
    family: &str,
    cfg: &SatchelConfig,
    task: &RestoreTask,
) -> Vec<(String, Box<dyn PathHandler>)> {
    let mut out = Vec::new();
    for plugin in registry.enabled(family, cfg) {
        if let Some(r) = plugin.as_restore() {
            out.extend(r.register_paths(task));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Plugin for Nop {
        fn family(&self) -> &'static str {
            "test"
        }
        fn name(&self) -> &'static str {
            "nop"
        }
    }

    fn nop(_: &SatchelConfig) -> Box<dyn Plugin> {
        Box::new(Nop)
    }

    #[test]
    fn duplicate_registration_is_structural() {
        let mut r = PluginRegistry::new();
        r.register("test", "nop", nop).unwrap();
        assert!(matches!(
            r.register("test", "nop", nop),
            Err(StructuralError::DuplicatePlugin { .. })
        ));
        assert!(matches!(
            r.create("test", "missing", &SatchelConfig::default()),
            Err(StructuralError::UnknownPlugin { .. })
        ));
    }

    #[test]
    fn enabled_follows_config() {
        let r = PluginRegistry::with_defaults().unwrap();
        assert_eq!(r.names(FAMILY_LOGSTORE), vec!["database", "legacy", "standard"]);
        let cfg = SatchelConfig::default().with_enabled_plugins(FAMILY_LOGSTORE, &["standard"]);
        let names: Vec<&str> = r
            .enabled(FAMILY_LOGSTORE, &cfg)
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["standard"]);
        assert_eq!(r.enabled(FAMILY_DISGUISE, &cfg).len(), 1);
    }
}
