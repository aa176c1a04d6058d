//! restore/resolvers — per-event-type resolution of polymorphic log fields.
//!
//! `objectid` of a log record means different things depending on the
//! record's event name. Each event type registers what its objectid refers
//! to; an event type with no registration cannot be restored safely and the
//! record is dropped.
//!
//! The `other` payload is opaque: it is passed through verbatim unless a
//! resolver is registered for the event name. No translation is invented here.

use std::collections::HashMap;

use crate::error::RecordError;

use super::RestoreContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectMapping {
    /// objectid is kept as it is.
    NotMapped,
    /// objectid is an id of this entity type (unmapped -> null).
    Entity(String),
}

/// Rewrites the serialized `other` payload of one event type.
pub trait OtherPayloadResolver {
    fn resolve(&self, other: &str, ctx: &RestoreContext<'_, '_>) -> Result<String, RecordError>;
}

#[derive(Default)]
pub struct EventResolverRegistry {
    objects: HashMap<String, ObjectMapping>,
    other: HashMap<String, Box<dyn OtherPayloadResolver>>,
}

impl EventResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object mappings of the built-in event types.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register_object("\\core\\event\\course_viewed", ObjectMapping::NotMapped);
        r.register_object("\\core\\event\\course_updated", ObjectMapping::NotMapped);
        r.register_object(
            "\\core\\event\\course_module_created",
            ObjectMapping::Entity("course_module".to_string()),
        );
        r.register_object(
            "\\core\\event\\question_created",
            ObjectMapping::Entity("question".to_string()),
        );
        r.register_object(
            "\\mod_quiz\\event\\course_module_viewed",
            ObjectMapping::Entity("quiz".to_string()),
        );
        r.register_object(
            "\\mod_quiz\\event\\edit_page_viewed",
            ObjectMapping::Entity("quiz".to_string()),
        );
        r.register_object(
            "\\core\\event\\grade_item_updated",
            ObjectMapping::Entity("grade_item".to_string()),
        );
        r
    }

    /// Register (or replace) what objectid means for `eventname`.
    pub fn register_object(&mut self, eventname: &str, mapping: ObjectMapping) -> Option<ObjectMapping> {
        self.objects.insert(eventname.to_string(), mapping)
    }

    pub fn object_mapping(&self, eventname: &str) -> Option<&ObjectMapping> {
        self.objects.get(eventname)
    }

    pub fn register_other(&mut self, eventname: &str, resolver: Box<dyn OtherPayloadResolver>) {
        self.other.insert(eventname.to_string(), resolver);
    }

    pub fn other_resolver(&self, eventname: &str) -> Option<&dyn OtherPayloadResolver> {
        self.other.get(eventname).map(|b| b.as_ref())
    }
}
