//! structure — declarative element tree describing what to serialize.
//!
//! An Element has a name, final (scalar) fields, nested children and at most
//! one Source. Children are owned, so a cycle cannot be built; sibling names
//! are unique so every path the writer produces maps to one handler at most.
//!
//! Sources:
//! - Literal   — records in declared order
//! - Table     — table + equality filters (+ optional sort column)
//! - Query     — raw SELECT with `?` placeholders
//! - Annotated — final annotation entries of an entity type, optionally joined to a table
//!
//! Filter/query parameters are Params, resolved at iteration time
//! (see vars.rs): processor variables, the parent id, an ancestor's field
//! (pending value) or a literal.

pub mod resolve;
pub mod vars;

use crate::error::StructuralError;
use crate::record::{Record, Value};
use crate::store::IdKind;

pub use resolve::{resolve, RecordIter};
pub use vars::{Frames, VarScope};

/// Pipeline-supplied values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorVar {
    BackupId,
    CourseId,
    ContextId,
    ActivityId,
}

impl ProcessorVar {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessorVar::BackupId => "BACKUP_ID",
            ProcessorVar::CourseId => "COURSE_ID",
            ProcessorVar::ContextId => "CONTEXT_ID",
            ProcessorVar::ActivityId => "ACTIVITY_ID",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Var(ProcessorVar),
    /// `id` of the nearest enclosing element whose current record has one.
    ParentId,
    /// Pending value: field of the current record of an enclosing element.
    Ancestor { node: String, field: String },
    Literal(Value),
}

impl Param {
    pub fn ancestor(node: &str, field: &str) -> Self {
        Param::Ancestor {
            node: node.to_string(),
            field: field.to_string(),
        }
    }

    pub fn literal(v: impl Into<Value>) -> Self {
        Param::Literal(v.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Literal(Vec<Record>),
    Table {
        table: String,
        filters: Vec<(String, Param)>,
        sort: Option<String>,
    },
    Query {
        sql: String,
        params: Vec<Param>,
    },
    Annotated {
        entity_type: String,
        table: Option<String>,
        kind: IdKind,
    },
}

impl Source {
    pub fn table(table: &str) -> Self {
        Source::Table {
            table: table.to_string(),
            filters: Vec::new(),
            sort: None,
        }
    }

    /// Add an equality filter (Table sources only; ignored otherwise).
    pub fn filter(mut self, column: &str, param: Param) -> Self {
        if let Source::Table { filters, .. } = &mut self {
            filters.push((column.to_string(), param));
        }
        self
    }

    pub fn sort(mut self, column: &str) -> Self {
        if let Source::Table { sort, .. } = &mut self {
            *sort = Some(column.to_string());
        }
        self
    }

    pub fn query(sql: &str, params: Vec<Param>) -> Self {
        Source::Query {
            sql: sql.to_string(),
            params,
        }
    }

    pub fn annotated(entity_type: &str, table: Option<&str>) -> Self {
        Source::Annotated {
            entity_type: entity_type.to_string(),
            table: table.map(|t| t.to_string()),
            kind: IdKind::Plain,
        }
    }

    /// Scale entries of the gradable-item space joined to the scale table.
    pub fn annotated_scales(entity_type: &str, table: &str) -> Self {
        Source::Annotated {
            entity_type: entity_type.to_string(),
            table: Some(table.to_string()),
            kind: IdKind::Scale,
        }
    }
}

/// Annotate ids found in a final field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAnnotation {
    pub field: String,
    pub entity_type: String,
    pub kind: IdKind,
}

/// Annotate `files` rows attached to each emitted record.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAnnotation {
    pub component: String,
    pub filearea: String,
    /// Field of the record holding the file item id; None = any item id.
    pub item_field: Option<String>,
    /// Context owning the files.
    pub context: Param,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    finals: Vec<String>,
    children: Vec<Element>,
    source: Option<Source>,
    annotate_self: Option<String>,
    field_annotations: Vec<FieldAnnotation>,
    file_annotations: Vec<FileAnnotation>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            finals: Vec::new(),
            children: Vec::new(),
            source: None,
            annotate_self: None,
            field_annotations: Vec::new(),
            file_annotations: Vec::new(),
        }
    }

    /// Declare final fields (builder style).
    pub fn with_finals<I, S>(mut self, finals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for f in finals {
            let f = f.as_ref().to_string();
            if !self.finals.contains(&f) {
                self.finals.push(f);
            }
        }
        self
    }

    /// Builder form of set_source, for freshly created elements.
    pub fn with_source(mut self, source: Source) -> Result<Self, StructuralError> {
        self.set_source(source)?;
        Ok(self)
    }

    /// Attach a child; returns it for further nesting.
    pub fn add_child(&mut self, child: Element) -> Result<&mut Element, StructuralError> {
        if self.children.iter().any(|c| c.name == child.name) {
            return Err(StructuralError::DuplicateChild {
                parent: self.name.clone(),
                child: child.name,
            });
        }
        if self.finals.contains(&child.name) {
            return Err(StructuralError::ChildShadowsFinal {
                parent: self.name.clone(),
                child: child.name,
            });
        }
        self.children.push(child);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Builder form of add_child.
    pub fn with_child(mut self, child: Element) -> Result<Self, StructuralError> {
        self.add_child(child)?;
        Ok(self)
    }

    /// Set the data source; at most once per element.
    pub fn set_source(&mut self, source: Source) -> Result<(), StructuralError> {
        if self.source.is_some() {
            return Err(StructuralError::SourceAlreadySet {
                path: self.name.clone(),
            });
        }
        self.source = Some(source);
        Ok(())
    }

    /// Annotate each emitted record's own id under `entity_type`.
    pub fn annotate_self(mut self, entity_type: &str) -> Self {
        self.annotate_self = Some(entity_type.to_string());
        self
    }

    pub fn annotate_field(mut self, field: &str, entity_type: &str, kind: IdKind) -> Self {
        self.field_annotations.push(FieldAnnotation {
            field: field.to_string(),
            entity_type: entity_type.to_string(),
            kind,
        });
        self
    }

    pub fn annotate_files(
        mut self,
        component: &str,
        filearea: &str,
        item_field: Option<&str>,
        context: Param,
    ) -> Self {
        self.file_annotations.push(FileAnnotation {
            component: component.to_string(),
            filearea: filearea.to_string(),
            item_field: item_field.map(|s| s.to_string()),
            context,
        });
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    #[inline]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    #[inline]
    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn self_annotation(&self) -> Option<&str> {
        self.annotate_self.as_deref()
    }

    pub fn field_annotations(&self) -> &[FieldAnnotation] {
        &self.field_annotations
    }

    pub fn file_annotations(&self) -> &[FileAnnotation] {
        &self.file_annotations
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Pure structural wrapper: no source and no final fields.
    pub fn is_wrapper(&self) -> bool {
        self.source.is_none() && self.finals.is_empty()
    }

    /// Every path this tree can produce, rooted at `/<name>` (pre-order).
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let p = format!("{}/{}", prefix, self.name);
        out.push(p.clone());
        for c in &self.children {
            c.collect_paths(&p, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_child_rejects_duplicates_and_shadowing() {
        let mut course = Element::new("course").with_finals(["id", "fullname"]);
        course.add_child(Element::new("activities")).unwrap();
        assert!(matches!(
            course.add_child(Element::new("activities")),
            Err(StructuralError::DuplicateChild { .. })
        ));
        assert!(matches!(
            course.add_child(Element::new("fullname")),
            Err(StructuralError::ChildShadowsFinal { .. })
        ));
    }

    #[test]
    fn source_is_set_once() {
        let mut el = Element::new("x");
        el.set_source(Source::table("x")).unwrap();
        assert!(matches!(
            el.set_source(Source::table("y")),
            Err(StructuralError::SourceAlreadySet { .. })
        ));
    }

    #[test]
    fn paths_are_preorder() {
        let tree = Element::new("a")
            .with_child(
                Element::new("b")
                    .with_child(Element::new("c"))
                    .unwrap(),
            )
            .unwrap()
            .with_child(Element::new("d"))
            .unwrap();
        assert_eq!(tree.paths(), vec!["/a", "/a/b", "/a/b/c", "/a/d"]);
    }
}
