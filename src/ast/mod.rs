//! Parsed translation units as the indexer sees them.
//!
//! A [`TranslationUnit`] is a flat sequence of name occurrences, each already
//! resolved to a [`Binding`]. Qualified names keep their segments so a
//! visitor can walk each segment on its own.

pub mod binding;

pub use binding::{
    BaseSpecifier, Binding, BindingName, CompositeBinding, CompositeKey, MethodBinding,
    ProblemBinding, ProblemKind, UsingBinding,
};

use std::path::PathBuf;

/// Whether an occurrence declares/defines its binding or refers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameRole {
    Declaration,
    Reference,
    Unknown,
}

/// Syntactic position of a name inside its parent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameProperty {
    /// Name of a `class X { ... }` specifier with a body.
    CompositeTypeSpecifier,
    /// Name of an elaborated specifier such as `class X;` or `struct X* p`.
    ElaboratedTypeSpecifier,
    EnumSpecifier,
    Enumerator,
    NamespaceDefinition,
    Declarator,
    FunctionDeclarator,
    UsingDeclaration,
    BaseSpecifier,
    FriendSpecifier,
    TypeName,
    IdExpression,
    FieldReference,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileLocation {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

/// One name occurrence together with its resolved binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameNode {
    pub text: String,
    pub role: NameRole,
    pub property: NameProperty,
    pub location: Option<FileLocation>,
    pub binding: Binding,
}

impl NameNode {
    pub fn new(text: impl Into<String>, role: NameRole, property: NameProperty, binding: Binding) -> Self {
        Self {
            text: text.into(),
            role,
            property,
            location: None,
            binding,
        }
    }

    pub fn at(mut self, location: FileLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn resolve_binding(&self) -> &Binding {
        &self.binding
    }

    pub fn is_declaration(&self) -> bool {
        self.role == NameRole::Declaration
    }

    pub fn is_reference(&self) -> bool {
        self.role == NameRole::Reference
    }

    pub fn property_in_parent(&self) -> NameProperty {
        self.property
    }
}

/// A name as written: either a plain name or `a::b::c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstName {
    Simple(NameNode),
    Qualified(Vec<NameNode>),
}

/// A resolved header pulled in by the unit, in inclusion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub path: PathBuf,
    pub is_system: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationUnit {
    pub path: PathBuf,
    pub names: Vec<AstName>,
    pub includes: Vec<IncludeDirective>,
}

pub trait AstVisitor {
    fn visit_name(&mut self, name: &NameNode);
}

impl TranslationUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: NameNode) {
        self.names.push(AstName::Simple(name));
    }

    pub fn push_qualified(&mut self, segments: Vec<NameNode>) {
        match segments.len() {
            0 => {}
            1 => self.names.extend(segments.into_iter().map(AstName::Simple)),
            _ => self.names.push(AstName::Qualified(segments)),
        }
    }

    /// Walk every name; qualified names are never visited as a whole,
    /// only through their segments.
    pub fn accept<V: AstVisitor + ?Sized>(&self, visitor: &mut V) {
        for name in &self.names {
            match name {
                AstName::Simple(node) => visitor.visit_name(node),
                AstName::Qualified(segments) => {
                    for segment in segments {
                        visitor.visit_name(segment);
                    }
                }
            }
        }
    }

    pub fn name_count(&self) -> usize {
        self.names
            .iter()
            .map(|name| match name {
                AstName::Simple(_) => 1,
                AstName::Qualified(segments) => segments.len(),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QualifiedName;

    struct Collect(Vec<String>);

    impl AstVisitor for Collect {
        fn visit_name(&mut self, name: &NameNode) {
            self.0.push(name.text.clone());
        }
    }

    #[test]
    fn test_qualified_names_visit_segments() {
        let ns = Binding::Namespace(BindingName::qualified(QualifiedName::parse("ns")));
        let f = Binding::Function(BindingName::qualified(QualifiedName::parse("ns::f")));

        let mut unit = TranslationUnit::new("/w/a.cpp");
        unit.push(NameNode::new("x", NameRole::Reference, NameProperty::IdExpression, f.clone()));
        unit.push_qualified(vec![
            NameNode::new("ns", NameRole::Reference, NameProperty::Other, ns),
            NameNode::new("f", NameRole::Reference, NameProperty::IdExpression, f),
        ]);

        let mut collect = Collect(Vec::new());
        unit.accept(&mut collect);
        assert_eq!(collect.0, vec!["x", "ns", "f"]);
        assert_eq!(unit.name_count(), 3);
    }
}
