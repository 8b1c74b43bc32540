//! Semantic bindings that AST names resolve to.
//!
//! The set of binding kinds is closed; the visitor matches on it
//! exhaustively when classifying entries.

use crate::types::QualifiedName;

/// Name of a binding. `qualified` is `None` for bindings that have no
/// C++-aware qualification; callers fall back to the bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingName {
    pub name: String,
    pub qualified: Option<QualifiedName>,
}

impl BindingName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qualified: None,
        }
    }

    pub fn qualified(qualified: QualifiedName) -> Self {
        Self {
            name: qualified.last().unwrap_or_default().to_string(),
            qualified: Some(qualified),
        }
    }

    pub fn qualified_name(&self) -> QualifiedName {
        match &self.qualified {
            Some(qualified) if !qualified.is_empty() => qualified.clone(),
            _ => QualifiedName::simple(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeKey {
    Class,
    Struct,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSpecifier {
    pub binding: Binding,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeBinding {
    pub name: BindingName,
    pub key: CompositeKey,
    pub bases: Vec<BaseSpecifier>,
    pub friends: Vec<Binding>,
}

impl CompositeBinding {
    pub fn new(name: BindingName, key: CompositeKey) -> Self {
        Self {
            name,
            key,
            bases: Vec::new(),
            friends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBinding {
    pub name: BindingName,
    pub is_virtual: bool,
    pub is_destructor: bool,
    /// Compiler-generated member with no source occurrence of its own.
    pub is_implicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsingBinding {
    /// The name the using-declaration introduces, qualified in its own scope.
    pub name: BindingName,
    /// The bindings it aliases; may themselves be using-declarations.
    pub delegates: Vec<Binding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    NameNotFound,
    Ambiguous,
    InvalidBase,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemBinding {
    pub name: String,
    pub kind: ProblemKind,
    pub message: String,
}

impl ProblemBinding {
    pub fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ProblemKind::NameNotFound,
            message: format!("'{name}' could not be resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Composite(CompositeBinding),
    Enumeration(BindingName),
    Enumerator(BindingName),
    Typedef(BindingName),
    Namespace(BindingName),
    Field(BindingName),
    Variable(BindingName),
    Parameter(BindingName),
    Method(MethodBinding),
    Function(BindingName),
    UsingDeclaration(UsingBinding),
    Problem(ProblemBinding),
}

impl Binding {
    pub fn binding_name(&self) -> Option<&BindingName> {
        match self {
            Binding::Composite(c) => Some(&c.name),
            Binding::Enumeration(n)
            | Binding::Enumerator(n)
            | Binding::Typedef(n)
            | Binding::Field(n)
            | Binding::Variable(n)
            | Binding::Parameter(n)
            | Binding::Function(n)
            | Binding::Namespace(n) => Some(n),
            Binding::Method(m) => Some(&m.name),
            Binding::UsingDeclaration(u) => Some(&u.name),
            Binding::Problem(_) => None,
        }
    }

    /// Fully-qualified name, or the bare name when the binding has no qualification.
    pub fn qualified_name(&self) -> QualifiedName {
        match self {
            Binding::Problem(p) => QualifiedName::simple(&p.name),
            other => other
                .binding_name()
                .map(BindingName::qualified_name)
                .unwrap_or_default(),
        }
    }

    pub fn is_problem(&self) -> bool {
        matches!(self, Binding::Problem(_))
    }

    pub fn as_composite(&self) -> Option<&CompositeBinding> {
        match self {
            Binding::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// True for bindings that open a scope other names can live in.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            Binding::Composite(_) | Binding::Namespace(_) | Binding::Enumeration(_)
        )
    }
}
