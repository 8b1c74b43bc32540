//! AST-to-index visitor.
//!
//! Walks every name occurrence of a translation unit and turns the ones
//! that resolve to indexable bindings into [`IndexEntry`] facts, attributed
//! to the physical file each occurrence lives in. Unresolvable names are
//! collected as [`Problem`]s instead.

pub mod classify;
pub mod file_flags;

pub use file_flags::FileFlagResolver;

use crate::ast::{
    AstVisitor, Binding, CompositeBinding, FileLocation, NameNode, NameProperty, ProblemKind,
    TranslationUnit, UsingBinding,
};
use crate::storage::{Index, StorageError, StorageResult};
use crate::types::{EntryType, IndexEntry, IndexFlag, LimitTo, QualifiedName};

/// Using-declarations can alias each other; cycles are cut at this depth.
const MAX_USING_DEPTH: usize = 16;

/// A name that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub name: String,
    pub location: Option<FileLocation>,
    pub kind: ProblemKind,
    pub message: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisitStats {
    pub names: usize,
    pub entries: usize,
    /// Occurrences dropped because their header was already indexed.
    pub skipped: usize,
}

#[derive(Debug, Default, Clone)]
pub struct VisitReport {
    pub stats: VisitStats,
    pub problems: Vec<Problem>,
}

pub struct IndexVisitor<'i, 'r> {
    index: &'i mut Index,
    files: FileFlagResolver<'r>,
    report: VisitReport,
    error: Option<StorageError>,
}

impl<'i, 'r> IndexVisitor<'i, 'r> {
    pub fn new(index: &'i mut Index, files: FileFlagResolver<'r>) -> Self {
        Self {
            index,
            files,
            report: VisitReport::default(),
            error: None,
        }
    }

    /// The first storage failure aborts the visit and is returned here.
    pub fn finish(self) -> StorageResult<VisitReport> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }

    fn add(
        &mut self,
        name: QualifiedName,
        entry_type: EntryType,
        limit_to: LimitTo,
        related: Option<&QualifiedName>,
        flag: IndexFlag,
    ) {
        if self.error.is_some() || name.is_empty() {
            return;
        }
        let mut entry = IndexEntry::new(name, entry_type, limit_to);
        if let Some(related) = related {
            entry = entry.with_related(related.clone());
        }
        match self.index.add_ref(entry, flag) {
            Ok(()) => self.report.stats.entries += 1,
            Err(e) => self.error = Some(e),
        }
    }

    fn index_binding(&mut self, binding: &Binding, property: NameProperty, limit_to: LimitTo, flag: IndexFlag) {
        let Some(entry_type) = classify::entry_type(binding, property) else {
            return;
        };
        let qualified = binding.qualified_name();
        self.add(qualified.clone(), entry_type, limit_to, None, flag);

        if limit_to == LimitTo::Declaration && entry_type.has_hierarchy() {
            if let Binding::Composite(class) = binding {
                self.index_hierarchy(class, &qualified, flag);
            }
        }
    }

    /// DERIVED entries are keyed by the base, FRIEND entries by the friend;
    /// both point back at `class`.
    fn index_hierarchy(&mut self, class: &CompositeBinding, qualified: &QualifiedName, flag: IndexFlag) {
        for base in &class.bases {
            if base.binding.is_problem() {
                tracing::debug!(target: "indexer", "skipping unresolved base of {qualified}");
                continue;
            }
            self.add(
                base.binding.qualified_name(),
                EntryType::Derived,
                LimitTo::Declaration,
                Some(qualified),
                flag,
            );
        }
        for friend in &class.friends {
            if let Binding::Composite(friend) = friend {
                self.add(
                    friend.name.qualified_name(),
                    EntryType::Friend,
                    LimitTo::Declaration,
                    Some(qualified),
                    flag,
                );
            }
        }
    }

    /// A using-declaration yields a reference to each original and a fact
    /// of the original's kind under the introduced name.
    fn index_using(&mut self, using: &UsingBinding, limit_to: LimitTo, flag: IndexFlag, depth: usize) {
        if depth > MAX_USING_DEPTH {
            tracing::warn!(target: "indexer", "using-declaration chain too deep at {}", using.name.qualified_name());
            return;
        }
        let introduced = using.name.qualified_name();
        for delegate in &using.delegates {
            match delegate {
                Binding::UsingDeclaration(inner) => {
                    self.index_using(inner, LimitTo::Reference, flag, depth + 1);
                    for entry_type in leaf_kinds(inner, depth + 1) {
                        self.add(introduced.clone(), entry_type, limit_to, None, flag);
                    }
                }
                original => {
                    let Some(entry_type) = classify::entry_type(original, NameProperty::Other) else {
                        continue;
                    };
                    self.add(original.qualified_name(), entry_type, LimitTo::Reference, None, flag);
                    self.add(introduced.clone(), entry_type, limit_to, None, flag);
                }
            }
        }
    }
}

/// Entry kinds of the non-alias bindings at the end of a using chain.
fn leaf_kinds(using: &UsingBinding, depth: usize) -> Vec<EntryType> {
    if depth > MAX_USING_DEPTH {
        return Vec::new();
    }
    let mut kinds = Vec::new();
    for delegate in &using.delegates {
        match delegate {
            Binding::UsingDeclaration(inner) => kinds.extend(leaf_kinds(inner, depth + 1)),
            other => kinds.extend(classify::entry_type(other, NameProperty::Other)),
        }
    }
    kinds.sort();
    kinds.dedup();
    kinds
}

impl AstVisitor for IndexVisitor<'_, '_> {
    fn visit_name(&mut self, name: &NameNode) {
        if self.error.is_some() {
            return;
        }
        self.report.stats.names += 1;

        let binding = name.resolve_binding();
        if let Binding::Problem(problem) = binding {
            self.report.problems.push(Problem {
                name: name.text.clone(),
                location: name.location.clone(),
                kind: problem.kind,
                message: problem.message.clone(),
            });
            return;
        }

        let flag = match self.files.resolve(name.location.as_ref(), self.index) {
            Ok(Some(flag)) => flag,
            Ok(None) => {
                self.report.stats.skipped += 1;
                return;
            }
            Err(e) => {
                self.error = Some(e);
                return;
            }
        };

        let limit_to = classify::limit_to(name.role);
        match binding {
            Binding::UsingDeclaration(using) => self.index_using(using, limit_to, flag, 0),
            other => self.index_binding(other, name.property_in_parent(), limit_to, flag),
        }
    }
}

/// Index one translation unit through `files`, the session's attribution state.
pub fn index_translation_unit(
    unit: &TranslationUnit,
    index: &mut Index,
    files: FileFlagResolver<'_>,
) -> StorageResult<VisitReport> {
    let mut visitor = IndexVisitor::new(index, files);
    unit.accept(&mut visitor);
    visitor.finish()
}
