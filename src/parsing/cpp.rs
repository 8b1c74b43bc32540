//! C++ translation-unit provider on tree-sitter-cpp.
//!
//! A unit is the main file plus every quoted or bracketed include that can
//! be found on the search path, each header expanded once at its first
//! inclusion. Two passes run over it: the first collects declarations into
//! a symbol table, the second emits every name occurrence resolved against
//! that table. Resolution is lexical name lookup through enclosing scopes
//! and base classes; overloads, templates and argument-dependent lookup are
//! not modelled.

use std::collections::{HashMap, HashSet};
use std::mem::discriminant;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tree_sitter::{Node, Parser, Tree};

use super::{
    ParseError, ParseOutcome, ParseResult, SearchPathConfig, SourceBuffer, TranslationUnitParser,
};
use crate::ast::{
    BaseSpecifier, Binding, BindingName, CompositeBinding, CompositeKey, FileLocation,
    IncludeDirective, MethodBinding, NameNode, NameProperty, NameRole, ProblemBinding,
    ProblemKind, TranslationUnit, UsingBinding,
};
use crate::types::QualifiedName;
use crate::utils::normalize_path;

const MAX_BASE_DEPTH: usize = 16;

#[derive(Debug, Default, Clone, Copy)]
pub struct CppParser;

impl CppParser {
    pub fn new() -> Self {
        Self
    }
}

impl TranslationUnitParser for CppParser {
    fn parse(&self, source: &SourceBuffer, search: &SearchPathConfig) -> ParseResult<ParseOutcome> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| ParseError::LanguageInit {
                reason: e.to_string(),
            })?;

        let main_path = normalize_path(&source.path);
        let mut loader = Loader {
            parser,
            search,
            files: HashMap::new(),
            order: Vec::new(),
        };
        if !loader.load(main_path.clone(), Arc::clone(&source.contents), false) {
            return Err(ParseError::NoTree { path: main_path });
        }
        let Loader { files, order, .. } = loader;
        let Some(main) = files.get(&main_path) else {
            return Err(ParseError::NoTree { path: main_path });
        };

        let had_errors = files.values().any(|f| f.tree.root_node().has_error());

        let mut collect = Walker::new(&files, main, Pass::Collect, SymbolTable::default());
        collect.run();
        let mut table = collect.table;
        table.refresh_friends();

        let mut emit = Walker::new(&files, main, Pass::Emit, table);
        emit.run();

        let mut unit = emit.unit;
        unit.includes = order
            .iter()
            .filter_map(|path| files.get(path))
            .map(|file| IncludeDirective {
                path: file.path.clone(),
                is_system: file.is_system,
            })
            .collect();

        Ok(ParseOutcome {
            unit: Some(unit),
            had_errors,
        })
    }
}

struct SourceFile {
    path: PathBuf,
    source: Arc<str>,
    tree: Tree,
    /// Resolved include targets keyed by the start byte of their directive.
    includes: HashMap<usize, PathBuf>,
    is_system: bool,
}

struct Loader<'s> {
    parser: Parser,
    search: &'s SearchPathConfig,
    files: HashMap<PathBuf, SourceFile>,
    order: Vec<PathBuf>,
}

impl Loader<'_> {
    fn load(&mut self, path: PathBuf, source: Arc<str>, is_system: bool) -> bool {
        let Some(tree) = self.parser.parse(source.as_bytes(), None) else {
            tracing::debug!(target: "indexer", "no syntax tree for {}", path.display());
            return false;
        };

        let mut includes = HashMap::new();
        let mut pending = Vec::new();
        if self.search.follow_includes {
            let mut directives = Vec::new();
            collect_includes(tree.root_node(), &source, &mut directives);
            for (start, include_name, system) in directives {
                match self.resolve(&path, &include_name, system) {
                    Some(target) => {
                        includes.insert(start, target.clone());
                        pending.push((target, system));
                    }
                    None => {
                        tracing::debug!(target: "indexer", "unresolved include '{include_name}' in {}", path.display());
                    }
                }
            }
        }

        self.files.insert(
            path.clone(),
            SourceFile {
                path,
                source,
                tree,
                includes,
                is_system,
            },
        );

        for (target, system) in pending {
            if self.files.contains_key(&target) {
                continue;
            }
            match std::fs::read_to_string(&target) {
                Ok(text) => {
                    if self.load(target.clone(), text.into(), system) {
                        self.order.push(target);
                    }
                }
                Err(e) => {
                    tracing::debug!(target: "indexer", "cannot read header {}: {e}", target.display());
                }
            }
        }
        true
    }

    fn resolve(&self, from: &Path, include_name: &str, system: bool) -> Option<PathBuf> {
        let local = (!system)
            .then(|| from.parent().map(|dir| dir.join(include_name)))
            .flatten();
        local
            .into_iter()
            .chain(self.search.include_paths.iter().map(|dir| dir.join(include_name)))
            .map(|candidate| normalize_path(&candidate))
            .find(|candidate| candidate.is_file())
    }
}

fn collect_includes(node: Node<'_>, source: &str, out: &mut Vec<(usize, String, bool)>) {
    if node.kind() == "preproc_include" {
        if let Some(path) = node.child_by_field_name("path") {
            let text = path.utf8_text(source.as_bytes()).unwrap_or("");
            let system = path.kind() == "system_lib_string";
            let include_name = text.trim_matches(|c| c == '"' || c == '<' || c == '>');
            if !include_name.is_empty() && matches!(path.kind(), "string_literal" | "system_lib_string") {
                out.push((node.start_byte(), include_name.to_string(), system));
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_includes(child, source, out);
    }
}

/// Declarations visible in one translation unit, keyed by qualified name.
#[derive(Default)]
struct SymbolTable {
    symbols: HashMap<QualifiedName, Vec<Binding>>,
    /// Simple name to qualified names of fields and methods, for member access.
    members: HashMap<String, Vec<QualifiedName>>,
}

impl SymbolTable {
    fn declare(&mut self, binding: Binding) {
        let qname = binding.qualified_name();
        let slot = self.symbols.entry(qname.clone()).or_default();
        if slot.iter().any(|b| discriminant(b) == discriminant(&binding)) {
            return;
        }
        if matches!(binding, Binding::Field(_) | Binding::Method(_)) {
            if let Some(last) = qname.last() {
                self.members.entry(last.to_string()).or_default().push(qname.clone());
            }
        }
        slot.push(binding);
    }

    fn declare_composite(&mut self, qname: &QualifiedName, key: CompositeKey) {
        let slot = self.symbols.entry(qname.clone()).or_default();
        if !slot.iter().any(|b| matches!(b, Binding::Composite(_))) {
            let composite = CompositeBinding::new(BindingName::qualified(qname.clone()), key);
            slot.insert(0, Binding::Composite(composite));
        }
    }

    fn define_composite(&mut self, qname: &QualifiedName, key: CompositeKey, bases: Vec<BaseSpecifier>) {
        self.declare_composite(qname, key);
        if let Some(composite) = self.composite_mut(qname) {
            composite.key = key;
            composite.bases = bases;
        }
    }

    fn add_friend(&mut self, class: &QualifiedName, friend: Binding) {
        if let Some(composite) = self.composite_mut(class) {
            if !composite.friends.contains(&friend) {
                composite.friends.push(friend);
            }
        }
    }

    /// Friends recorded before their class was defined carry a stale key.
    fn refresh_friends(&mut self) {
        let classes: Vec<QualifiedName> = self
            .symbols
            .iter()
            .filter(|(_, slot)| {
                slot.iter()
                    .any(|b| matches!(b, Binding::Composite(c) if !c.friends.is_empty()))
            })
            .map(|(qname, _)| qname.clone())
            .collect();

        for class in classes {
            let Some(current) = self.composite(&class) else {
                continue;
            };
            let friends: Vec<Binding> = current
                .friends
                .iter()
                .map(|friend| match friend {
                    Binding::Composite(c) => self
                        .composite(&c.name.qualified_name())
                        .map(shallow)
                        .unwrap_or_else(|| friend.clone()),
                    other => other.clone(),
                })
                .collect();
            if let Some(composite) = self.composite_mut(&class) {
                composite.friends = friends;
            }
        }
    }

    fn all(&self, qname: &QualifiedName) -> &[Binding] {
        self.symbols
            .get(qname)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn get(&self, qname: &QualifiedName) -> Option<&Binding> {
        self.symbols.get(qname).and_then(|slot| slot.first())
    }

    fn get_like(&self, qname: &QualifiedName, like: &Binding) -> Option<&Binding> {
        self.all(qname)
            .iter()
            .find(|b| discriminant(*b) == discriminant(like))
    }

    fn composite(&self, qname: &QualifiedName) -> Option<&CompositeBinding> {
        self.all(qname).iter().find_map(Binding::as_composite)
    }

    fn composite_mut(&mut self, qname: &QualifiedName) -> Option<&mut CompositeBinding> {
        self.symbols
            .get_mut(qname)?
            .iter_mut()
            .find_map(|b| match b {
                Binding::Composite(c) => Some(c),
                _ => None,
            })
    }

    fn is_class(&self, qname: &QualifiedName) -> bool {
        self.composite(qname).is_some()
    }

    /// Look `name` up from `scope` outward, including inherited members.
    fn lookup(&self, scope: &QualifiedName, name: &str) -> Option<&Binding> {
        (0..=scope.len()).rev().find_map(|len| {
            let owner = scope.prefix(len);
            self.get(&owner.child(name))
                .or_else(|| self.lookup_inherited(&owner, name, 0))
        })
    }

    fn lookup_inherited(&self, class: &QualifiedName, name: &str, depth: usize) -> Option<&Binding> {
        if depth > MAX_BASE_DEPTH {
            return None;
        }
        let composite = self.composite(class)?;
        composite
            .bases
            .iter()
            .filter(|base| !base.binding.is_problem())
            .find_map(|base| {
                let base_name = base.binding.qualified_name();
                self.get(&base_name.child(name))
                    .or_else(|| self.lookup_inherited(&base_name, name, depth + 1))
            })
    }

    fn lookup_member(&self, scope: &QualifiedName, name: &str) -> Option<&Binding> {
        if let Some(found) = self.lookup(scope, name) {
            if matches!(found, Binding::Field(_) | Binding::Method(_)) {
                return Some(found);
            }
        }
        self.members
            .get(name)?
            .iter()
            .find_map(|qname| self.get(qname))
    }

    /// Resolve `a::b::c` segment by segment; a failed segment fails the rest.
    fn resolve_path(&self, scope: &QualifiedName, segments: &[&str], global: bool) -> Vec<Option<Binding>> {
        let mut resolved = Vec::with_capacity(segments.len());
        let mut current: Option<QualifiedName> = None;
        for (i, segment) in segments.iter().enumerate() {
            let found = if i == 0 {
                if global {
                    self.get(&QualifiedName::simple(segment))
                } else {
                    self.lookup(scope, segment)
                }
            } else {
                current.as_ref().and_then(|owner| {
                    self.get(&owner.child(segment))
                        .or_else(|| self.lookup_inherited(owner, segment, 0))
                })
            };
            current = found.map(Binding::qualified_name);
            resolved.push(found.cloned());
        }
        resolved
    }
}

fn shallow(composite: &CompositeBinding) -> Binding {
    Binding::Composite(CompositeBinding::new(composite.name.clone(), composite.key))
}

fn problem(name: &str) -> Binding {
    Binding::Problem(ProblemBinding::not_found(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Collect,
    Emit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Namespace,
    Class,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    name: QualifiedName,
    /// Innermost enclosing namespace.
    namespace: QualifiedName,
}

/// A declarator reduced to its declared name.
struct Declarator<'t> {
    name: Node<'t>,
    function: Option<Node<'t>>,
    values: Vec<Node<'t>>,
}

fn unwrap_declarator(node: Node<'_>) -> Option<Declarator<'_>> {
    let mut current = node;
    let mut function = None;
    let mut values = Vec::new();
    loop {
        match current.kind() {
            "function_declarator" => {
                function.get_or_insert(current);
                current = current.child_by_field_name("declarator")?;
            }
            "init_declarator" => {
                values.extend(current.child_by_field_name("value"));
                current = current.child_by_field_name("declarator")?;
            }
            "array_declarator" => {
                values.extend(current.child_by_field_name("size"));
                current = current.child_by_field_name("declarator")?;
            }
            "pointer_declarator" => {
                current = current.child_by_field_name("declarator")?;
            }
            "parenthesized_declarator" => {
                // `(*fp)(int)` declares a pointer, not a function
                function = None;
                current = current.named_child(0)?;
            }
            "reference_declarator" | "attributed_declarator" | "variadic_declarator" => {
                let last = u32::try_from(current.named_child_count().checked_sub(1)?).ok()?;
                current = current.named_child(last)?;
            }
            "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
            | "operator_name" | "type_identifier" | "template_function" => break,
            _ => return None,
        }
    }
    Some(Declarator {
        name: current,
        function,
        values,
    })
}

/// Split a possibly qualified or templated name into its segment nodes.
/// Template argument lists are returned separately so they can be walked.
fn split_name<'t>(node: Node<'t>) -> (Vec<Node<'t>>, Vec<Node<'t>>, bool) {
    let mut segments = Vec::new();
    let mut arguments = Vec::new();
    let global = node.kind() == "qualified_identifier" && node.child_by_field_name("scope").is_none();
    push_segments(node, &mut segments, &mut arguments);
    (segments, arguments, global)
}

fn push_segments<'t>(node: Node<'t>, segments: &mut Vec<Node<'t>>, arguments: &mut Vec<Node<'t>>) {
    match node.kind() {
        "qualified_identifier" => {
            if let Some(scope) = node.child_by_field_name("scope") {
                push_segments(scope, segments, arguments);
            }
            if let Some(name) = node.child_by_field_name("name") {
                push_segments(name, segments, arguments);
            }
        }
        "template_type" | "template_function" | "template_method" => {
            if let Some(name) = node.child_by_field_name("name") {
                push_segments(name, segments, arguments);
            }
            arguments.extend(node.child_by_field_name("arguments"));
        }
        "nested_namespace_specifier" => {
            let mut cursor = node.walk();
            let children: Vec<_> = node.named_children(&mut cursor).collect();
            for child in children {
                push_segments(child, segments, arguments);
            }
        }
        "dependent_name" | "dependent_type" | "decltype" => arguments.push(node),
        _ => segments.push(node),
    }
}

fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

fn composite_key(kind: &str) -> Option<CompositeKey> {
    match kind {
        "class_specifier" => Some(CompositeKey::Class),
        "struct_specifier" => Some(CompositeKey::Struct),
        "union_specifier" => Some(CompositeKey::Union),
        _ => None,
    }
}

/// `class X;` or `enum class E : int;` standing alone as a declaration.
fn declares_only_type(node: Node<'_>) -> bool {
    node.next_sibling().is_some_and(|next| next.kind() == ";")
}

fn is_type_field(node: Node<'_>) -> bool {
    node.parent()
        .and_then(|parent| parent.child_by_field_name("type"))
        .is_some_and(|ty| ty.id() == node.id())
}

struct Walker<'a> {
    files: &'a HashMap<PathBuf, SourceFile>,
    file: &'a SourceFile,
    pass: Pass,
    table: SymbolTable,
    scope: Scope,
    locals: Vec<HashMap<String, Binding>>,
    template_params: Vec<HashSet<String>>,
    expanded: HashSet<PathBuf>,
    unit: TranslationUnit,
}

impl<'a> Walker<'a> {
    fn new(
        files: &'a HashMap<PathBuf, SourceFile>,
        main: &'a SourceFile,
        pass: Pass,
        table: SymbolTable,
    ) -> Self {
        Self {
            files,
            file: main,
            pass,
            table,
            scope: Scope::default(),
            locals: Vec::new(),
            template_params: Vec::new(),
            expanded: HashSet::new(),
            unit: TranslationUnit::new(main.path.clone()),
        }
    }

    fn run(&mut self) {
        let main = self.file;
        self.expanded.insert(main.path.clone());
        self.walk_children(main.tree.root_node());
    }

    fn emitting(&self) -> bool {
        self.pass == Pass::Emit
    }

    fn text(&self, node: Node<'a>) -> &'a str {
        let file: &'a SourceFile = self.file;
        node.utf8_text(file.source.as_bytes()).unwrap_or("")
    }

    fn location(&self, node: Node<'a>) -> FileLocation {
        let position = node.start_position();
        FileLocation {
            path: self.file.path.clone(),
            line: position.row as u32 + 1,
            column: position.column as u32 + 1,
        }
    }

    fn emit(&mut self, node: Node<'a>, role: NameRole, property: NameProperty, binding: Binding) {
        let name = NameNode::new(self.text(node), role, property, binding).at(self.location(node));
        self.unit.push(name);
    }

    /// Emit a segmented name; only the last segment carries `role` and `property`.
    fn emit_path(
        &mut self,
        segments: &[Node<'a>],
        bindings: Vec<Option<Binding>>,
        role: NameRole,
        property: NameProperty,
    ) {
        let last = segments.len().saturating_sub(1);
        let names = segments
            .iter()
            .zip(bindings)
            .enumerate()
            .map(|(i, (node, binding))| {
                let text = self.text(*node);
                let binding = binding.unwrap_or_else(|| problem(text));
                let (role, property) = if i == last {
                    (role, property)
                } else {
                    (NameRole::Reference, NameProperty::Other)
                };
                NameNode::new(text, role, property, binding).at(self.location(*node))
            })
            .collect();
        self.unit.push_qualified(names);
    }

    fn with_scope<R>(&mut self, scope: Scope, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = saved;
        result
    }

    fn child_scope(&self, name: QualifiedName, kind: ScopeKind) -> Scope {
        let namespace = if kind == ScopeKind::Namespace {
            name.clone()
        } else {
            self.scope.namespace.clone()
        };
        Scope { name, namespace }
    }

    fn namespace_scope(&self) -> Scope {
        self.child_scope(self.scope.namespace.clone(), ScopeKind::Namespace)
    }

    fn is_template_param(&self, name: &str) -> bool {
        self.template_params.iter().any(|params| params.contains(name))
    }

    fn resolve_simple(&self, name: &str) -> Option<Binding> {
        self.locals
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.table.lookup(&self.scope.name, name))
            .cloned()
    }

    fn resolve_segments(&self, texts: &[&str], global: bool) -> Vec<Option<Binding>> {
        match texts {
            [single] if !global => vec![self.resolve_simple(single)],
            _ => self.table.resolve_path(&self.scope.name, texts, global),
        }
    }

    /// Qualified owner named by a declarator's scope segments.
    fn owner_of(&self, prefix: &[&str], resolved: &[Option<Binding>], global: bool) -> QualifiedName {
        if let Some(Some(binding)) = resolved.last() {
            return binding.qualified_name();
        }
        let base = if global {
            QualifiedName::default()
        } else {
            self.scope.name.clone()
        };
        prefix.iter().fold(base, |owner, segment| owner.child(segment))
    }

    fn walk_children(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.walk_node(child);
        }
    }

    fn walk_except(&mut self, node: Node<'a>, skipped: &[&str]) {
        let mut cursor = node.walk();
        let mut children = Vec::new();
        if cursor.goto_first_child() {
            loop {
                let child = cursor.node();
                let skip = cursor.field_name().is_some_and(|field| skipped.contains(&field));
                if child.is_named() && !skip {
                    children.push(child);
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }
        for child in children {
            self.walk_node(child);
        }
    }

    fn walk_field(&mut self, node: Node<'a>, field: &str) {
        if let Some(child) = node.child_by_field_name(field) {
            self.walk_node(child);
        }
    }

    fn walk_node(&mut self, node: Node<'a>) {
        match node.kind() {
            "preproc_include" => self.include(node),
            "preproc_def" | "preproc_function_def" | "preproc_call" | "comment"
            | "string_literal" | "raw_string_literal" | "char_literal" | "number_literal"
            | "concatenated_string" | "system_lib_string" | "attribute_specifier"
            | "attribute_declaration" | "statement_identifier" | "namespace_alias_definition"
            | "destructor_name" | "operator_name" => {}
            "preproc_ifdef" | "preproc_if" | "preproc_elif" | "preproc_elifdef" => {
                self.walk_except(node, &["name", "condition"])
            }
            "namespace_definition" => self.namespace_definition(node),
            "class_specifier" => self.composite(node, CompositeKey::Class),
            "struct_specifier" => self.composite(node, CompositeKey::Struct),
            "union_specifier" => self.composite(node, CompositeKey::Union),
            "enum_specifier" => self.enumeration(node),
            "function_definition" => self.function_definition(node),
            "declaration" | "field_declaration" => self.declaration(node),
            "type_definition" => self.type_definition(node),
            "alias_declaration" => self.alias_declaration(node),
            "using_declaration" => self.using_declaration(node),
            "friend_declaration" => self.friend_declaration(node),
            "template_declaration" => self.template_declaration(node),
            "parameter_declaration"
            | "optional_parameter_declaration"
            | "variadic_parameter_declaration" => self.parameter(node, !self.locals.is_empty()),
            "compound_statement" | "lambda_expression" => {
                self.locals.push(HashMap::new());
                self.walk_children(node);
                self.locals.pop();
            }
            "for_range_loop" => self.for_range_loop(node),
            "field_expression" => self.field_expression(node),
            "qualified_identifier" => {
                let property = if is_type_field(node) {
                    NameProperty::TypeName
                } else {
                    NameProperty::IdExpression
                };
                self.reference_path(node, property)
            }
            "template_type" => self.reference_path(node, NameProperty::TypeName),
            "template_function" | "template_method" => {
                self.reference_path(node, NameProperty::IdExpression)
            }
            "identifier" => self.reference(node, NameProperty::IdExpression),
            "type_identifier" => self.reference(node, NameProperty::TypeName),
            "namespace_identifier" => self.reference(node, NameProperty::Other),
            "field_identifier" => self.member_reference(node),
            _ => self.walk_children(node),
        }
    }

    fn include(&mut self, node: Node<'a>) {
        let files = self.files;
        let file = self.file;
        let Some(target) = file.includes.get(&node.start_byte()) else {
            return;
        };
        if !self.expanded.insert(target.clone()) {
            return;
        }
        let Some(header) = files.get(target) else {
            return;
        };
        self.file = header;
        self.walk_children(header.tree.root_node());
        self.file = file;
    }

    fn namespace_definition(&mut self, node: Node<'a>) {
        let mut qname = self.scope.name.clone();
        if let Some(name) = node.child_by_field_name("name") {
            // every segment of `namespace a::b` defines a namespace
            let (segments, _, _) = split_name(name);
            for segment in segments {
                qname = qname.child(self.text(segment));
                let binding = Binding::Namespace(BindingName::qualified(qname.clone()));
                match self.pass {
                    Pass::Collect => self.table.declare(binding),
                    Pass::Emit => self.emit(
                        segment,
                        NameRole::Declaration,
                        NameProperty::NamespaceDefinition,
                        binding,
                    ),
                }
            }
        }

        let scope = self.child_scope(qname, ScopeKind::Namespace);
        if let Some(body) = node.child_by_field_name("body") {
            self.with_scope(scope, |w| w.walk_children(body));
        }
    }

    fn composite(&mut self, node: Node<'a>, key: CompositeKey) {
        let body = node.child_by_field_name("body");
        let Some(name) = node.child_by_field_name("name") else {
            // anonymous members live in the enclosing scope
            if let Some(body) = body {
                self.walk_children(body);
            }
            return;
        };

        let (segments, arguments, global) = split_name(name);
        let Some((&last, prefix)) = segments.split_last() else {
            return;
        };
        let text = self.text(last);
        let prefix_texts: Vec<&str> = prefix.iter().map(|n| self.text(*n)).collect();
        let mut bindings = if prefix.is_empty() {
            Vec::new()
        } else {
            self.table.resolve_path(&self.scope.name, &prefix_texts, global)
        };

        let defining = body.is_some();
        let forward = !defining && declares_only_type(node);
        let qname = if !prefix.is_empty() {
            self.owner_of(&prefix_texts, &bindings, global).child(text)
        } else if defining || forward {
            self.scope.name.child(text)
        } else {
            match self.table.lookup(&self.scope.name, text) {
                Some(Binding::Composite(found)) => found.name.qualified_name(),
                _ => self.scope.namespace.child(text),
            }
        };

        match self.pass {
            Pass::Collect => {
                if defining {
                    let bases = self.base_specifiers(node);
                    self.table.define_composite(&qname, key, bases);
                } else {
                    self.table.declare_composite(&qname, key);
                }
            }
            Pass::Emit => {
                let binding = self
                    .table
                    .composite(&qname)
                    .cloned()
                    .unwrap_or_else(|| CompositeBinding::new(BindingName::qualified(qname.clone()), key));
                let role = if defining || forward {
                    NameRole::Declaration
                } else {
                    NameRole::Reference
                };
                let property = if defining {
                    NameProperty::CompositeTypeSpecifier
                } else {
                    NameProperty::ElaboratedTypeSpecifier
                };
                bindings.push(Some(Binding::Composite(binding)));
                self.emit_path(&segments, bindings, role, property);
                for argument in arguments {
                    self.walk_node(argument);
                }
                self.emit_bases(node);
            }
        }

        if let Some(body) = body {
            let scope = self.child_scope(qname, ScopeKind::Class);
            self.with_scope(scope, |w| w.walk_children(body));
        }
    }

    fn base_names(node: Node<'a>) -> Vec<(Node<'a>, bool)> {
        let mut cursor = node.walk();
        let Some(clause) = node
            .named_children(&mut cursor)
            .find(|child| child.kind() == "base_class_clause")
        else {
            return Vec::new();
        };

        let mut names = Vec::new();
        let mut is_virtual = false;
        let mut cursor = clause.walk();
        for child in clause.children(&mut cursor) {
            match child.kind() {
                "virtual" => is_virtual = true,
                "type_identifier" | "qualified_identifier" | "template_type" => {
                    names.push((child, is_virtual));
                    is_virtual = false;
                }
                "," => is_virtual = false,
                _ => {}
            }
        }
        names
    }

    fn resolve_base(&self, name: Node<'a>) -> (Vec<Node<'a>>, Vec<Node<'a>>, Vec<Option<Binding>>) {
        let (segments, arguments, global) = split_name(name);
        let texts: Vec<&str> = segments.iter().map(|n| self.text(*n)).collect();
        let bindings = self.table.resolve_path(&self.scope.name, &texts, global);
        (segments, arguments, bindings)
    }

    fn base_specifiers(&self, node: Node<'a>) -> Vec<BaseSpecifier> {
        Self::base_names(node)
            .into_iter()
            .map(|(name, is_virtual)| {
                let (_, _, bindings) = self.resolve_base(name);
                let text = self.text(name);
                let binding = match bindings.into_iter().last().flatten() {
                    Some(Binding::Composite(c)) => shallow(&c),
                    Some(typedef @ Binding::Typedef(_)) => typedef,
                    Some(_) => Binding::Problem(ProblemBinding {
                        name: text.to_string(),
                        kind: ProblemKind::InvalidBase,
                        message: format!("'{text}' is not a class"),
                    }),
                    None => problem(text),
                };
                BaseSpecifier { binding, is_virtual }
            })
            .collect()
    }

    fn emit_bases(&mut self, node: Node<'a>) {
        for (name, _) in Self::base_names(node) {
            let (segments, arguments, bindings) = self.resolve_base(name);
            self.emit_path(&segments, bindings, NameRole::Reference, NameProperty::BaseSpecifier);
            for argument in arguments {
                self.walk_node(argument);
            }
        }
    }

    fn friend_declaration(&mut self, node: Node<'a>) {
        let class = self.scope.name.clone();
        let mut key = CompositeKey::Class;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "struct" => key = CompositeKey::Struct,
                "union" => key = CompositeKey::Union,
                _ => {}
            }
        }
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();

        for child in children {
            match child.kind() {
                "type_identifier" | "qualified_identifier" | "template_type" => {
                    self.friend_class(child, key, &class)
                }
                "declaration" => {
                    let elaborated = child
                        .child_by_field_name("type")
                        .filter(|ty| composite_key(ty.kind()).is_some())
                        .filter(|ty| ty.child_by_field_name("body").is_none())
                        .filter(|_| child.child_by_field_name("declarator").is_none());
                    match elaborated {
                        Some(ty) => {
                            let key = composite_key(ty.kind()).unwrap_or(key);
                            if let Some(name) = ty.child_by_field_name("name") {
                                self.friend_class(name, key, &class);
                            }
                        }
                        None => {
                            // friend functions belong to the enclosing namespace
                            let scope = self.namespace_scope();
                            self.with_scope(scope, |w| w.declaration(child));
                        }
                    }
                }
                "function_definition" => {
                    let scope = self.namespace_scope();
                    self.with_scope(scope, |w| w.function_definition(child));
                }
                _ => self.walk_node(child),
            }
        }
    }

    fn friend_class(&mut self, name: Node<'a>, key: CompositeKey, class: &QualifiedName) {
        let (segments, arguments, global) = split_name(name);
        let Some((&last, prefix)) = segments.split_last() else {
            return;
        };
        let texts: Vec<&str> = segments.iter().map(|n| self.text(*n)).collect();
        let mut bindings = self.table.resolve_path(&self.scope.name, &texts, global);
        let qname = match bindings.last() {
            Some(Some(Binding::Composite(found))) => found.name.qualified_name(),
            _ if prefix.is_empty() => self.scope.namespace.child(self.text(last)),
            _ => {
                let prefix_texts = &texts[..prefix.len()];
                self.owner_of(prefix_texts, &bindings[..prefix.len()], global)
                    .child(self.text(last))
            }
        };

        match self.pass {
            Pass::Collect => {
                self.table.declare_composite(&qname, key);
                if let Some(friend) = self.table.composite(&qname).map(shallow) {
                    self.table.add_friend(class, friend);
                }
            }
            Pass::Emit => {
                let binding = self
                    .table
                    .composite(&qname)
                    .cloned()
                    .map(Binding::Composite)
                    .unwrap_or_else(|| problem(self.text(last)));
                bindings.pop();
                bindings.push(Some(binding));
                self.emit_path(
                    &segments,
                    bindings,
                    NameRole::Declaration,
                    NameProperty::ElaboratedTypeSpecifier,
                );
                for argument in arguments {
                    self.walk_node(argument);
                }
            }
        }
    }

    fn enumeration(&mut self, node: Node<'a>) {
        let scoped = has_child_kind(node, "class") || has_child_kind(node, "struct");
        let body = node.child_by_field_name("body");
        let mut enumerator_scope = self.scope.name.clone();

        if let Some(name) = node.child_by_field_name("name") {
            let text = self.text(name);
            let declaring = body.is_some() || declares_only_type(node);
            let qname = if declaring {
                self.scope.name.child(text)
            } else {
                match self.table.lookup(&self.scope.name, text) {
                    Some(found @ Binding::Enumeration(_)) => found.qualified_name(),
                    _ => self.scope.name.child(text),
                }
            };
            let binding = Binding::Enumeration(BindingName::qualified(qname.clone()));
            match self.pass {
                Pass::Collect => {
                    if declaring {
                        self.table.declare(binding);
                    }
                }
                Pass::Emit => {
                    let role = if declaring {
                        NameRole::Declaration
                    } else {
                        NameRole::Reference
                    };
                    self.emit(name, role, NameProperty::EnumSpecifier, binding);
                }
            }
            if scoped {
                enumerator_scope = qname;
            }
        }

        if self.emitting() {
            self.walk_field(node, "base");
        }

        let Some(body) = body else {
            return;
        };
        let mut cursor = body.walk();
        let enumerators: Vec<Node<'a>> = body
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "enumerator")
            .collect();
        for enumerator in enumerators {
            let Some(name) = enumerator.child_by_field_name("name") else {
                continue;
            };
            let qname = enumerator_scope.child(self.text(name));
            let binding = Binding::Enumerator(BindingName::qualified(qname));
            match self.pass {
                Pass::Collect => self.table.declare(binding),
                Pass::Emit => {
                    self.emit(name, NameRole::Declaration, NameProperty::Enumerator, binding);
                    self.walk_field(enumerator, "value");
                }
            }
        }
    }

    /// Declare a function, method, field or variable at namespace or class
    /// scope and return its qualified name.
    fn declare_member(
        &mut self,
        name: Node<'a>,
        function: bool,
        is_virtual: bool,
        property: NameProperty,
    ) -> Option<QualifiedName> {
        let (segments, arguments, global) = split_name(name);
        let (&last, prefix) = segments.split_last()?;
        let text = self.text(last);
        let prefix_texts: Vec<&str> = prefix.iter().map(|n| self.text(*n)).collect();
        let mut bindings = if prefix.is_empty() {
            Vec::new()
        } else {
            self.table.resolve_path(&self.scope.name, &prefix_texts, global)
        };
        let owner = if prefix.is_empty() && !global {
            self.scope.name.clone()
        } else {
            self.owner_of(&prefix_texts, &bindings, global)
        };
        let in_class = self.table.is_class(&owner);
        let qname = owner.child(text);
        let declared = BindingName::qualified(qname.clone());

        let binding = match (function, in_class) {
            (true, true) => Binding::Method(MethodBinding {
                name: declared,
                is_virtual,
                is_destructor: text.starts_with('~'),
                is_implicit: false,
            }),
            (true, false) => Binding::Function(declared),
            (false, true) => Binding::Field(declared),
            (false, false) => Binding::Variable(declared),
        };

        match self.pass {
            Pass::Collect => self.table.declare(binding),
            Pass::Emit => {
                let binding = self.table.get_like(&qname, &binding).cloned().unwrap_or(binding);
                bindings.push(Some(binding));
                self.emit_path(&segments, bindings, NameRole::Declaration, property);
                for argument in arguments {
                    self.walk_node(argument);
                }
            }
        }
        Some(qname)
    }

    fn declare_local(&mut self, name: Node<'a>, binding: Binding) {
        if !self.emitting() {
            return;
        }
        let text = self.text(name);
        if let Some(frame) = self.locals.last_mut() {
            frame.insert(text.to_string(), binding.clone());
        }
        self.emit(name, NameRole::Declaration, NameProperty::Declarator, binding);
    }

    fn declare(&mut self, declarator: Declarator<'a>, is_virtual: bool) {
        let Declarator {
            name,
            function,
            values,
        } = declarator;

        if !self.locals.is_empty() && function.is_none() {
            let binding = Binding::Variable(BindingName::new(self.text(name)));
            self.declare_local(name, binding);
        } else {
            let property = if function.is_some() {
                NameProperty::FunctionDeclarator
            } else {
                NameProperty::Declarator
            };
            self.declare_member(name, function.is_some(), is_virtual, property);
        }

        if self.emitting() {
            if let Some(function) = function {
                self.walk_field(function, "parameters");
            }
            for value in values {
                self.walk_node(value);
            }
        }
    }

    fn declaration(&mut self, node: Node<'a>) {
        let is_virtual = has_child_kind(node, "virtual");
        self.walk_field(node, "type");

        let mut cursor = node.walk();
        let declarators: Vec<Node<'a>> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            if let Some(declarator) = unwrap_declarator(declarator) {
                self.declare(declarator, is_virtual);
            }
        }

        if self.emitting() {
            self.walk_field(node, "default_value");
        }
    }

    fn function_definition(&mut self, node: Node<'a>) {
        let is_virtual = has_child_kind(node, "virtual");
        self.walk_field(node, "type");

        let Some(declarator) = node
            .child_by_field_name("declarator")
            .and_then(unwrap_declarator)
        else {
            return;
        };
        let Some(qname) = self.declare_member(
            declarator.name,
            true,
            is_virtual,
            NameProperty::FunctionDeclarator,
        ) else {
            return;
        };
        if !self.emitting() {
            return;
        }

        let owner = qname.parent().unwrap_or_default();
        let scope = Scope {
            name: owner,
            namespace: self.scope.namespace.clone(),
        };
        self.locals.push(HashMap::new());
        self.with_scope(scope, |w| {
            if let Some(function) = declarator.function {
                w.walk_field(function, "parameters");
            }
            let mut cursor = node.walk();
            let initializers: Vec<Node<'a>> = node
                .named_children(&mut cursor)
                .filter(|child| child.kind() == "field_initializer_list")
                .collect();
            for list in initializers {
                w.walk_node(list);
            }
            w.walk_field(node, "body");
        });
        self.locals.pop();
    }

    fn parameter(&mut self, node: Node<'a>, declare: bool) {
        self.walk_field(node, "type");
        if declare {
            if let Some(declarator) = node
                .child_by_field_name("declarator")
                .and_then(unwrap_declarator)
            {
                let binding = Binding::Parameter(BindingName::new(self.text(declarator.name)));
                self.declare_local(declarator.name, binding);
            }
        }
        if self.emitting() {
            self.walk_field(node, "default_value");
        }
    }

    fn declare_typedef(&mut self, name: Node<'a>) {
        let qname = self.scope.name.child(self.text(name));
        let binding = Binding::Typedef(BindingName::qualified(qname.clone()));
        match self.pass {
            Pass::Collect => self.table.declare(binding),
            Pass::Emit => {
                let binding = self.table.get_like(&qname, &binding).cloned().unwrap_or(binding);
                self.emit(name, NameRole::Declaration, NameProperty::Declarator, binding);
            }
        }
    }

    fn type_definition(&mut self, node: Node<'a>) {
        self.walk_field(node, "type");
        let mut cursor = node.walk();
        let declarators: Vec<Node<'a>> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            if let Some(declarator) = unwrap_declarator(declarator) {
                self.declare_typedef(declarator.name);
            }
        }
    }

    fn alias_declaration(&mut self, node: Node<'a>) {
        if let Some(name) = node.child_by_field_name("name") {
            self.declare_typedef(name);
        }
        if self.emitting() {
            self.walk_field(node, "type");
        }
    }

    fn using_declaration(&mut self, node: Node<'a>) {
        let is_directive = has_child_kind(node, "namespace");
        let mut cursor = node.walk();
        let Some(target) = node
            .named_children(&mut cursor)
            .find(|child| matches!(child.kind(), "identifier" | "qualified_identifier" | "type_identifier"))
        else {
            return;
        };

        let (segments, _, global) = split_name(target);
        let Some(&last) = segments.last() else {
            return;
        };
        let texts: Vec<&str> = segments.iter().map(|n| self.text(*n)).collect();
        let mut resolved = self.resolve_segments(&texts, global);

        if is_directive {
            if self.emitting() {
                self.emit_path(&segments, resolved, NameRole::Reference, NameProperty::Other);
            }
            return;
        }

        let introduced = self.scope.name.child(self.text(last));
        match self.pass {
            Pass::Collect => {
                let Some(Some(original)) = resolved.last() else {
                    return;
                };
                let delegates: Vec<Binding> = self
                    .table
                    .all(&original.qualified_name())
                    .iter()
                    .filter(|b| {
                        !matches!(b, Binding::UsingDeclaration(u) if u.name.qualified_name() == introduced)
                    })
                    .map(|b| match b {
                        Binding::Composite(c) => shallow(c),
                        other => other.clone(),
                    })
                    .collect();
                if !delegates.is_empty() {
                    self.table.declare(Binding::UsingDeclaration(UsingBinding {
                        name: BindingName::qualified(introduced),
                        delegates,
                    }));
                }
            }
            Pass::Emit => {
                let binding = self
                    .table
                    .all(&introduced)
                    .iter()
                    .find(|b| matches!(b, Binding::UsingDeclaration(_)))
                    .cloned();
                resolved.pop();
                resolved.push(binding);
                self.emit_path(
                    &segments,
                    resolved,
                    NameRole::Declaration,
                    NameProperty::UsingDeclaration,
                );
            }
        }
    }

    fn template_declaration(&mut self, node: Node<'a>) {
        let mut params = HashSet::new();
        if let Some(list) = node.child_by_field_name("parameters") {
            let mut cursor = list.walk();
            for param in list.named_children(&mut cursor) {
                let name = match param.kind() {
                    "parameter_declaration" | "optional_parameter_declaration" => param
                        .child_by_field_name("declarator")
                        .and_then(unwrap_declarator)
                        .map(|d| d.name),
                    _ => param.child_by_field_name("name").or_else(|| {
                        let mut inner = param.walk();
                        let found = param
                            .named_children(&mut inner)
                            .find(|child| child.kind() == "type_identifier");
                        found
                    }),
                };
                if let Some(name) = name {
                    params.insert(self.text(name).to_string());
                }
            }
        }

        self.template_params.push(params);
        self.walk_except(node, &["parameters"]);
        self.template_params.pop();
    }

    fn for_range_loop(&mut self, node: Node<'a>) {
        self.locals.push(HashMap::new());
        self.walk_field(node, "type");
        if let Some(declarator) = node
            .child_by_field_name("declarator")
            .and_then(unwrap_declarator)
        {
            self.declare(declarator, false);
        }
        self.walk_field(node, "right");
        self.walk_field(node, "body");
        self.locals.pop();
    }

    fn field_expression(&mut self, node: Node<'a>) {
        self.walk_field(node, "argument");
        if let Some(field) = node.child_by_field_name("field") {
            match field.kind() {
                "field_identifier" => self.member_reference(field),
                "qualified_identifier" | "template_method" => {
                    self.reference_path(field, NameProperty::FieldReference)
                }
                _ => {}
            }
        }
    }

    fn reference(&mut self, node: Node<'a>, property: NameProperty) {
        if !self.emitting() {
            return;
        }
        let text = self.text(node);
        if text.is_empty() || self.is_template_param(text) {
            return;
        }
        let binding = self.resolve_simple(text).unwrap_or_else(|| problem(text));
        self.emit(node, NameRole::Reference, property, binding);
    }

    fn member_reference(&mut self, node: Node<'a>) {
        if !self.emitting() {
            return;
        }
        let text = self.text(node);
        let binding = self
            .table
            .lookup_member(&self.scope.name, text)
            .cloned()
            .unwrap_or_else(|| problem(text));
        self.emit(node, NameRole::Reference, NameProperty::FieldReference, binding);
    }

    fn reference_path(&mut self, node: Node<'a>, property: NameProperty) {
        if !self.emitting() {
            return;
        }
        let (segments, arguments, global) = split_name(node);
        let texts: Vec<&str> = segments.iter().map(|n| self.text(*n)).collect();
        let skip = texts.first().is_some_and(|first| self.is_template_param(first));
        if !segments.is_empty() && !skip {
            let resolved = self.resolve_segments(&texts, global);
            self.emit_path(&segments, resolved, NameRole::Reference, property);
        }
        for argument in arguments {
            self.walk_node(argument);
        }
    }
}
