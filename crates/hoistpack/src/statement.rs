use ahashmap::AHashSet;
use swc_ecma_ast::{ModuleDecl, ModuleItem, VarDeclKind};

use crate::analyze::Analysis;
use crate::scope::Scope;

/// One identifier occurrence inside a statement that resolves to the module
/// top level (a read, a write target, or a declared name). `start`/`end` are
/// byte offsets into the module source, so the generator can rewrite the
/// occurrence in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub start: usize,
    pub end: usize,
    /// `{ util }` needs to become `{ util: _util }` rather than `{ _util }`.
    pub shorthand: bool,
}

/// One top-level statement of a module, or one declarator of a
/// multi-declarator variable declaration, which is split so that dead
/// declarators can be dropped individually.
#[derive(Debug, Clone)]
pub struct Statement {
    pub node: ModuleItem,
    pub index: usize,
    /// Byte range of this statement's emitted slice within the module
    /// source. For split declarators this covers the declarator only.
    pub start: usize,
    pub end: usize,
    pub scope: Scope,
    pub defines: AHashSet<String>,
    pub modifies: AHashSet<String>,
    pub depends_on: AHashSet<String>,
    pub strongly_depends_on: AHashSet<String>,
    pub references: Vec<Reference>,
    /// Monotone: set by marking, never cleared.
    pub is_included: bool,
    pub is_import_declaration: bool,
    /// Set when this statement was synthesised by splitting a declaration;
    /// the generator re-attaches the kind keyword.
    pub var_split: Option<VarDeclKind>,
}

impl Statement {
    pub(crate) fn new(
        node: ModuleItem,
        index: usize,
        range: (usize, usize),
        var_split: Option<VarDeclKind>,
        analysis: Analysis,
    ) -> Self {
        let is_import_declaration = matches!(node, ModuleItem::ModuleDecl(ModuleDecl::Import(_)));
        Statement {
            node,
            index,
            start: range.0,
            end: range.1,
            scope: analysis.scope,
            defines: analysis.defines,
            modifies: analysis.modifies,
            depends_on: analysis.depends_on,
            strongly_depends_on: analysis.strongly_depends_on,
            references: analysis.references,
            is_included: false,
            is_import_declaration,
            var_split,
        }
    }

    /// Dependencies in first-reference order, so marking walks them the way
    /// the source reads. Names that entered `depends_on` without a recorded
    /// reference (export-delegate edges) follow in sorted order.
    pub fn ordered_dependencies(&self) -> Vec<String> {
        let mut seen: AHashSet<&str> = AHashSet::default();
        let mut ordered = Vec::new();
        for reference in &self.references {
            if self.depends_on.contains(&reference.name) && seen.insert(&reference.name) {
                ordered.push(reference.name.clone());
            }
        }
        let mut extra: Vec<String> = self
            .depends_on
            .iter()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();
        extra.sort();
        ordered.extend(extra);
        ordered
    }
}
