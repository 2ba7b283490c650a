use ahashmap::{hash_map::Entry, AHashMap};
use swc_common::errors::Handler;
use swc_common::source_map::SmallPos;
use swc_common::sync::Lrc;
use swc_common::{BytePos, FileName, SourceMap, Span, Spanned};
use swc_ecma_ast as ast;
use swc_ecma_parser::{Capturing, Parser};

use crate::analyze::{analyze_module_item, pattern_names, Analysis};
use crate::error::{line_col, BundleError};
use crate::statement::Statement;

/// Handle into the bundle's module registry. Modules are exclusively owned
/// by the bundle; everything else refers to them by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(pub usize);

/// Address of one statement within the module registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtRef {
    pub module: ModuleIdx,
    pub index: usize,
}

/// `import { a as b } from './m'`: one local binding created by an import
/// (or by a re-export specifier, which imports under the hood).
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub source: String,
    /// `"default"`, `"*"`, or the exporter-side name.
    pub name: String,
    pub local_name: String,
    /// Filled in lazily the first time marking traverses this import.
    pub module: Option<ModuleIdx>,
    pub span: Span,
}

/// `export default …` in all its shapes.
#[derive(Debug, Clone)]
pub struct DefaultExport {
    pub statement_index: usize,
    /// The name marking resolves when an importer asks for `default`: the
    /// declared name for `export default function foo`, otherwise
    /// `"default"` itself.
    pub local_name: String,
    /// `export default function foo () {}` → `foo`.
    pub declared_name: Option<String>,
    /// `export default foo;` → `foo`.
    pub identifier: Option<String>,
    pub is_declaration: bool,
    pub is_anonymous: bool,
    /// Set after analysis when the exported identifier is reassigned later
    /// in the module; drives the re-ordering of the default statement.
    pub is_modified: bool,
    pub is_used: bool,
}

#[derive(Debug, Clone)]
pub enum ExportBinding {
    Default(DefaultExport),
    /// `export var x = …`, `export function x…`, `export class x…`.
    Declaration {
        statement_index: usize,
        local_name: String,
        is_used: bool,
    },
    /// `export { a as b }`, with or without a `from` clause.
    Specifier {
        local_name: String,
        exported_name: String,
        is_used: bool,
    },
}

impl ExportBinding {
    pub fn is_used(&self) -> bool {
        match self {
            ExportBinding::Default(d) => d.is_used,
            ExportBinding::Declaration { is_used, .. } => *is_used,
            ExportBinding::Specifier { is_used, .. } => *is_used,
        }
    }

    pub fn mark_used(&mut self) {
        match self {
            ExportBinding::Default(d) => d.is_used = true,
            ExportBinding::Declaration { is_used, .. } => *is_used = true,
            ExportBinding::Specifier { is_used, .. } => *is_used = true,
        }
    }

    /// The module-local name marking should resolve next.
    pub fn local_name(&self) -> &str {
        match self {
            ExportBinding::Default(d) => &d.local_name,
            ExportBinding::Declaration { local_name, .. } => local_name,
            ExportBinding::Specifier { local_name, .. } => local_name,
        }
    }
}

/// `export * from './m'`: resolved on demand when a requested name is not
/// found among the module's own exports.
#[derive(Debug, Clone)]
pub struct ExportDelegate {
    pub statement_index: usize,
    pub source: String,
    pub module: Option<ModuleIdx>,
}

/// Memo entry for `(module, name)` marking requests. A re-entrant request
/// while resolution is in flight yields the empty sequence, which is what
/// terminates import cycles.
#[derive(Debug, Clone)]
pub enum DefinitionState {
    InProgress,
    Done(Vec<StmtRef>),
}

/// A parsed source file: its statements, its import and export surface, and
/// the name bookkeeping marking and generation build up.
pub struct Module {
    pub id: String,
    pub source: String,
    pub source_map: Lrc<SourceMap>,
    file_start: BytePos,
    pub statements: Vec<Statement>,
    /// localName → binding
    pub imports: AHashMap<String, ImportBinding>,
    /// exportedName → binding (`default` included)
    pub exports: AHashMap<String, ExportBinding>,
    pub export_delegates: Vec<ExportDelegate>,
    /// name → index into `export_delegates`, filled lazily as names are
    /// found behind `export * from`.
    pub export_alls: AHashMap<String, usize>,
    /// top-level name → statement that declares it
    pub definitions: AHashMap<String, usize>,
    /// top-level name → statements that reassign it, in source order
    pub modifications: AHashMap<String, Vec<usize>>,
    pub suggested_names: AHashMap<String, String>,
    pub canonical_names: AHashMap<String, String>,
    pub definition_results: AHashMap<String, DefinitionState>,
    pub is_external: bool,
    pub needs_default: bool,
    pub needs_named: bool,
    pub needs_all: bool,
    /// Import bindings of other modules that resolved to this external
    /// module; drives the emitted import block.
    pub imported_by_bundle: Vec<ImportBinding>,
}

impl Module {
    /// Sentinel for a specifier the loader could not resolve to source. Its
    /// symbols survive as runtime imports.
    pub fn external(id: String) -> Self {
        Module {
            id,
            source: String::new(),
            source_map: Lrc::default(),
            file_start: BytePos(0),
            statements: Vec::new(),
            imports: AHashMap::default(),
            exports: AHashMap::default(),
            export_delegates: Vec::new(),
            export_alls: AHashMap::default(),
            definitions: AHashMap::default(),
            modifications: AHashMap::default(),
            suggested_names: AHashMap::default(),
            canonical_names: AHashMap::default(),
            definition_results: AHashMap::default(),
            is_external: true,
            needs_default: false,
            needs_named: false,
            needs_all: false,
            imported_by_bundle: Vec::new(),
        }
    }

    /// Parses and analyses one source file: builds the statement list
    /// (splitting multi-declarator variable declarations), extracts the
    /// import/export surface, and computes the per-statement sets.
    pub fn from_source(id: String, source: String) -> Result<Self, BundleError> {
        let cm = Lrc::<SourceMap>::default();
        let fname: Lrc<FileName> = Lrc::new(FileName::Real(id.clone().into()));
        let fm = cm.new_source_file(fname, source.clone());
        let file_start = fm.start_pos;

        let handler = Handler::with_emitter_writer(Box::new(Vec::<u8>::new()), Some(cm.clone()));
        let lexer = es_parse::create_lexer(&fm, None);
        let capturing = Capturing::new(lexer);
        let mut parser = Parser::new_from(capturing);

        let ast = match parser.parse_module() {
            Ok(module) => module,
            Err(error) => {
                let (line, col) = line_col(&cm, error.span());
                let mut diagnostic = error.into_diagnostic(&handler);
                let message = diagnostic.message();
                // avoid the panic-on-drop of an unemitted diagnostic
                diagnostic.cancel();
                return Err(BundleError::Parse {
                    file: id,
                    line,
                    col,
                    message,
                });
            }
        };
        let recovered = parser.take_errors();
        if !recovered.is_empty() {
            let (line, col) = line_col(&cm, recovered[0].span());
            let message = recovered
                .into_iter()
                .map(|error| {
                    let mut diagnostic = error.into_diagnostic(&handler);
                    let message = diagnostic.message();
                    diagnostic.cancel();
                    message
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Err(BundleError::Parse {
                file: id,
                line,
                col,
                message,
            });
        }

        let mut module = Module {
            id,
            source,
            source_map: cm,
            file_start,
            statements: Vec::new(),
            imports: AHashMap::default(),
            exports: AHashMap::default(),
            export_delegates: Vec::new(),
            export_alls: AHashMap::default(),
            definitions: AHashMap::default(),
            modifications: AHashMap::default(),
            suggested_names: AHashMap::default(),
            canonical_names: AHashMap::default(),
            definition_results: AHashMap::default(),
            is_external: false,
            needs_default: false,
            needs_named: false,
            needs_all: false,
            imported_by_bundle: Vec::new(),
        };

        for item in &ast.body {
            module.add_item(item)?;
        }
        module.consolidate();
        module.check_import_shadowing()?;
        Ok(module)
    }

    fn add_item(&mut self, item: &ast::ModuleItem) -> Result<(), BundleError> {
        // a plain declaration with several declarators becomes one statement
        // per declarator; that is the granularity dead code is dropped at
        if let ast::ModuleItem::Stmt(ast::Stmt::Decl(ast::Decl::Var(var))) = item {
            if var.decls.len() > 1 {
                for declarator in &var.decls {
                    let node =
                        ast::ModuleItem::Stmt(ast::Stmt::Decl(ast::Decl::Var(Box::new(
                            ast::VarDecl {
                                span: declarator.span,
                                ctxt: var.ctxt,
                                kind: var.kind,
                                declare: false,
                                decls: vec![declarator.clone()],
                            },
                        ))));
                    self.push_statement(node, declarator.span, Some(var.kind));
                }
                return Ok(());
            }
        }

        let index = self.statements.len();
        match item {
            ast::ModuleItem::ModuleDecl(ast::ModuleDecl::Import(import)) => {
                self.add_import(import)?;
            }
            ast::ModuleItem::ModuleDecl(decl) => {
                self.add_export(decl, index)?;
            }
            ast::ModuleItem::Stmt(_) => {}
        }
        self.push_statement(item.clone(), item.span(), None);
        Ok(())
    }

    fn push_statement(&mut self, node: ast::ModuleItem, span: Span, split: Option<ast::VarDeclKind>) {
        let index = self.statements.len();
        let is_import = matches!(node, ast::ModuleItem::ModuleDecl(ast::ModuleDecl::Import(_)));
        let analysis = if is_import {
            Analysis::default()
        } else {
            analyze_module_item(&node, self.file_start)
        };
        self.statements.push(Statement::new(
            node,
            index,
            self.span_range(span),
            split,
            analysis,
        ));
    }

    fn add_import(&mut self, import: &ast::ImportDecl) -> Result<(), BundleError> {
        let source = import.src.value.to_string();
        for specifier in &import.specifiers {
            let (name, local) = match specifier {
                ast::ImportSpecifier::Named(named) => {
                    let imported = match &named.imported {
                        Some(module_name) => module_name.atom().to_string(),
                        None => named.local.sym.to_string(),
                    };
                    (imported, &named.local)
                }
                ast::ImportSpecifier::Default(default) => ("default".to_string(), &default.local),
                ast::ImportSpecifier::Namespace(namespace) => ("*".to_string(), &namespace.local),
            };
            self.register_import(ImportBinding {
                source: source.clone(),
                name,
                local_name: local.sym.to_string(),
                module: None,
                span: local.span,
            })?;
        }
        Ok(())
    }

    fn register_import(&mut self, binding: ImportBinding) -> Result<(), BundleError> {
        let (line, col) = line_col(&self.source_map, binding.span);
        match self.imports.entry(binding.local_name.clone()) {
            Entry::Occupied(_) => Err(BundleError::DuplicateImport {
                file: self.id.clone(),
                local_name: binding.local_name,
                line,
                col,
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(binding);
                Ok(())
            }
        }
    }

    fn add_export(&mut self, decl: &ast::ModuleDecl, index: usize) -> Result<(), BundleError> {
        match decl {
            ast::ModuleDecl::ExportDefaultExpr(export) => {
                let identifier = export.expr.as_ident().map(|i| i.sym.to_string());
                self.exports.insert(
                    "default".to_string(),
                    ExportBinding::Default(DefaultExport {
                        statement_index: index,
                        local_name: "default".to_string(),
                        declared_name: None,
                        is_anonymous: identifier.is_none(),
                        identifier,
                        is_declaration: false,
                        is_modified: false,
                        is_used: false,
                    }),
                );
            }
            ast::ModuleDecl::ExportDefaultDecl(export) => {
                let declared_name = match &export.decl {
                    ast::DefaultDecl::Fn(f) => f.ident.as_ref().map(|i| i.sym.to_string()),
                    ast::DefaultDecl::Class(c) => c.ident.as_ref().map(|i| i.sym.to_string()),
                    ast::DefaultDecl::TsInterfaceDecl(_) => None,
                };
                self.exports.insert(
                    "default".to_string(),
                    ExportBinding::Default(DefaultExport {
                        statement_index: index,
                        local_name: declared_name
                            .clone()
                            .unwrap_or_else(|| "default".to_string()),
                        is_anonymous: declared_name.is_none(),
                        declared_name,
                        identifier: None,
                        is_declaration: true,
                        is_modified: false,
                        is_used: false,
                    }),
                );
            }
            ast::ModuleDecl::ExportDecl(export) => match &export.decl {
                ast::Decl::Var(var) => {
                    for declarator in &var.decls {
                        let mut names = Vec::new();
                        pattern_names(&declarator.name, &mut names);
                        for name in names {
                            self.exports.insert(
                                name.clone(),
                                ExportBinding::Declaration {
                                    statement_index: index,
                                    local_name: name,
                                    is_used: false,
                                },
                            );
                        }
                    }
                }
                ast::Decl::Fn(f) => {
                    let name = f.ident.sym.to_string();
                    self.exports.insert(
                        name.clone(),
                        ExportBinding::Declaration {
                            statement_index: index,
                            local_name: name,
                            is_used: false,
                        },
                    );
                }
                ast::Decl::Class(c) => {
                    let name = c.ident.sym.to_string();
                    self.exports.insert(
                        name.clone(),
                        ExportBinding::Declaration {
                            statement_index: index,
                            local_name: name,
                            is_used: false,
                        },
                    );
                }
                _ => {}
            },
            ast::ModuleDecl::ExportNamed(export) => {
                let source = export.src.as_ref().map(|s| s.value.to_string());
                for specifier in &export.specifiers {
                    let named = match specifier {
                        ast::ExportSpecifier::Named(named) => named,
                        // `export * as ns from` and the default-reexport
                        // shorthand are not part of the supported surface
                        _ => continue,
                    };
                    let local = named.orig.atom().to_string();
                    let exported_name = named
                        .exported
                        .as_ref()
                        .map(|e| e.atom().to_string())
                        .unwrap_or_else(|| local.clone());
                    self.exports.insert(
                        exported_name.clone(),
                        ExportBinding::Specifier {
                            local_name: local.clone(),
                            exported_name,
                            is_used: false,
                        },
                    );
                    if let Some(source) = &source {
                        // the re-export reads through a synthetic import
                        self.register_import(ImportBinding {
                            source: source.clone(),
                            name: local.clone(),
                            local_name: local,
                            module: None,
                            span: named.orig.span(),
                        })?;
                    }
                }
            }
            ast::ModuleDecl::ExportAll(export) => {
                self.export_delegates.push(ExportDelegate {
                    statement_index: index,
                    source: export.src.value.to_string(),
                    module: None,
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Builds the definition and modification indexes from the analysed
    /// statements and finishes the default-export metadata.
    fn consolidate(&mut self) {
        for statement in &self.statements {
            for name in &statement.defines {
                self.definitions.insert(name.clone(), statement.index);
            }
            for name in &statement.modifies {
                self.modifications
                    .entry(name.clone())
                    .or_default()
                    .push(statement.index);
            }
        }
        if let Some(ExportBinding::Default(default)) = self.exports.get_mut("default") {
            if let Some(identifier) = &default.identifier {
                default.is_modified = self.modifications.contains_key(identifier);
            }
        }
    }

    /// The `defines` and `imports` key sets of a module must be disjoint.
    fn check_import_shadowing(&self) -> Result<(), BundleError> {
        for (local_name, binding) in &self.imports {
            if self.definitions.contains_key(local_name) {
                let (line, col) = line_col(&self.source_map, binding.span);
                return Err(BundleError::DuplicateImport {
                    file: self.id.clone(),
                    local_name: local_name.clone(),
                    line,
                    col,
                });
            }
        }
        Ok(())
    }

    /// The statement declaring a top-level name. The pseudo-names `default`
    /// and `*` have no defining statement.
    pub fn find_defining_statement(&self, name: &str) -> Result<Option<&Statement>, BundleError> {
        if name == "default" || name == "*" {
            return Err(BundleError::NotSupported {
                what: format!("finding the defining statement of '{name}'"),
            });
        }
        Ok(self
            .definitions
            .get(name)
            .map(|index| &self.statements[*index]))
    }

    /// First suggestion wins; later importers do not override it.
    pub fn suggest_name(&mut self, name: &str, suggestion: &str) {
        self.suggested_names
            .entry(name.to_string())
            .or_insert_with(|| crate::name::make_legal_identifier(suggestion));
    }

    /// Forced canonical-name assignment, bypassing resolution.
    pub fn rename(&mut self, name: &str, replacement: &str) {
        self.canonical_names
            .insert(name.to_string(), replacement.to_string());
    }

    pub fn span_range(&self, span: Span) -> (usize, usize) {
        (
            span.lo.to_usize() - self.file_start.to_usize(),
            span.hi.to_usize() - self.file_start.to_usize(),
        )
    }

    /// True when the default export is a reassigned identifier, the case the
    /// statement re-ordering rule exists for.
    pub fn default_is_modified_identifier(&self) -> bool {
        matches!(
            self.exports.get("default"),
            Some(ExportBinding::Default(d)) if d.identifier.is_some() && d.is_modified
        )
    }

    pub fn included_statement_count(&self) -> usize {
        self.statements
            .iter()
            .filter(|statement| statement.is_included)
            .count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Module {
        Module::from_source("/virtual/test.js".to_string(), src.to_string())
            .expect("module should parse")
    }

    #[test]
    fn indexes_imports_by_local_name() {
        let module = parse(
            r#"
            import def from './a';
            import * as ns from './b';
            import { x, y as z } from './c';
            "#,
        );
        assert_eq!(module.imports.len(), 4);
        assert_eq!(module.imports["def"].name, "default");
        assert_eq!(module.imports["ns"].name, "*");
        assert_eq!(module.imports["x"].name, "x");
        assert_eq!(module.imports["z"].name, "y");
        assert_eq!(module.imports["z"].source, "./c");
        assert!(module.statements[0].is_import_declaration);
    }

    #[test]
    fn import_of_default_by_name() {
        let module = parse("import { default as impl } from './a';");
        assert_eq!(module.imports["impl"].name, "default");
    }

    #[test]
    fn duplicate_local_import_is_an_error() {
        let result = Module::from_source(
            "/virtual/dup.js".to_string(),
            "import { a } from './x';\nimport { a } from './y';\n".to_string(),
        );
        match result {
            Err(BundleError::DuplicateImport {
                local_name, line, ..
            }) => {
                assert_eq!(local_name, "a");
                assert_eq!(line, 2);
            }
            other => panic!("expected DuplicateImport, got {:?}", other.err()),
        }
    }

    #[test]
    fn export_declarations_register_their_names() {
        let module = parse(
            r#"
            export var a = 1;
            export function f() {}
            export class C {}
            "#,
        );
        for name in ["a", "f", "C"] {
            match &module.exports[name] {
                ExportBinding::Declaration { local_name, .. } => assert_eq!(local_name, name),
                other => panic!("expected declaration binding for {name}, got {other:?}"),
            }
        }
        assert_eq!(module.definitions["a"], 0);
        assert_eq!(module.definitions["f"], 1);
        assert_eq!(module.definitions["C"], 2);
    }

    #[test]
    fn export_specifiers_and_reexports() {
        let module = parse(
            r#"
            const a = 1;
            export { a as b };
            export { c as d } from './other';
            "#,
        );
        match &module.exports["b"] {
            ExportBinding::Specifier { local_name, .. } => assert_eq!(local_name, "a"),
            other => panic!("unexpected binding {other:?}"),
        }
        // the re-export created a synthetic import under the exporter name
        assert_eq!(module.imports["c"].source, "./other");
        assert_eq!(module.imports["c"].name, "c");
    }

    #[test]
    fn export_all_becomes_a_delegate() {
        let module = parse("export * from './inner';\n");
        assert_eq!(module.export_delegates.len(), 1);
        assert_eq!(module.export_delegates[0].source, "./inner");
        assert!(module.export_alls.is_empty());
    }

    #[test]
    fn default_export_forms() {
        let module = parse("export default function run() {}");
        match &module.exports["default"] {
            ExportBinding::Default(d) => {
                assert!(d.is_declaration);
                assert_eq!(d.declared_name.as_deref(), Some("run"));
                assert_eq!(d.local_name, "run");
                assert!(!d.is_anonymous);
            }
            other => panic!("unexpected binding {other:?}"),
        }

        let module = parse("let foo = 1;\nexport default foo;\nfoo = 2;\n");
        match &module.exports["default"] {
            ExportBinding::Default(d) => {
                assert!(!d.is_declaration);
                assert_eq!(d.identifier.as_deref(), Some("foo"));
                assert!(d.is_modified);
            }
            other => panic!("unexpected binding {other:?}"),
        }
        assert!(module.default_is_modified_identifier());

        let module = parse("export default function () {}");
        match &module.exports["default"] {
            ExportBinding::Default(d) => {
                assert!(d.is_declaration);
                assert!(d.is_anonymous);
                assert_eq!(d.local_name, "default");
            }
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn multi_declarator_statements_are_split() {
        let module = parse("var a = 1, b = a + 1;\nvar c = 3;\n");
        assert_eq!(module.statements.len(), 3);
        assert_eq!(module.definitions["a"], 0);
        assert_eq!(module.definitions["b"], 1);
        assert_eq!(module.definitions["c"], 2);
        assert!(module.statements[0].var_split.is_some());
        assert!(module.statements[2].var_split.is_none());
        // the second declarator depends on the first across the split
        assert!(module.statements[1].depends_on.contains("a"));
        // emitted slices cover exactly the declarators
        let (start, end) = (module.statements[1].start, module.statements[1].end);
        assert_eq!(&module.source[start..end], "b = a + 1");
    }

    #[test]
    fn modifications_are_indexed_in_order() {
        let module = parse("let n = 0;\nn += 1;\nn = 2;\n");
        assert_eq!(module.modifications["n"], vec![1, 2]);
    }

    #[test]
    fn import_shadowing_a_definition_is_rejected() {
        let result = Module::from_source(
            "/virtual/shadow.js".to_string(),
            "import { a } from './x';\nvar a = 1;\n".to_string(),
        );
        assert!(matches!(
            result.err(),
            Some(BundleError::DuplicateImport { local_name, .. }) if local_name == "a"
        ));
    }

    #[test]
    fn find_defining_statement_rejects_pseudo_names() {
        let module = parse("export default 1;\nvar x = 2;\n");
        assert!(matches!(
            module.find_defining_statement("default"),
            Err(BundleError::NotSupported { .. })
        ));
        assert!(matches!(
            module.find_defining_statement("*"),
            Err(BundleError::NotSupported { .. })
        ));
        assert!(module.find_defining_statement("x").unwrap().is_some());
        assert!(module.find_defining_statement("missing").unwrap().is_none());
    }

    #[test]
    fn suggestions_are_first_wins_and_legalised() {
        let mut module = parse("export default 1;\n");
        module.suggest_name("default", "my-module");
        module.suggest_name("default", "other");
        assert_eq!(module.suggested_names["default"], "my_module");
    }

    #[test]
    fn parse_errors_carry_the_file() {
        let result = Module::from_source("/virtual/bad.js".to_string(), "var = ;".to_string());
        match result {
            Err(BundleError::Parse { file, .. }) => assert_eq!(file, "/virtual/bad.js"),
            other => panic!("expected parse error, got {:?}", other.err()),
        }
    }
}
