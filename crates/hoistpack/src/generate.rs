use itertools::Itertools;
use logger::Logger;
use swc_common::Spanned;
use swc_ecma_ast as ast;

use crate::bundle::Bundle;
use crate::edit::EditBuffer;
use crate::error::BundleError;
use crate::loader::Loader;
use crate::module::{ModuleIdx, StmtRef};
use crate::statement::Reference;

/// How one statement's slice is rewritten before emission.
enum NodeKind {
    /// Imports, `export { … }` lists and `export * from` emit no text.
    Skip,
    Plain,
    /// `export <decl>`: drop the keyword.
    ExportDecl { inner_start: usize },
    /// `export default function foo`: drop the prefix, keep the name.
    ExportDefaultNamed { inner_start: usize },
    /// Any other `export default`: bind the value to the module's
    /// canonical default name.
    ExportDefaultValue {
        inner_start: usize,
        identifier: Option<String>,
    },
}

impl<TLoader: Loader, TLogger: Logger> Bundle<TLoader, TLogger> {
    /// Serialises the included statements into one flat ES module:
    /// external imports and namespace objects first, then the statements in
    /// execution order, then the entry module's export surface.
    pub fn generate(&mut self) -> Result<String, BundleError> {
        self.deconflict();

        let statements = self.statements.clone();
        let mut body_parts: Vec<String> = Vec::new();
        for sref in statements {
            if let Some(text) = self.render_statement(sref) {
                body_parts.push(text);
            }
        }

        let mut blocks: Vec<String> = Vec::new();
        let import_block = self.render_external_imports();
        if !import_block.is_empty() {
            blocks.push(import_block);
        }
        let namespace_modules = self.internal_namespace_modules.clone();
        for midx in namespace_modules {
            blocks.push(self.render_namespace_block(midx));
        }
        blocks.push(body_parts.join("\n\n"));
        blocks.extend(self.render_entry_exports());
        blocks.retain(|block| !block.is_empty());

        let mut code = blocks.join("\n\n");
        code.push('\n');
        Ok(code)
    }

    fn render_statement(&mut self, sref: StmtRef) -> Option<String> {
        let (kind, references, start, end, var_split) = {
            let module = &self.modules[sref.module.0];
            let statement = &module.statements[sref.index];
            let kind = match &statement.node {
                ast::ModuleItem::ModuleDecl(decl) => match decl {
                    ast::ModuleDecl::Import(_)
                    | ast::ModuleDecl::ExportNamed(_)
                    | ast::ModuleDecl::ExportAll(_) => NodeKind::Skip,
                    ast::ModuleDecl::ExportDecl(export) => NodeKind::ExportDecl {
                        inner_start: module.span_range(export.decl.span()).0,
                    },
                    ast::ModuleDecl::ExportDefaultDecl(export) => match &export.decl {
                        ast::DefaultDecl::Fn(f) => {
                            let inner_start = module.span_range(f.span()).0;
                            if f.ident.is_some() {
                                NodeKind::ExportDefaultNamed { inner_start }
                            } else {
                                NodeKind::ExportDefaultValue {
                                    inner_start,
                                    identifier: None,
                                }
                            }
                        }
                        ast::DefaultDecl::Class(c) => {
                            let inner_start = module.span_range(c.span()).0;
                            if c.ident.is_some() {
                                NodeKind::ExportDefaultNamed { inner_start }
                            } else {
                                NodeKind::ExportDefaultValue {
                                    inner_start,
                                    identifier: None,
                                }
                            }
                        }
                        ast::DefaultDecl::TsInterfaceDecl(_) => NodeKind::Skip,
                    },
                    ast::ModuleDecl::ExportDefaultExpr(export) => NodeKind::ExportDefaultValue {
                        inner_start: module.span_range(export.expr.span()).0,
                        identifier: export.expr.as_ident().map(|i| i.sym.to_string()),
                    },
                    _ => NodeKind::Skip,
                },
                ast::ModuleItem::Stmt(_) => NodeKind::Plain,
            };
            (
                kind,
                statement.references.clone(),
                statement.start,
                statement.end,
                statement.var_split,
            )
        };

        if matches!(kind, NodeKind::Skip) {
            return None;
        }

        // resolve every rename before borrowing the source text
        let renames: Vec<(Reference, String)> = references
            .into_iter()
            .filter_map(|reference| {
                let canonical = self.get_canonical_name(sref.module, &reference.name);
                (canonical != reference.name).then_some((reference, canonical))
            })
            .collect();

        let default_name = match &kind {
            NodeKind::ExportDefaultValue { identifier, .. } => {
                let canonical = self.get_canonical_name(sref.module, "default");
                if let Some(identifier) = identifier {
                    // `export default foo` with an untouched `foo` collapses
                    // into the identifier itself; emitting `var foo = foo;`
                    // would shadow the real declaration
                    if self.get_canonical_name(sref.module, identifier) == canonical {
                        return None;
                    }
                }
                Some(canonical)
            }
            _ => None,
        };

        let slice = self.modules[sref.module.0].source[start..end].to_string();
        let mut buffer = EditBuffer::new(&slice, start);
        buffer.add_sourcemap_location(start);

        for (reference, canonical) in &renames {
            if reference.shorthand {
                buffer.overwrite(
                    reference.start,
                    reference.end,
                    format!("{}: {}", reference.name, canonical),
                );
            } else {
                buffer.overwrite(reference.start, reference.end, canonical.clone());
            }
        }

        match kind {
            NodeKind::ExportDecl { inner_start }
            | NodeKind::ExportDefaultNamed { inner_start } => {
                buffer.snip(start, inner_start);
            }
            NodeKind::ExportDefaultValue { inner_start, .. } => {
                if let Some(name) = &default_name {
                    buffer.overwrite(start, inner_start, format!("var {name} = "));
                    if !slice.trim_end().ends_with(';') {
                        buffer.append(";");
                    }
                }
            }
            NodeKind::Plain => {}
            NodeKind::Skip => unreachable!(),
        }

        if let Some(kind) = var_split {
            buffer.prepend(format!("{} ", var_kind_keyword(kind)));
            buffer.append(";");
        }

        Some(buffer.render())
    }

    fn render_external_imports(&mut self) -> String {
        let externals: Vec<ModuleIdx> = (0..self.modules.len())
            .map(ModuleIdx)
            .filter(|midx| self.modules[midx.0].is_external)
            .collect();
        let mut lines = Vec::new();
        for midx in externals {
            let mut specifiers: Vec<String> = Vec::new();
            if self.modules[midx.0].needs_default {
                specifiers.push(self.get_canonical_name(midx, "default"));
            }
            if self.modules[midx.0].needs_all {
                specifiers.push(format!("* as {}", self.get_canonical_name(midx, "*")));
            }
            if self.modules[midx.0].needs_named {
                let named = self.modules[midx.0]
                    .imported_by_bundle
                    .iter()
                    .filter(|binding| binding.name != "default" && binding.name != "*")
                    .map(|binding| binding.name.clone())
                    .sorted()
                    .dedup()
                    .join(", ");
                specifiers.push(format!("{{ {named} }}"));
            }
            let id = &self.modules[midx.0].id;
            if specifiers.is_empty() {
                lines.push(format!("import '{id}';"));
            } else {
                lines.push(format!("import {} from '{id}';", specifiers.join(", ")));
            }
        }
        lines.join("\n")
    }

    /// `import * as ns from './m'` materialises the module's exports as an
    /// object of getters, so members stay live bindings.
    fn render_namespace_block(&mut self, midx: ModuleIdx) -> String {
        let name = self.get_canonical_name(midx, "*");
        let exported: Vec<String> = self.modules[midx.0].exports.keys().cloned().sorted().collect();
        if exported.is_empty() {
            return format!("var {name} = {{}};");
        }
        let members = exported
            .iter()
            .map(|export_name| {
                let value = self.exported_canonical(midx, export_name);
                let key = if export_name == "default" {
                    "'default'".to_string()
                } else {
                    export_name.clone()
                };
                format!("\tget {key} () {{ return {value}; }}")
            })
            .join(",\n");
        format!("var {name} = {{\n{members}\n}};")
    }

    fn render_entry_exports(&mut self) -> Vec<String> {
        let Some(entry) = self.entry_module else {
            return Vec::new();
        };
        let names: Vec<String> = self.modules[entry.0].exports.keys().cloned().sorted().collect();
        let mut named_specifiers: Vec<String> = Vec::new();
        let mut default_line = None;
        for name in names {
            if name == "default" {
                let value = self.exported_canonical(entry, "default");
                default_line = Some(format!("export default {value};"));
            } else {
                let value = self.exported_canonical(entry, &name);
                named_specifiers.push(if value == name {
                    name
                } else {
                    format!("{value} as {name}")
                });
            }
        }
        let mut lines = Vec::new();
        if !named_specifiers.is_empty() {
            lines.push(format!("export {{ {} }};", named_specifiers.join(", ")));
        }
        lines.extend(default_line);
        lines
    }
}

fn var_kind_keyword(kind: ast::VarDeclKind) -> &'static str {
    match kind {
        ast::VarDeclKind::Var => "var",
        ast::VarDeclKind::Let => "let",
        ast::VarDeclKind::Const => "const",
    }
}
