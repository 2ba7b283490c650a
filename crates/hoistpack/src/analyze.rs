use ahashmap::AHashSet;
use swc_common::source_map::SmallPos;
use swc_common::BytePos;
use swc_ecma_ast as ast;
use swc_ecma_visit::{Visit, VisitWith};

use crate::scope::Scope;
use crate::statement::Reference;

/// The result of walking one top-level statement: its scope tree, the
/// defines/modifies/dependsOn sets, and every identifier occurrence that
/// resolves to the module top level.
#[derive(Debug, Default)]
pub(crate) struct Analysis {
    pub scope: Scope,
    pub defines: AHashSet<String>,
    pub modifies: AHashSet<String>,
    pub depends_on: AHashSet<String>,
    pub strongly_depends_on: AHashSet<String>,
    pub references: Vec<Reference>,
}

/// Walks one top-level statement. Import declarations are never analysed;
/// export wrappers are unwrapped here so the walker only ever sees runtime
/// code.
pub(crate) fn analyze_module_item(item: &ast::ModuleItem, file_start: BytePos) -> Analysis {
    let mut visitor = StatementAnalyzer::new(file_start);
    match item {
        ast::ModuleItem::ModuleDecl(decl) => match decl {
            ast::ModuleDecl::ExportDecl(export) => export.decl.visit_with(&mut visitor),
            ast::ModuleDecl::ExportDefaultDecl(export) => visitor.walk_default_decl(export),
            ast::ModuleDecl::ExportDefaultExpr(export) => export.expr.visit_with(&mut visitor),
            ast::ModuleDecl::ExportNamed(export) => visitor.walk_named_export(export),
            // import declarations are indexed separately; `export * from`
            // carries no identifiers of its own
            _ => {}
        },
        ast::ModuleItem::Stmt(stmt) => stmt.visit_with(&mut visitor),
    }
    visitor.finish()
}

/// Collects every name a binding pattern introduces.
pub(crate) fn pattern_names(pat: &ast::Pat, out: &mut Vec<String>) {
    match pat {
        ast::Pat::Ident(binding) => out.push(binding.id.sym.to_string()),
        ast::Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                pattern_names(elem, out);
            }
        }
        ast::Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ast::ObjectPatProp::KeyValue(kv) => pattern_names(&kv.value, out),
                    ast::ObjectPatProp::Assign(assign) => out.push(assign.key.id.sym.to_string()),
                    ast::ObjectPatProp::Rest(rest) => pattern_names(&rest.arg, out),
                }
            }
        }
        ast::Pat::Assign(assign) => pattern_names(&assign.left, out),
        ast::Pat::Rest(rest) => pattern_names(&rest.arg, out),
        ast::Pat::Expr(_) | ast::Pat::Invalid(_) => {}
    }
}

enum Resolved {
    /// Declared by this statement at module top level.
    TopLevel,
    /// Declared in a nested scope of this statement.
    Local,
    /// Not declared anywhere in the statement: another statement's binding,
    /// an import, or a global.
    Free,
}

struct StatementAnalyzer {
    file_start: BytePos,
    scopes: Vec<Scope>,
    /// > 0 inside function bodies, i.e. code that does not run at module
    /// load time.
    weak_depth: usize,
    modifies: AHashSet<String>,
    depends_on: AHashSet<String>,
    strongly_depends_on: AHashSet<String>,
    references: Vec<Reference>,
    seen_reference_starts: AHashSet<usize>,
}

impl StatementAnalyzer {
    fn new(file_start: BytePos) -> Self {
        StatementAnalyzer {
            file_start,
            // the root scope is the module top level as seen from this
            // statement; `var` hoists to it
            scopes: vec![Scope::function()],
            weak_depth: 0,
            modifies: AHashSet::default(),
            depends_on: AHashSet::default(),
            strongly_depends_on: AHashSet::default(),
            references: Vec::new(),
            seen_reference_starts: AHashSet::default(),
        }
    }

    fn finish(mut self) -> Analysis {
        debug_assert_eq!(self.scopes.len(), 1, "unbalanced scope stack");
        let scope = self.scopes.pop().expect("the root scope is always present");
        let defines: AHashSet<String> = scope.declarations.iter().cloned().collect();
        // self-references are internal to the statement
        self.depends_on.retain(|name| !defines.contains(name));
        self.strongly_depends_on.retain(|name| !defines.contains(name));
        Analysis {
            scope,
            defines,
            modifies: self.modifies,
            depends_on: self.depends_on,
            strongly_depends_on: self.strongly_depends_on,
            references: self.references,
        }
    }

    fn push_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    fn pop_scope(&mut self) {
        let finished = self.scopes.pop().expect("scope stack underflow");
        self.scopes
            .last_mut()
            .expect("popped the root scope")
            .children
            .push(finished);
    }

    fn resolve(&self, name: &str) -> Resolved {
        for (depth, scope) in self.scopes.iter().enumerate().rev() {
            if scope.contains(name) {
                return if depth == 0 {
                    Resolved::TopLevel
                } else {
                    Resolved::Local
                };
            }
        }
        Resolved::Free
    }

    fn offset(&self, pos: BytePos) -> usize {
        pos.to_usize() - self.file_start.to_usize()
    }

    fn record_reference(&mut self, ident: &ast::Ident, shorthand: bool) {
        let start = self.offset(ident.span.lo);
        if !self.seen_reference_starts.insert(start) {
            return;
        }
        self.references.push(Reference {
            name: ident.sym.to_string(),
            start,
            end: self.offset(ident.span.hi),
            shorthand,
        });
    }

    fn record_read(&mut self, ident: &ast::Ident, shorthand: bool) {
        let name = ident.sym.as_str();
        match self.resolve(name) {
            Resolved::Local => {}
            Resolved::TopLevel => self.record_reference(ident, shorthand),
            Resolved::Free => {
                self.depends_on.insert(name.to_string());
                if self.weak_depth == 0 {
                    self.strongly_depends_on.insert(name.to_string());
                }
                self.record_reference(ident, shorthand);
            }
        }
    }

    fn record_write(&mut self, ident: &ast::Ident) {
        let name = ident.sym.as_str();
        match self.resolve(name) {
            Resolved::Local => {}
            Resolved::TopLevel => {
                self.modifies.insert(name.to_string());
                self.record_reference(ident, false);
            }
            Resolved::Free => {
                self.modifies.insert(name.to_string());
                self.depends_on.insert(name.to_string());
                if self.weak_depth == 0 {
                    self.strongly_depends_on.insert(name.to_string());
                }
                self.record_reference(ident, false);
            }
        }
    }

    /// Declares a name in the current scope, or in the nearest `var` target
    /// when `hoist_to_function` is set. Names landing in the root scope are
    /// recorded as references so the generator can rename the declaration
    /// itself.
    fn declare(&mut self, ident: &ast::Ident, hoist_to_function: bool) {
        let target = if hoist_to_function {
            self.scopes
                .iter()
                .rposition(|scope| scope.is_function)
                .unwrap_or(0)
        } else {
            self.scopes.len() - 1
        };
        self.scopes[target].declare(ident.sym.as_str());
        if target == 0 {
            self.record_reference(ident, false);
        }
    }

    /// Declares every binding a pattern introduces, visiting default-value
    /// expressions and computed keys as ordinary code.
    fn declare_pattern(&mut self, pat: &ast::Pat, hoist: bool) {
        match pat {
            ast::Pat::Ident(binding) => self.declare(&binding.id, hoist),
            ast::Pat::Array(array) => {
                for elem in array.elems.iter().flatten() {
                    self.declare_pattern(elem, hoist);
                }
            }
            ast::Pat::Object(object) => {
                for prop in &object.props {
                    match prop {
                        ast::ObjectPatProp::KeyValue(kv) => {
                            if let ast::PropName::Computed(computed) = &kv.key {
                                computed.expr.visit_with(self);
                            }
                            self.declare_pattern(&kv.value, hoist);
                        }
                        ast::ObjectPatProp::Assign(assign) => {
                            self.declare(&assign.key.id, hoist);
                            if let Some(value) = &assign.value {
                                value.visit_with(self);
                            }
                        }
                        ast::ObjectPatProp::Rest(rest) => self.declare_pattern(&rest.arg, hoist),
                    }
                }
            }
            ast::Pat::Assign(assign) => {
                self.declare_pattern(&assign.left, hoist);
                assign.right.visit_with(self);
            }
            ast::Pat::Rest(rest) => self.declare_pattern(&rest.arg, hoist),
            ast::Pat::Expr(_) | ast::Pat::Invalid(_) => {}
        }
    }

    /// Like declare_pattern, but without evaluating anything: used by the
    /// hoisting pre-pass so later visits see forward-declared names.
    fn hoist_pattern(&mut self, pat: &ast::Pat, hoist: bool) {
        let mut names_buf = Vec::new();
        pattern_names(pat, &mut names_buf);
        let target = if hoist {
            self.scopes
                .iter()
                .rposition(|scope| scope.is_function)
                .unwrap_or(0)
        } else {
            self.scopes.len() - 1
        };
        for name in names_buf {
            self.scopes[target].declare(name);
        }
    }

    /// Pre-declares the bindings of a statement list before walking it, so
    /// that a use before its declaration still resolves locally. `top` is
    /// true for the statements that belong directly to the scope being
    /// entered; nested blocks contribute only their hoisted `var`s.
    fn hoist_stmts(&mut self, stmts: &[ast::Stmt], top: bool) {
        for stmt in stmts {
            self.hoist_stmt(stmt, top);
        }
    }

    fn hoist_stmt(&mut self, stmt: &ast::Stmt, top: bool) {
        match stmt {
            ast::Stmt::Decl(decl) => match decl {
                ast::Decl::Var(var) => {
                    let hoist = var.kind == ast::VarDeclKind::Var;
                    if top || hoist {
                        for declarator in &var.decls {
                            self.hoist_pattern(&declarator.name, hoist);
                        }
                    }
                }
                ast::Decl::Fn(f) => {
                    if top {
                        let target = self.scopes.len() - 1;
                        self.scopes[target].declare(f.ident.sym.as_str());
                    }
                }
                ast::Decl::Class(c) => {
                    if top {
                        let target = self.scopes.len() - 1;
                        self.scopes[target].declare(c.ident.sym.as_str());
                    }
                }
                _ => {}
            },
            ast::Stmt::Block(block) => self.hoist_stmts(&block.stmts, false),
            ast::Stmt::If(s) => {
                self.hoist_stmt(&s.cons, false);
                if let Some(alt) = &s.alt {
                    self.hoist_stmt(alt, false);
                }
            }
            ast::Stmt::For(s) => {
                if let Some(ast::VarDeclOrExpr::VarDecl(var)) = &s.init {
                    if var.kind == ast::VarDeclKind::Var {
                        for declarator in &var.decls {
                            self.hoist_pattern(&declarator.name, true);
                        }
                    }
                }
                self.hoist_stmt(&s.body, false);
            }
            ast::Stmt::ForIn(s) => {
                self.hoist_for_head(&s.left);
                self.hoist_stmt(&s.body, false);
            }
            ast::Stmt::ForOf(s) => {
                self.hoist_for_head(&s.left);
                self.hoist_stmt(&s.body, false);
            }
            ast::Stmt::While(s) => self.hoist_stmt(&s.body, false),
            ast::Stmt::DoWhile(s) => self.hoist_stmt(&s.body, false),
            ast::Stmt::Try(t) => {
                self.hoist_stmts(&t.block.stmts, false);
                if let Some(handler) = &t.handler {
                    self.hoist_stmts(&handler.body.stmts, false);
                }
                if let Some(finalizer) = &t.finalizer {
                    self.hoist_stmts(&finalizer.stmts, false);
                }
            }
            ast::Stmt::Labeled(l) => self.hoist_stmt(&l.body, false),
            ast::Stmt::Switch(s) => {
                for case in &s.cases {
                    self.hoist_stmts(&case.cons, false);
                }
            }
            _ => {}
        }
    }

    fn hoist_for_head(&mut self, head: &ast::ForHead) {
        if let ast::ForHead::VarDecl(var) = head {
            if var.kind == ast::VarDeclKind::Var {
                for declarator in &var.decls {
                    self.hoist_pattern(&declarator.name, true);
                }
            }
        }
    }

    /// Records writes for the idents of a destructuring assignment target.
    fn write_pattern(&mut self, pat: &ast::Pat) {
        match pat {
            ast::Pat::Ident(binding) => self.record_write(&binding.id),
            ast::Pat::Array(array) => {
                for elem in array.elems.iter().flatten() {
                    self.write_pattern(elem);
                }
            }
            ast::Pat::Object(object) => {
                for prop in &object.props {
                    match prop {
                        ast::ObjectPatProp::KeyValue(kv) => {
                            if let ast::PropName::Computed(computed) = &kv.key {
                                computed.expr.visit_with(self);
                            }
                            self.write_pattern(&kv.value);
                        }
                        ast::ObjectPatProp::Assign(assign) => {
                            self.record_write(&assign.key.id);
                            if let Some(value) = &assign.value {
                                value.visit_with(self);
                            }
                        }
                        ast::ObjectPatProp::Rest(rest) => self.write_pattern(&rest.arg),
                    }
                }
            }
            ast::Pat::Assign(assign) => {
                self.write_pattern(&assign.left);
                assign.right.visit_with(self);
            }
            ast::Pat::Rest(rest) => self.write_pattern(&rest.arg),
            ast::Pat::Expr(expr) => match &**expr {
                ast::Expr::Ident(ident) => self.record_write(ident),
                ast::Expr::Member(member) => self.member_root_write(member),
                other => other.visit_with(self),
            },
            ast::Pat::Invalid(_) => {}
        }
    }

    /// `a.b.c = …` counts as a write to `a`; computed keys along the chain
    /// are ordinary reads.
    fn member_root_write(&mut self, member: &ast::MemberExpr) {
        if let ast::MemberProp::Computed(computed) = &member.prop {
            computed.expr.visit_with(self);
        }
        let mut obj = &member.obj;
        loop {
            match &**obj {
                ast::Expr::Member(inner) => {
                    if let ast::MemberProp::Computed(computed) = &inner.prop {
                        computed.expr.visit_with(self);
                    }
                    obj = &inner.obj;
                }
                ast::Expr::Paren(paren) => obj = &paren.expr,
                ast::Expr::Ident(ident) => {
                    self.record_write(ident);
                    break;
                }
                other => {
                    other.visit_with(self);
                    break;
                }
            }
        }
    }

    fn walk_default_decl(&mut self, export: &ast::ExportDefaultDecl) {
        match &export.decl {
            ast::DefaultDecl::Fn(fn_expr) => {
                // `export default function foo` puts foo in the module scope
                if let Some(ident) = &fn_expr.ident {
                    self.declare(ident, false);
                }
                fn_expr.function.visit_with(self);
            }
            ast::DefaultDecl::Class(class_expr) => {
                if let Some(ident) = &class_expr.ident {
                    self.declare(ident, false);
                }
                class_expr.class.visit_with(self);
            }
            ast::DefaultDecl::TsInterfaceDecl(_) => {}
        }
    }

    fn walk_named_export(&mut self, export: &ast::NamedExport) {
        // `export { a, b as c }`: the local names are reads so marking can
        // resolve them; the exported aliases are not identifiers in scope.
        // With a `from` clause the same names resolve through the synthetic
        // imports the module registers for them.
        for specifier in &export.specifiers {
            if let ast::ExportSpecifier::Named(named) = specifier {
                if let ast::ModuleExportName::Ident(ident) = &named.orig {
                    self.record_read(ident, false);
                }
            }
        }
    }

    fn walk_for_head(&mut self, head: &ast::ForHead) {
        match head {
            ast::ForHead::VarDecl(var) => self.visit_var_decl(var),
            ast::ForHead::Pat(pat) => self.write_pattern(pat),
            ast::ForHead::UsingDecl(_) => {}
        }
    }
}

impl Visit for StatementAnalyzer {
    fn visit_ident(&mut self, n: &ast::Ident) {
        self.record_read(n, false);
    }

    fn visit_binding_ident(&mut self, _: &ast::BindingIdent) {
        // bindings are declared through declare_pattern by their owner
    }

    fn visit_var_decl(&mut self, n: &ast::VarDecl) {
        let hoist = n.kind == ast::VarDeclKind::Var;
        for declarator in &n.decls {
            self.declare_pattern(&declarator.name, hoist);
        }
        for declarator in &n.decls {
            if let Some(init) = &declarator.init {
                init.visit_with(self);
            }
        }
    }

    fn visit_fn_decl(&mut self, n: &ast::FnDecl) {
        self.declare(&n.ident, false);
        n.function.visit_with(self);
    }

    fn visit_function(&mut self, n: &ast::Function) {
        self.weak_depth += 1;
        self.push_scope(Scope::function());
        for param in &n.params {
            self.declare_pattern(&param.pat, true);
        }
        if let Some(body) = &n.body {
            self.hoist_stmts(&body.stmts, true);
            body.stmts.visit_with(self);
        }
        self.pop_scope();
        self.weak_depth -= 1;
    }

    fn visit_arrow_expr(&mut self, n: &ast::ArrowExpr) {
        self.weak_depth += 1;
        self.push_scope(Scope::function());
        for param in &n.params {
            self.declare_pattern(param, true);
        }
        match &*n.body {
            ast::BlockStmtOrExpr::BlockStmt(block) => {
                self.hoist_stmts(&block.stmts, true);
                block.stmts.visit_with(self);
            }
            ast::BlockStmtOrExpr::Expr(expr) => expr.visit_with(self),
        }
        self.pop_scope();
        self.weak_depth -= 1;
    }

    fn visit_fn_expr(&mut self, n: &ast::FnExpr) {
        // a function expression's name is only visible inside itself
        self.push_scope(Scope::block());
        if let Some(ident) = &n.ident {
            self.declare(ident, false);
        }
        n.function.visit_with(self);
        self.pop_scope();
    }

    fn visit_class_decl(&mut self, n: &ast::ClassDecl) {
        self.declare(&n.ident, false);
        n.class.visit_with(self);
    }

    fn visit_class_expr(&mut self, n: &ast::ClassExpr) {
        self.push_scope(Scope::block());
        if let Some(ident) = &n.ident {
            self.declare(ident, false);
        }
        n.class.visit_with(self);
        self.pop_scope();
    }

    fn visit_constructor(&mut self, n: &ast::Constructor) {
        self.weak_depth += 1;
        self.push_scope(Scope::function());
        for param in &n.params {
            if let ast::ParamOrTsParamProp::Param(param) = param {
                self.declare_pattern(&param.pat, true);
            }
        }
        if let Some(body) = &n.body {
            self.hoist_stmts(&body.stmts, true);
            body.stmts.visit_with(self);
        }
        self.pop_scope();
        self.weak_depth -= 1;
    }

    fn visit_getter_prop(&mut self, n: &ast::GetterProp) {
        if let ast::PropName::Computed(computed) = &n.key {
            computed.expr.visit_with(self);
        }
        self.weak_depth += 1;
        self.push_scope(Scope::function());
        if let Some(body) = &n.body {
            self.hoist_stmts(&body.stmts, true);
            body.stmts.visit_with(self);
        }
        self.pop_scope();
        self.weak_depth -= 1;
    }

    fn visit_setter_prop(&mut self, n: &ast::SetterProp) {
        if let ast::PropName::Computed(computed) = &n.key {
            computed.expr.visit_with(self);
        }
        self.weak_depth += 1;
        self.push_scope(Scope::function());
        self.declare_pattern(&n.param, true);
        if let Some(body) = &n.body {
            self.hoist_stmts(&body.stmts, true);
            body.stmts.visit_with(self);
        }
        self.pop_scope();
        self.weak_depth -= 1;
    }

    fn visit_block_stmt(&mut self, n: &ast::BlockStmt) {
        self.push_scope(Scope::block());
        self.hoist_stmts(&n.stmts, true);
        n.stmts.visit_with(self);
        self.pop_scope();
    }

    fn visit_catch_clause(&mut self, n: &ast::CatchClause) {
        self.push_scope(Scope::block());
        if let Some(param) = &n.param {
            self.declare_pattern(param, false);
        }
        n.body.visit_with(self);
        self.pop_scope();
    }

    fn visit_for_stmt(&mut self, n: &ast::ForStmt) {
        self.push_scope(Scope::block());
        n.visit_children_with(self);
        self.pop_scope();
    }

    fn visit_for_in_stmt(&mut self, n: &ast::ForInStmt) {
        self.push_scope(Scope::block());
        self.walk_for_head(&n.left);
        n.right.visit_with(self);
        n.body.visit_with(self);
        self.pop_scope();
    }

    fn visit_for_of_stmt(&mut self, n: &ast::ForOfStmt) {
        self.push_scope(Scope::block());
        self.walk_for_head(&n.left);
        n.right.visit_with(self);
        n.body.visit_with(self);
        self.pop_scope();
    }

    fn visit_assign_expr(&mut self, n: &ast::AssignExpr) {
        match &n.left {
            ast::AssignTarget::Simple(simple) => match simple {
                ast::SimpleAssignTarget::Ident(binding) => self.record_write(&binding.id),
                ast::SimpleAssignTarget::Member(member) => self.member_root_write(member),
                ast::SimpleAssignTarget::Paren(paren) => paren.expr.visit_with(self),
                other => other.visit_with(self),
            },
            ast::AssignTarget::Pat(pat) => match pat {
                ast::AssignTargetPat::Array(array) => {
                    for elem in array.elems.iter().flatten() {
                        self.write_pattern(elem);
                    }
                }
                ast::AssignTargetPat::Object(object) => {
                    for prop in &object.props {
                        match prop {
                            ast::ObjectPatProp::KeyValue(kv) => {
                                if let ast::PropName::Computed(computed) = &kv.key {
                                    computed.expr.visit_with(self);
                                }
                                self.write_pattern(&kv.value);
                            }
                            ast::ObjectPatProp::Assign(assign) => {
                                self.record_write(&assign.key.id);
                                if let Some(value) = &assign.value {
                                    value.visit_with(self);
                                }
                            }
                            ast::ObjectPatProp::Rest(rest) => self.write_pattern(&rest.arg),
                        }
                    }
                }
                ast::AssignTargetPat::Invalid(_) => {}
            },
        }
        n.right.visit_with(self);
    }

    fn visit_update_expr(&mut self, n: &ast::UpdateExpr) {
        match &*n.arg {
            ast::Expr::Ident(ident) => self.record_write(ident),
            ast::Expr::Member(member) => self.member_root_write(member),
            other => other.visit_with(self),
        }
    }

    fn visit_prop(&mut self, n: &ast::Prop) {
        if let ast::Prop::Shorthand(ident) = n {
            self.record_read(ident, true);
        } else {
            n.visit_children_with(self);
        }
    }

    fn visit_labeled_stmt(&mut self, n: &ast::LabeledStmt) {
        // the label is not a variable reference
        n.body.visit_with(self);
    }

    fn visit_break_stmt(&mut self, _: &ast::BreakStmt) {}

    fn visit_continue_stmt(&mut self, _: &ast::ContinueStmt) {}

    fn visit_import_decl(&mut self, _: &ast::ImportDecl) {
        // never analysed as a statement
    }
}
