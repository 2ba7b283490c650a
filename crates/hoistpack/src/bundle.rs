use std::path::{Path, PathBuf};

use ahashmap::{AHashMap, AHashSet};
use logger::Logger;
use path_slash::PathExt;
use swc_ecma_ast as ast;

use crate::error::BundleError;
use crate::loader::{Loader, Resolution};
use crate::module::{
    DefinitionState, ExportBinding, Module, ModuleIdx, StmtRef,
};
use crate::name::{make_legal_identifier, NameAllocator};

/// One bundle build: the module registry, the marking traversal and its
/// results. The bundle exclusively owns its modules; `ModuleIdx` handles
/// replace back-references, and all mutation happens from the single build
/// call chain.
pub struct Bundle<TLoader: Loader, TLogger: Logger> {
    loader: TLoader,
    logger: TLogger,
    pub entry_module: Option<ModuleIdx>,
    entry_dir: PathBuf,
    pub modules: Vec<Module>,
    pub module_by_id: AHashMap<String, ModuleIdx>,
    /// Free names that resolved to no import and no definition anywhere;
    /// they stay unrenamed in the output.
    pub assumed_globals: AHashSet<String>,
    /// Modules whose namespace is materialised as an object literal, in
    /// first-use order.
    pub internal_namespace_modules: Vec<ModuleIdx>,
    /// The included statements, in execution order, after `build`.
    pub statements: Vec<StmtRef>,
}

impl<TLoader: Loader, TLogger: Logger> Bundle<TLoader, TLogger> {
    pub fn new(loader: TLoader, logger: TLogger) -> Self {
        Bundle {
            loader,
            logger,
            entry_module: None,
            entry_dir: PathBuf::new(),
            modules: Vec::new(),
            module_by_id: AHashMap::default(),
            assumed_globals: AHashSet::default(),
            internal_namespace_modules: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn module(&self, idx: ModuleIdx) -> &Module {
        &self.modules[idx.0]
    }

    /// Fetches, parses and marks the graph reachable from `entry`. After
    /// this returns, `statements` holds the included statements in the
    /// order they must execute.
    pub fn build(&mut self, entry: &str) -> Result<(), BundleError> {
        let entry_idx = self.fetch_module(entry, None)?;
        self.entry_module = Some(entry_idx);
        self.entry_dir = Path::new(&self.modules[entry_idx.0].id)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let expanded = self.expand_all_statements(entry_idx, true)?;
        // a statement can be returned through several memoised paths; its
        // first occurrence decides its position
        let mut seen: AHashSet<StmtRef> = AHashSet::default();
        self.statements = expanded
            .into_iter()
            .filter(|sref| seen.insert(*sref))
            .collect();
        Ok(())
    }

    /// Resolves a specifier, loading and registering the module on first
    /// sight. Memoised by resolved id.
    pub fn fetch_module(
        &mut self,
        source: &str,
        importer: Option<ModuleIdx>,
    ) -> Result<ModuleIdx, BundleError> {
        let importer_id = importer.map(|idx| self.modules[idx.0].id.clone());
        match self.loader.resolve(source, importer_id.as_deref())? {
            Resolution::External(id) => {
                if let Some(existing) = self.module_by_id.get(&id) {
                    return Ok(*existing);
                }
                self.logger
                    .info(format!("treating '{id}' as an external module"));
                let idx = ModuleIdx(self.modules.len());
                self.module_by_id.insert(id.clone(), idx);
                self.modules.push(Module::external(id));
                Ok(idx)
            }
            Resolution::Id(id) => {
                if let Some(existing) = self.module_by_id.get(&id) {
                    return Ok(*existing);
                }
                let text = self.loader.load(&id)?;
                let module = Module::from_source(id.clone(), text)?;
                let idx = ModuleIdx(self.modules.len());
                self.module_by_id.insert(id, idx);
                self.modules.push(module);
                Ok(idx)
            }
        }
    }

    /// Walks a module's statements in source order: side-effect imports pull
    /// the imported module in wholesale, `export { … }` lists only matter in
    /// the entry module, and everything else is expanded.
    pub(crate) fn expand_all_statements(
        &mut self,
        midx: ModuleIdx,
        is_entry_module: bool,
    ) -> Result<Vec<StmtRef>, BundleError> {
        enum Plan {
            SideEffectImport(String),
            SkippedImport,
            ExportSpecifiers,
            Expand,
        }

        let mut all = Vec::new();
        let count = self.modules[midx.0].statements.len();
        for index in 0..count {
            let plan = {
                let statement = &self.modules[midx.0].statements[index];
                if statement.is_included {
                    continue;
                }
                match &statement.node {
                    ast::ModuleItem::ModuleDecl(ast::ModuleDecl::Import(import)) => {
                        if import.specifiers.is_empty() {
                            Plan::SideEffectImport(import.src.value.to_string())
                        } else {
                            Plan::SkippedImport
                        }
                    }
                    ast::ModuleItem::ModuleDecl(ast::ModuleDecl::ExportNamed(export))
                        if !export.specifiers.is_empty() =>
                    {
                        Plan::ExportSpecifiers
                    }
                    _ => Plan::Expand,
                }
            };
            match plan {
                Plan::SideEffectImport(source) => {
                    // flag the import itself so a cyclic side-effect chain
                    // terminates; import statements never emit code
                    self.modules[midx.0].statements[index].is_included = true;
                    let child = self.fetch_module(&source, Some(midx))?;
                    if !self.modules[child.0].is_external {
                        all.extend(self.expand_all_statements(child, false)?);
                    }
                }
                Plan::SkippedImport => {}
                Plan::ExportSpecifiers => {
                    // `export { … }` carries no code of its own, but in the
                    // entry module it must prove the listed names exist
                    if is_entry_module {
                        all.extend(self.expand_statement(StmtRef {
                            module: midx,
                            index,
                        })?);
                    }
                }
                Plan::Expand => {
                    all.extend(self.expand_statement(StmtRef {
                        module: midx,
                        index,
                    })?);
                }
            }
        }

        if let Some(default_ref) = self.modified_default_ref(midx) {
            reposition_default_export(&mut all, default_ref);
        }
        Ok(all)
    }

    /// Includes one statement: its dependencies first, then the statement,
    /// then any statements that reassign a name it declares.
    fn expand_statement(&mut self, sref: StmtRef) -> Result<Vec<StmtRef>, BundleError> {
        {
            let statement = &mut self.modules[sref.module.0].statements[sref.index];
            if statement.is_included {
                return Ok(Vec::new());
            }
            statement.is_included = true;
        }

        let (dependencies, defines) = {
            let statement = &self.modules[sref.module.0].statements[sref.index];
            let mut defines: Vec<String> = statement.defines.iter().cloned().collect();
            defines.sort();
            (statement.ordered_dependencies(), defines)
        };

        let mut result = Vec::new();
        for name in &dependencies {
            result.extend(self.define(sref.module, name)?);
        }
        result.push(sref);
        for name in &defines {
            let modifiers = self.modules[sref.module.0]
                .modifications
                .get(name)
                .cloned()
                .unwrap_or_default();
            for index in modifiers {
                if !self.modules[sref.module.0].statements[index].is_included {
                    result.extend(self.expand_statement(StmtRef {
                        module: sref.module,
                        index,
                    })?);
                }
            }
        }
        Ok(result)
    }

    /// The marking dispatch of one `(module, name)` request. Memoised: a
    /// re-entrant request during resolution returns the empty sequence
    /// (cycle shortcut); a later request returns the memoised sequence.
    pub(crate) fn define(
        &mut self,
        midx: ModuleIdx,
        name: &str,
    ) -> Result<Vec<StmtRef>, BundleError> {
        match self.modules[midx.0].definition_results.get(name) {
            Some(DefinitionState::InProgress) => return Ok(Vec::new()),
            Some(DefinitionState::Done(list)) => return Ok(list.clone()),
            None => {}
        }
        self.modules[midx.0]
            .definition_results
            .insert(name.to_string(), DefinitionState::InProgress);
        let result = self.define_uncached(midx, name)?;
        self.modules[midx.0]
            .definition_results
            .insert(name.to_string(), DefinitionState::Done(result.clone()));
        Ok(result)
    }

    fn define_uncached(
        &mut self,
        midx: ModuleIdx,
        name: &str,
    ) -> Result<Vec<StmtRef>, BundleError> {
        // the definition lives in another module
        if let Some(import) = self.modules[midx.0].imports.get(name).cloned() {
            let target = match import.module {
                Some(target) => target,
                None => {
                    let target = self.fetch_module(&import.source, Some(midx))?;
                    if let Some(binding) = self.modules[midx.0].imports.get_mut(name) {
                        binding.module = Some(target);
                    }
                    target
                }
            };

            if import.name == "default" {
                let mut suggestion = self.modules[midx.0]
                    .suggested_names
                    .get(&import.local_name)
                    .cloned()
                    .unwrap_or_else(|| import.local_name.clone());
                while !self.modules[target.0].is_external
                    && self.modules[target.0].imports.contains_key(&suggestion)
                {
                    suggestion = format!("_{suggestion}");
                }
                self.modules[target.0].suggest_name("default", &suggestion);
            } else if import.name == "*" {
                self.modules[target.0].suggest_name("*", &import.local_name);
                self.modules[target.0]
                    .suggest_name("default", &format!("{}__default", import.local_name));
            }

            if self.modules[target.0].is_external {
                if import.name == "default" {
                    self.modules[target.0].needs_default = true;
                } else if import.name == "*" {
                    self.modules[target.0].needs_all = true;
                } else {
                    self.modules[target.0].needs_named = true;
                }
                self.modules[target.0].imported_by_bundle.push(import);
                return Ok(Vec::new());
            }

            if import.name == "*" {
                if !self.internal_namespace_modules.contains(&target) {
                    self.internal_namespace_modules.push(target);
                }
                return self.expand_all_statements(target, false);
            }

            if let Some(binding) = self.modules[target.0].exports.get_mut(&import.name) {
                binding.mark_used();
                let local = binding.local_name().to_string();
                return if import.name == "default" {
                    self.define(target, "default")
                } else {
                    self.define(target, &local)
                };
            }
            return self.search_export_delegates(target, &import.name, midx);
        }

        // `export default function foo` behaves like a declaration of foo
        if name == "default" {
            match self.modules[midx.0].exports.get("default").cloned() {
                Some(ExportBinding::Default(default)) => {
                    if default.is_declaration {
                        if let Some(declared) = &default.declared_name {
                            return self.define(midx, declared);
                        }
                    }
                    let sref = StmtRef {
                        module: midx,
                        index: default.statement_index,
                    };
                    let mut list = self.expand_statement(sref)?;
                    if default.identifier.is_some() && default.is_modified {
                        reposition_default_export(&mut list, sref);
                    }
                    return Ok(list);
                }
                Some(ExportBinding::Specifier { local_name, .. }) => {
                    return self.define(midx, &local_name);
                }
                Some(ExportBinding::Declaration { local_name, .. }) => {
                    return self.define(midx, &local_name);
                }
                None => return Ok(Vec::new()),
            }
        }

        // the definition, if any, is in this module
        match self.modules[midx.0].definitions.get(name).copied() {
            Some(index) => {
                if self.modules[midx.0].statements[index].is_included {
                    Ok(Vec::new())
                } else {
                    self.expand_statement(StmtRef {
                        module: midx,
                        index,
                    })
                }
            }
            None => {
                // a dependency recorded by delegate resolution points at the
                // module that actually defines the name
                if let Some(delegate_index) = self.modules[midx.0].export_alls.get(name).copied() {
                    if let Some(submodule) =
                        self.modules[midx.0].export_delegates[delegate_index].module
                    {
                        return self.define(submodule, name);
                    }
                }
                // neither defined nor imported anywhere: a host global
                if self.assumed_globals.insert(name.to_string()) {
                    self.logger
                        .warn(format!("treating '{name}' as an external global"));
                }
                Ok(Vec::new())
            }
        }
    }

    /// Resolves `name` through `export * from` delegates in declaration
    /// order; the first delegate that yields statements wins.
    fn search_export_delegates(
        &mut self,
        midx: ModuleIdx,
        name: &str,
        importer: ModuleIdx,
    ) -> Result<Vec<StmtRef>, BundleError> {
        let count = self.modules[midx.0].export_delegates.len();
        for delegate_index in 0..count {
            let (source, statement_index, resolved) = {
                let delegate = &self.modules[midx.0].export_delegates[delegate_index];
                (
                    delegate.source.clone(),
                    delegate.statement_index,
                    delegate.module,
                )
            };
            let submodule = match resolved {
                Some(submodule) => submodule,
                None => {
                    let submodule = self.fetch_module(&source, Some(midx))?;
                    self.modules[midx.0].export_delegates[delegate_index].module = Some(submodule);
                    submodule
                }
            };
            let result = self.define(submodule, name)?;
            if !result.is_empty() {
                self.modules[midx.0]
                    .export_alls
                    .insert(name.to_string(), delegate_index);
                // future ordering must see the edge from the delegating
                // statement to the resolved name
                let statement = &mut self.modules[midx.0].statements[statement_index];
                statement.depends_on.insert(name.to_string());
                statement.strongly_depends_on.insert(name.to_string());
                return Ok(result);
            }
        }
        Err(BundleError::NoSuchExport {
            module: self.modules[midx.0].id.clone(),
            name: name.to_string(),
            importer: self.modules[importer.0].id.clone(),
        })
    }

    fn modified_default_ref(&self, midx: ModuleIdx) -> Option<StmtRef> {
        let module = &self.modules[midx.0];
        if !module.default_is_modified_identifier() {
            return None;
        }
        match module.exports.get("default") {
            Some(ExportBinding::Default(default)) => Some(StmtRef {
                module: midx,
                index: default.statement_index,
            }),
            _ => None,
        }
    }

    /// The identifier a local name is emitted as, resolved across module
    /// boundaries and memoised per module.
    pub fn get_canonical_name(&mut self, midx: ModuleIdx, local_name: &str) -> String {
        {
            let module = &self.modules[midx.0];
            if local_name == "default" && module.exports.contains_key("default") {
                let modified = matches!(
                    module.exports.get("default"),
                    Some(ExportBinding::Default(d)) if d.is_modified
                );
                // a reassigned default needs its own binding, and an
                // unsuggested one has no importer-chosen name to take
                if modified || !module.suggested_names.contains_key("default") {
                    return self.default_name_for_module(midx);
                }
            }
        }

        let mut local = local_name.to_string();
        if let Some(suggested) = self.modules[midx.0].suggested_names.get(&local) {
            local = suggested.clone();
        }
        if let Some(canonical) = self.modules[midx.0].canonical_names.get(&local) {
            return canonical.clone();
        }

        let canonical = match self.modules[midx.0].imports.get(&local).cloned() {
            Some(import) => match import.module {
                Some(target) if import.name == "*" => self.modules[target.0]
                    .suggested_names
                    .get("*")
                    .cloned()
                    .unwrap_or_else(|| local.clone()),
                Some(target) => {
                    let exporter_local = if self.modules[target.0].is_external {
                        import.name.clone()
                    } else if let Some(export) = self.modules[target.0].exports.get(&import.name) {
                        export.local_name().to_string()
                    } else {
                        // satisfied through an export delegate: the name is
                        // resolved in the delegating module
                        import.name.clone()
                    };
                    self.get_canonical_name(target, &exporter_local)
                }
                // the import was never traversed, so nothing was renamed
                None => local.clone(),
            },
            None => local.clone(),
        };
        self.modules[midx.0]
            .canonical_names
            .insert(local, canonical.clone());
        canonical
    }

    /// The identifier the value of an export is available under, for the
    /// namespace getters and the entry export block.
    pub(crate) fn exported_canonical(&mut self, midx: ModuleIdx, exported_name: &str) -> String {
        let binding = self.modules[midx.0].exports.get(exported_name).cloned();
        match binding {
            Some(ExportBinding::Default(default)) => {
                if default.is_declaration {
                    if let Some(declared) = &default.declared_name {
                        return self.get_canonical_name(midx, declared);
                    }
                }
                self.get_canonical_name(midx, "default")
            }
            Some(ExportBinding::Declaration { local_name, .. })
            | Some(ExportBinding::Specifier { local_name, .. }) => {
                self.get_canonical_name(midx, &local_name)
            }
            None => self.get_canonical_name(midx, exported_name),
        }
    }

    /// Name for a module's default export when none was suggested or the
    /// suggestion cannot be used: derived from the module id relative to the
    /// entry directory.
    fn default_name_for_module(&self, midx: ModuleIdx) -> String {
        let module = &self.modules[midx.0];
        let module_path = Path::new(&module.id);
        let relative = pathdiff::diff_paths(module_path, &self.entry_dir).unwrap_or_else(|| {
            module_path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(module.id.clone()))
        });
        let slashed = relative.to_slash_lossy().to_string();
        let base = slashed
            .strip_suffix(".js")
            .or_else(|| slashed.strip_suffix(".mjs"))
            .unwrap_or(&slashed);
        let mut name = make_legal_identifier(base);
        while module.definitions.contains_key(&name) {
            name = format!("_{name}");
        }
        name
    }

    /// Renames colliding top-level bindings so every surviving statement can
    /// share one scope. The definer closest to the entry module keeps the
    /// original name. Runs once, before generation.
    pub(crate) fn deconflict(&mut self) {
        let mut definers: AHashMap<String, Vec<ModuleIdx>> = AHashMap::default();
        for sref in &self.statements {
            let statement = &self.modules[sref.module.0].statements[sref.index];
            let mut defined: Vec<&String> = statement.defines.iter().collect();
            defined.sort();
            for name in defined {
                let entry = definers.entry(name.clone()).or_default();
                if !entry.contains(&sref.module) {
                    entry.push(sref.module);
                }
            }
        }

        let mut allocator = NameAllocator::new();
        for name in definers.keys() {
            allocator.reserve(name.clone());
        }

        let mut conflicting: Vec<String> = definers
            .iter()
            .filter(|(_, modules)| modules.len() > 1)
            .map(|(name, _)| name.clone())
            .collect();
        conflicting.sort();
        for name in conflicting {
            let mut modules = definers[&name].clone();
            modules.pop();
            for midx in modules {
                let replacement = allocator.claim(&name);
                self.logger.info(format!(
                    "renamed '{}' in {} to '{}'",
                    name, self.modules[midx.0].id, replacement
                ));
                self.modules[midx.0].rename(&name, &replacement);
            }
        }

        // namespace objects and external bindings claim their names after
        // the local definers
        let namespace_modules = self.internal_namespace_modules.clone();
        for midx in namespace_modules {
            self.fix_suggestion(midx, "*", &mut allocator);
        }
        let externals: Vec<ModuleIdx> = (0..self.modules.len())
            .map(ModuleIdx)
            .filter(|midx| self.modules[midx.0].is_external)
            .collect();
        for midx in externals {
            if self.modules[midx.0].needs_default {
                self.fix_suggestion(midx, "default", &mut allocator);
            }
            if self.modules[midx.0].needs_all {
                self.fix_suggestion(midx, "*", &mut allocator);
            }
        }
    }

    fn fix_suggestion(&mut self, midx: ModuleIdx, key: &str, allocator: &mut NameAllocator) {
        let Some(current) = self.modules[midx.0].suggested_names.get(key).cloned() else {
            return;
        };
        let claimed = allocator.claim(&current);
        if claimed != current {
            self.logger.info(format!(
                "renamed the '{}' binding of {} to '{}'",
                key, self.modules[midx.0].id, claimed
            ));
            self.modules[midx.0]
                .suggested_names
                .insert(key.to_string(), claimed);
        }
    }
}

/// The naive expansion of a reassigned default export places the `export
/// default` statement after every statement affecting its identifier; put it
/// back right after the last earlier statement of its own module.
fn reposition_default_export(list: &mut Vec<StmtRef>, default_ref: StmtRef) {
    let Some(position) = list.iter().position(|sref| *sref == default_ref) else {
        return;
    };
    list.remove(position);
    let insert_at = list
        .iter()
        .rposition(|sref| sref.module == default_ref.module && sref.index < default_ref.index)
        .map(|p| p + 1)
        .unwrap_or(list.len());
    list.insert(insert_at, default_ref);
}
