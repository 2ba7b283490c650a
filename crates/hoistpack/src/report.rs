use std::fmt::Display;

use logger::Logger;
use serde::Serialize;

use crate::bundle::Bundle;
use crate::loader::Loader;

/// Per-module slice of a [`BundleReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub is_external: bool,
    pub total_statements: usize,
    pub included_statements: usize,
    pub used_exports: usize,
}

/// What a build kept and what it assumed, for tooling and logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BundleReport {
    /// In fetch order, the entry module first.
    pub modules: Vec<ModuleSummary>,
    pub assumed_globals: Vec<String>,
    pub external_modules: Vec<String>,
}

impl BundleReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Display for BundleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for module in &self.modules {
            if module.is_external {
                writeln!(f, "{} is external", module.id)?;
                continue;
            }
            writeln!(
                f,
                "{}: {}/{} statement{} included, {} export{} used",
                module.id,
                module.included_statements,
                module.total_statements,
                if module.total_statements == 1 { "" } else { "s" },
                module.used_exports,
                if module.used_exports == 1 { "" } else { "s" },
            )?;
        }
        if !self.assumed_globals.is_empty() {
            writeln!(f, "assumed globals: {}", self.assumed_globals.join(", "))?;
        }
        Ok(())
    }
}

impl<TLoader: Loader, TLogger: Logger> Bundle<TLoader, TLogger> {
    pub fn report(&self) -> BundleReport {
        let modules = self
            .modules
            .iter()
            .map(|module| ModuleSummary {
                id: module.id.clone(),
                is_external: module.is_external,
                total_statements: module.statements.len(),
                included_statements: module.included_statement_count(),
                used_exports: module
                    .exports
                    .values()
                    .filter(|export| export.is_used())
                    .count(),
            })
            .collect();
        let mut assumed_globals: Vec<String> = self.assumed_globals.iter().cloned().collect();
        assumed_globals.sort();
        let external_modules = self
            .modules
            .iter()
            .filter(|module| module.is_external)
            .map(|module| module.id.clone())
            .collect();
        BundleReport {
            modules,
            assumed_globals,
            external_modules,
        }
    }
}
