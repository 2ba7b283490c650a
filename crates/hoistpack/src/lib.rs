//! A scope-hoisting bundler for ES modules: starting from one entry module
//! it marks the top-level statements actually reachable through imports,
//! assigns every surviving binding a non-colliding name, and emits the
//! result as a single flat module with no wrappers left between files.

mod analyze;
mod bundle;
mod edit;
mod error;
mod generate;
mod loader;
mod module;
mod name;
mod report;
mod scope;
mod statement;

#[cfg(test)]
mod test;

pub use bundle::Bundle;
pub use edit::EditBuffer;
pub use error::BundleError;
pub use loader::{FsLoader, Loader, Resolution, SOURCE_EXTENSIONS};
pub use module::{
    DefaultExport, DefinitionState, ExportBinding, ExportDelegate, ImportBinding, Module,
    ModuleIdx, StmtRef,
};
pub use name::{deconflict, is_reserved_word, make_legal_identifier, NameAllocator, RESERVED_WORDS};
pub use report::{BundleReport, ModuleSummary};
pub use scope::Scope;
pub use statement::{Reference, Statement};
