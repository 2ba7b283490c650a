use swc_common::{SourceMap, Span};

/// Errors surfaced by a bundle build. All of them carry the offending file
/// id; span-addressed errors carry a 1-based line and column.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("could not parse {file}:{line}:{col}: {message}")]
    Parse {
        file: String,
        line: usize,
        col: usize,
        message: String,
    },
    #[error("duplicated import '{local_name}' in {file}:{line}:{col}")]
    DuplicateImport {
        file: String,
        local_name: String,
        line: usize,
        col: usize,
    },
    #[error("module {module} does not export {name} (imported by {importer})")]
    NoSuchExport {
        module: String,
        name: String,
        importer: String,
    },
    #[error("could not resolve '{specifier}' (imported by {importer})")]
    ModuleNotFound { specifier: String, importer: String },
    #[error("could not read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{what} is not supported")]
    NotSupported { what: String },
}

/// Resolves a span to a 1-based (line, column) pair within its source map.
pub(crate) fn line_col(source_map: &SourceMap, span: Span) -> (usize, usize) {
    let loc = source_map.lookup_char_pos(span.lo);
    (loc.line, loc.col_display + 1)
}
