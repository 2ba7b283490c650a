use std::path::{Path, PathBuf};

use path_clean::PathClean as _;
use path_slash::PathExt;

use crate::error::BundleError;

/// Extensions probed, in order, when a specifier does not name a file
/// directly.
pub const SOURCE_EXTENSIONS: &[&str] = &["js", "mjs"];

/// What a specifier resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Source the loader can read; the string is the module id.
    Id(String),
    /// A bare specifier left to the runtime (`import 'lodash'`).
    External(String),
}

/// Maps specifiers to module ids and reads module source. The bundle calls
/// `resolve` relative to the importing module and memoises the result by id,
/// so a loader sees each specifier once per importer.
pub trait Loader {
    fn resolve(&self, source: &str, importer: Option<&str>) -> Result<Resolution, BundleError>;
    fn load(&self, id: &str) -> Result<String, BundleError>;
}

impl<T: Loader> Loader for &T {
    fn resolve(&self, source: &str, importer: Option<&str>) -> Result<Resolution, BundleError> {
        (*self).resolve(source, importer)
    }
    fn load(&self, id: &str) -> Result<String, BundleError> {
        (*self).load(id)
    }
}

/// Filesystem loader. Relative specifiers resolve against the importer's
/// directory with extension probing; bare specifiers are external.
pub struct FsLoader {
    pub extensions: Vec<String>,
}

impl FsLoader {
    pub fn new() -> Self {
        FsLoader {
            extensions: SOURCE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        let joined = candidate.to_string_lossy();
        for extension in &self.extensions {
            let with_extension = PathBuf::from(format!("{joined}.{extension}"));
            if with_extension.is_file() {
                return Some(with_extension);
            }
        }
        None
    }
}

impl Default for FsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader for FsLoader {
    fn resolve(&self, source: &str, importer: Option<&str>) -> Result<Resolution, BundleError> {
        let relative = source.starts_with("./") || source.starts_with("../");
        // the entry specifier (no importer) is always a path
        if importer.is_some() && !relative && !Path::new(source).is_absolute() {
            return Ok(Resolution::External(source.to_string()));
        }

        let candidate = match importer {
            Some(importer_id) => Path::new(importer_id)
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(source),
            None => {
                let cwd = std::env::current_dir().map_err(|e| BundleError::Io {
                    file: source.to_string(),
                    source: e,
                })?;
                cwd.join(source)
            }
        }
        .clean();

        match self.probe(&candidate) {
            Some(path) => Ok(Resolution::Id(path.to_slash_lossy().to_string())),
            None => Err(BundleError::ModuleNotFound {
                specifier: source.to_string(),
                importer: importer.unwrap_or("<entry>").to_string(),
            }),
        }
    }

    fn load(&self, id: &str) -> Result<String, BundleError> {
        std::fs::read_to_string(id).map_err(|e| BundleError::Io {
            file: id.to_string(),
            source: e,
        })
    }
}
