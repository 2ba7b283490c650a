use std::fs;
use std::path::{Path, PathBuf};

use path_slash::PathExt;

/// A throwaway module graph on disk, for driving the filesystem loader in
/// tests. The root is canonicalised up front so the ids the bundle registers
/// compare stably against [`ModuleTree::id`].
pub struct ModuleTree {
    // holds the tempdir alive for the lifetime of the fixture
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl ModuleTree {
    /// Writes each `(relative path, source)` pair under a fresh temp dir,
    /// creating intermediate directories as needed.
    pub fn new(files: &[(&str, &str)]) -> std::io::Result<ModuleTree> {
        let dir = tempfile::tempdir()?;
        let root = fs::canonicalize(dir.path())?;
        for (relative, source) in files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, source)?;
        }
        Ok(ModuleTree { _dir: dir, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a module file in the tree.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// The id the bundle registers for this file: its absolute path in
    /// slash form.
    pub fn id(&self, relative: &str) -> String {
        self.path(relative).to_slash_lossy().to_string()
    }
}

/// Builds a [`ModuleTree`] from `path => source` pairs:
///
/// ```
/// let tree = module_fixture::module_tree!(
///     "main.js" => "import { a } from './m.js';",
///     "m.js" => "export const a = 1;"
/// );
/// assert!(tree.path("m.js").is_file());
/// ```
#[macro_export]
macro_rules! module_tree {
    ( $($path:expr => $source:expr),+ $(,)? ) => {
        $crate::ModuleTree::new(&[$(($path, $source)),+])
            .expect("the fixture tree should be writable")
    };
}
