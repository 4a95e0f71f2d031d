use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extension of interface-only files, tried when `use "name"` has none.
pub const HEADER_EXT: &str = "eh";

/// Filesystem capability the parser needs to follow `use` directives.
pub trait SourceLoader {
    /// Maps an included name to a file, searching next to `from` first and
    /// then the include path. The returned path identifies the file for the
    /// include-once check.
    fn resolve(&self, name: &str, from: Option<&Path>) -> Option<PathBuf>;

    fn read(&self, path: &Path) -> io::Result<String>;
}

pub fn candidates(name: &str) -> Vec<PathBuf> {
    let path = PathBuf::from(name);
    if path.extension().is_some() {
        vec![path]
    } else {
        vec![path.clone(), path.with_extension(HEADER_EXT)]
    }
}

fn search_dirs(from: Option<&Path>, include_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    match from.and_then(Path::parent) {
        Some(dir) => dirs.push(dir.to_path_buf()),
        None => dirs.push(PathBuf::new()),
    }
    dirs.extend(include_paths.iter().cloned());
    dirs
}

#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    include_paths: Vec<PathBuf>,
}

impl FsLoader {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }
}

impl SourceLoader for FsLoader {
    fn resolve(&self, name: &str, from: Option<&Path>) -> Option<PathBuf> {
        let dirs = search_dirs(from, &self.include_paths);
        for dir in &dirs {
            for candidate in candidates(name) {
                let path = dir.join(candidate);
                if path.is_file() {
                    log::trace!("resolved `{name}` to {}", path.display());
                    return Some(fs::canonicalize(&path).unwrap_or(path));
                }
            }
        }
        None
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// In-memory sources keyed by path, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
    include_paths: Vec<PathBuf>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), source.into());
        self
    }

    pub fn with_include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_paths.push(dir.into());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn resolve(&self, name: &str, from: Option<&Path>) -> Option<PathBuf> {
        let dirs = search_dirs(from, &self.include_paths);
        for dir in &dirs {
            for candidate in candidates(name) {
                let path = dir.join(candidate);
                if self.files.contains_key(&path) {
                    return Some(path);
                }
            }
        }
        None
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }
}
