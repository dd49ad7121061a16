use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Lexically normalize a path: make it absolute against the current directory
/// and fold `.` and `..` components. Does not touch the file system beyond
/// reading the current directory.
///
/// # Errors
/// Returns an error if the path is empty or the current directory is unavailable.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty path"));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `/..` stays `/`
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Canonical key for a directory or file path.
///
/// Existing paths are canonicalized (symlinks resolved, no `\\?\` prefix on
/// Windows); paths that do not exist yet fall back to [`normalize_path`], so
/// the same spelling always maps to the same key.
///
/// # Errors
/// Returns an error if the path is empty or the current directory is unavailable.
pub fn canonical_path(path: &Path) -> io::Result<PathBuf> {
    let normalized = normalize_path(path)?;
    Ok(dunce::canonicalize(&normalized).unwrap_or(normalized))
}
