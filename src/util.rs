//! Path helpers shared by the file watcher and the metrics scan.

use std::path::{Component, Path};

/// Directories skipped by default when watching or scanning a worktree.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Render `path` relative to `root` with `/` separators.
///
/// Returns `None` when `path` is not inside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// True if any segment of a `/`-separated relative path is an ignored directory name.
pub fn is_ignored(relative: &str, ignored: &[String]) -> bool {
    relative
        .split('/')
        .any(|segment| ignored.iter().any(|dir| dir == segment))
}
