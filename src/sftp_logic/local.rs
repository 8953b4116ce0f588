use std::path::{Component, Path, PathBuf};

use crate::models::DirectoryPair;

/// Where a remote file lands locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPath {
    pub path: PathBuf,
    /// True when the relative layout could not be preserved and only the base name was used
    pub degraded: bool,
}

/// Map a remote file path into the local tree of `pair`, keeping its position relative to
/// `pair.remote_root`.
///
/// Paths outside the remote root (or ones whose relative part would climb out of the local
/// root) fall back to `local_root/<basename>` with `degraded` set.
pub fn map_to_local(remote_file: &Path, pair: &DirectoryPair) -> MappedPath {
    if let Some(relative) = relative_under(remote_file, &pair.remote_root) {
        return MappedPath {
            path: pair.local_root.join(relative),
            degraded: false,
        };
    }

    MappedPath {
        path: pair.local_root.join(fallback_name(remote_file)),
        degraded: true,
    }
}

/// Relative path of `remote_file` below `remote_root`, made only of normal components
fn relative_under(remote_file: &Path, remote_root: &Path) -> Option<PathBuf> {
    let relative = remote_file.strip_prefix(remote_root).ok()?;

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn fallback_name(remote_file: &Path) -> PathBuf {
    match remote_file.file_name() {
        Some(name) => PathBuf::from(name),
        // Paths like "/" or "a/.." have no base name; flatten what is left.
        None => {
            let flat: Vec<String> = remote_file
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect();
            if flat.is_empty() {
                PathBuf::from("unnamed")
            } else {
                PathBuf::from(flat.join("_"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> DirectoryPair {
        DirectoryPair::new("/data/out", "/sync/host1")
    }

    #[test]
    fn nested_file_keeps_relative_layout() {
        let mapped = map_to_local(Path::new("/data/out/a/b.csv"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/a/b.csv"));
        assert!(!mapped.degraded);
    }

    #[test]
    fn file_directly_under_root() {
        let mapped = map_to_local(Path::new("/data/out/report.txt"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/report.txt"));
        assert!(!mapped.degraded);
    }

    #[test]
    fn trailing_slash_on_remote_root_is_ignored() {
        let pair = DirectoryPair::new("/data/out/", "/sync/host1");
        let mapped = map_to_local(Path::new("/data/out/x/y/z.bin"), &pair);
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/x/y/z.bin"));
        assert!(!mapped.degraded);
    }

    #[test]
    fn file_outside_root_falls_back_to_basename() {
        let mapped = map_to_local(Path::new("/elsewhere/deep/b.csv"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/b.csv"));
        assert!(mapped.degraded);
    }

    #[test]
    fn sibling_with_common_string_prefix_is_not_under_root() {
        let mapped = map_to_local(Path::new("/data/outgoing/b.csv"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/b.csv"));
        assert!(mapped.degraded);
    }

    #[test]
    fn parent_components_cannot_escape_local_root() {
        let mapped = map_to_local(Path::new("/data/out/../../etc/passwd"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/passwd"));
        assert!(mapped.degraded);
    }

    #[test]
    fn remote_root_itself_is_degraded() {
        let mapped = map_to_local(Path::new("/data/out"), &pair());
        assert_eq!(mapped.path, PathBuf::from("/sync/host1/out"));
        assert!(mapped.degraded);
    }

    #[test]
    fn mapping_is_deterministic() {
        let a = map_to_local(Path::new("/data/out/a/b.csv"), &pair());
        let b = map_to_local(Path::new("/data/out/a/b.csv"), &pair());
        assert_eq!(a, b);
    }
}
