//! Lexical path helpers.
//!
//! Nothing here touches the filesystem. Build files name paths relative to
//! their own directory and freely use `..`, so everything stored in the tree
//! goes through [`clean_path`] first.

use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components without following symlinks.
///
/// A `..` that would climb above the root of an absolute path is dropped;
/// on a relative path it is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Join `path` onto `base` unless it is already absolute, then clean it.
pub fn absolute_from(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean_path(path)
    } else {
        clean_path(&base.join(path))
    }
}

/// Whether `path` lies strictly below `dir`.
pub fn is_child_of(path: &Path, dir: &Path) -> bool {
    path != dir && path.starts_with(dir)
}

/// `path` relative to `base`, walking up with `..` where needed.
///
/// Returns `None` when the two paths share no root.
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();

    if path_parts.first() != base_parts.first() && path.is_absolute() {
        return None;
    }

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Some(relative)
}

/// Render a path the way qmake files spell them: forward slashes only.
pub fn to_qmake_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// File name without its last extension, or an empty string.
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path_resolves_dots() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(clean_path(Path::new("../x/../y")), PathBuf::from("../y"));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_absolute_from() {
        let base = Path::new("/proj/app");
        assert_eq!(absolute_from(base, Path::new("../lib/a.cpp")), PathBuf::from("/proj/lib/a.cpp"));
        assert_eq!(absolute_from(base, Path::new("/abs/b.h")), PathBuf::from("/abs/b.h"));
    }

    #[test]
    fn test_is_child_of() {
        assert!(is_child_of(Path::new("/p/src/a.cpp"), Path::new("/p")));
        assert!(!is_child_of(Path::new("/p"), Path::new("/p")));
        assert!(!is_child_of(Path::new("/pp/a.cpp"), Path::new("/p")));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/p/src/a.cpp"), Path::new("/p")),
            Some(PathBuf::from("src/a.cpp"))
        );
        assert_eq!(
            relative_to(Path::new("/p/lib/b.h"), Path::new("/p/app")),
            Some(PathBuf::from("../lib/b.h"))
        );
        assert_eq!(relative_to(Path::new("/p"), Path::new("/p")), Some(PathBuf::from(".")));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/p/app.pro")), "app");
        assert_eq!(base_name(Path::new("/")), "");
    }
}
