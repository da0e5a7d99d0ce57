use std::path::{Component, Path, PathBuf};

/// Make `path` absolute and lexically resolve `.` and `..` components.
///
/// Does not touch the disk, so it works for paths that do not exist (yet).
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// File name as UTF-8, or an empty string.
pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Replace a multi-part extension such as `.d.ts` or `.ts` with `replacement`.
///
/// `strip` lists candidate suffixes, longest first.
pub fn replace_suffix(path: &Path, strip: &[&str], replacement: &str) -> Option<PathBuf> {
    let name = file_name(path);
    let suffix = strip.iter().find(|s| name.ends_with(*s))?;
    let stem = &name[..name.len() - suffix.len()];
    Some(path.with_file_name(format!("{stem}{replacement}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_dot_segments() {
        assert_eq!(
            normalize(Path::new("/p/src/./a/../b.ts")),
            PathBuf::from("/p/src/b.ts")
        );
    }

    #[test]
    fn test_normalize_makes_relative_paths_absolute() {
        assert!(normalize(Path::new("src/a.ts")).is_absolute());
    }

    #[test]
    fn test_replace_suffix_prefers_longest_candidate() {
        let out = replace_suffix(Path::new("/p/a.d.ts"), &[".d.ts", ".ts"], ".js");
        assert_eq!(out, Some(PathBuf::from("/p/a.js")));
        assert_eq!(replace_suffix(Path::new("/p/a.css"), &[".ts"], ".js"), None);
    }
}
