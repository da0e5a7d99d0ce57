use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::system::path::normalize;

/// A batch of file-system changes observed by the host since the previous call.
///
/// Paths are absolute. The worker never observes the disk on its own, so this is
/// the only way it learns that something changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesChange {
    #[serde(default)]
    pub changed_files: Vec<PathBuf>,
    #[serde(default)]
    pub deleted_files: Vec<PathBuf>,
}

impl FilesChange {
    pub fn changed(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            changed_files: paths.into_iter().map(Into::into).collect(),
            deleted_files: Vec::new(),
        }
    }

    pub fn deleted(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            changed_files: Vec::new(),
            deleted_files: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.deleted_files.is_empty()
    }

    /// True if `path` is among the changed or deleted files (normalized comparison).
    pub fn touches(&self, path: &Path) -> bool {
        let target = normalize(path);
        self.changed_files
            .iter()
            .chain(self.deleted_files.iter())
            .any(|p| normalize(p) == target)
    }

    /// Fold a later change into this one.
    ///
    /// A path changed after being deleted is no longer deleted, and a path deleted
    /// after being changed is no longer changed.
    pub fn merge(&mut self, later: FilesChange) {
        for path in later.changed_files {
            let path = normalize(&path);
            self.deleted_files.retain(|p| normalize(p) != path);
            if !self.changed_files.iter().any(|p| normalize(p) == path) {
                self.changed_files.push(path);
            }
        }
        for path in later.deleted_files {
            let path = normalize(&path);
            self.changed_files.retain(|p| normalize(p) != path);
            if !self.deleted_files.iter().any(|p| normalize(p) == path) {
                self.deleted_files.push(path);
            }
        }
    }
}

/// A set of paths described by explicit files plus directory/extension rules.
///
/// Used both for build artifacts (paths the compiler generates) and for project
/// dependencies (paths the host must watch). Snapshots are replaced wholesale,
/// never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesMatch {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
    pub extensions: Vec<String>,
}

impl FilesMatch {
    /// Listed explicitly, or inside a listed directory with a matching extension
    /// and not under an excluded path.
    pub fn is_match(&self, path: &Path) -> bool {
        let path = normalize(path);
        if self.files.iter().any(|f| *f == path) {
            return true;
        }
        if self.excluded.iter().any(|e| path.starts_with(e)) {
            return false;
        }
        let in_dir = self.dirs.iter().any(|d| path.starts_with(d));
        in_dir && self.has_extension(&path)
    }

    fn has_extension(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    /// Union of two snapshots, keeping first-seen order and dropping duplicates.
    pub fn merge(mut self, other: FilesMatch) -> FilesMatch {
        fn extend<T: PartialEq>(into: &mut Vec<T>, from: Vec<T>) {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        extend(&mut self.files, other.files);
        extend(&mut self.dirs, other.dirs);
        extend(&mut self.excluded, other.excluded);
        extend(&mut self.extensions, other.extensions);
        self
    }
}
