use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileWatcherEventKind {
    Created,
    Changed,
    Deleted,
}

pub type FileWatcherCallback = Arc<dyn Fn(&Path, FileWatcherEventKind) + Send + Sync>;
/// Receives the path of the entry that changed inside the watched directory.
pub type DirectoryWatcherCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    File,
    Directory,
    RecursiveDirectory,
}

#[derive(Default)]
struct Registrations {
    files: HashMap<PathBuf, Vec<(u64, FileWatcherCallback)>>,
    dirs: HashMap<PathBuf, Vec<(u64, DirectoryWatcherCallback)>>,
    recursive_dirs: HashMap<PathBuf, Vec<(u64, DirectoryWatcherCallback)>>,
}

/// Watcher callbacks keyed by normalized absolute path.
///
/// Callbacks are cloned out before they run, so a callback may register or
/// close watchers without deadlocking.
#[derive(Default)]
pub struct WatcherRegistry {
    inner: Mutex<Registrations>,
    next_id: AtomicU64,
}

impl WatcherRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn watch_file(self: &Arc<Self>, path: PathBuf, callback: FileWatcherCallback) -> WatcherHandle {
        let id = self.next_id();
        self.inner
            .lock()
            .files
            .entry(path.clone())
            .or_default()
            .push((id, callback));
        WatcherHandle::new(self, WatchKind::File, path, id)
    }

    pub fn watch_directory(
        self: &Arc<Self>,
        path: PathBuf,
        callback: DirectoryWatcherCallback,
        recursive: bool,
    ) -> WatcherHandle {
        let id = self.next_id();
        let kind = {
            let mut inner = self.inner.lock();
            let (map, kind) = if recursive {
                (&mut inner.recursive_dirs, WatchKind::RecursiveDirectory)
            } else {
                (&mut inner.dirs, WatchKind::Directory)
            };
            map.entry(path.clone()).or_default().push((id, callback));
            kind
        };
        WatcherHandle::new(self, kind, path, id)
    }

    pub fn has_file_watcher(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .files
            .get(path)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn file_callbacks(&self, path: &Path) -> Vec<FileWatcherCallback> {
        self.inner
            .lock()
            .files
            .get(path)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Non-recursive watchers on `path`'s parent plus recursive watchers on every ancestor.
    pub fn directory_callbacks(&self, path: &Path) -> Vec<DirectoryWatcherCallback> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        if let Some(parent) = path.parent()
            && let Some(list) = inner.dirs.get(parent)
        {
            out.extend(list.iter().map(|(_, cb)| Arc::clone(cb)));
        }
        for ancestor in path.ancestors().skip(1) {
            if let Some(list) = inner.recursive_dirs.get(ancestor) {
                out.extend(list.iter().map(|(_, cb)| Arc::clone(cb)));
            }
        }
        out
    }

    /// Number of registered callbacks of every kind.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        let count = |m: &HashMap<PathBuf, Vec<_>>| m.values().map(Vec::len).sum::<usize>();
        inner.files.values().map(Vec::len).sum::<usize>()
            + count(&inner.dirs)
            + count(&inner.recursive_dirs)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, kind: WatchKind, path: &Path, id: u64) {
        let mut inner = self.inner.lock();
        match kind {
            WatchKind::File => remove_entry(&mut inner.files, path, id),
            WatchKind::Directory => remove_entry(&mut inner.dirs, path, id),
            WatchKind::RecursiveDirectory => remove_entry(&mut inner.recursive_dirs, path, id),
        }
    }
}

fn remove_entry<T>(map: &mut HashMap<PathBuf, Vec<(u64, T)>>, path: &Path, id: u64) {
    if let Some(list) = map.get_mut(path) {
        list.retain(|(entry, _)| *entry != id);
        if list.is_empty() {
            map.remove(path);
        }
    }
}

/// Registration token returned by `watch_file` / `watch_directory`.
///
/// Closing (or dropping) the handle removes exactly this callback.
pub struct WatcherHandle {
    registry: Weak<WatcherRegistry>,
    kind: WatchKind,
    path: PathBuf,
    id: u64,
}

impl WatcherHandle {
    fn new(registry: &Arc<WatcherRegistry>, kind: WatchKind, path: PathBuf, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            kind,
            path,
            id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, &self.path, self.id);
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, DirectoryWatcherCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb_hits = Arc::clone(&hits);
        let cb: DirectoryWatcherCallback = Arc::new(move |_| {
            cb_hits.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn test_close_removes_only_that_callback() {
        let registry = WatcherRegistry::new();
        let noop: FileWatcherCallback = Arc::new(|_, _| {});
        let a = registry.watch_file(PathBuf::from("/p/a.ts"), Arc::clone(&noop));
        let _b = registry.watch_file(PathBuf::from("/p/a.ts"), noop);
        assert_eq!(registry.file_callbacks(Path::new("/p/a.ts")).len(), 2);

        a.close();
        a.close();
        assert_eq!(registry.file_callbacks(Path::new("/p/a.ts")).len(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = WatcherRegistry::new();
        let (_, cb) = counter();
        {
            let _handle = registry.watch_directory(PathBuf::from("/p"), cb, true);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_directory_callbacks_match_parent_and_recursive_ancestors() {
        let registry = WatcherRegistry::new();
        let (parent_hits, parent_cb) = counter();
        let (grand_hits, grand_cb) = counter();
        let (recursive_hits, recursive_cb) = counter();
        let _p = registry.watch_directory(PathBuf::from("/p/src/a"), parent_cb, false);
        let _g = registry.watch_directory(PathBuf::from("/p/src"), grand_cb, false);
        let _r = registry.watch_directory(PathBuf::from("/p"), recursive_cb, true);

        for cb in registry.directory_callbacks(Path::new("/p/src/a/b.ts")) {
            cb(Path::new("/p/src/a/b.ts"));
        }
        assert_eq!(parent_hits.load(Ordering::SeqCst), 1);
        assert_eq!(grand_hits.load(Ordering::SeqCst), 0);
        assert_eq!(recursive_hits.load(Ordering::SeqCst), 1);
    }
}
