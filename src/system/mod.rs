//! The system interface handed to the compiler.
//!
//! [`ControlledSystem`] looks like a normal file system with watch and timer
//! support, but nothing happens on its own: change notifications are replayed
//! by the engine (`invoke_file_*`), timers run when the engine drains them, and
//! generated outputs are routed between disk and an in-memory overlay.

pub mod fs;
pub mod layer;
pub mod path;
pub mod timer;
pub mod watch;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::files::FilesMatch;
use fs::{DirEntry, FileSystem, MemFileSystem, PassiveFileSystem, RealFileSystem};
use layer::{Layer, PathKind, layer_for};
use path::{file_name, normalize};
use timer::TimerQueue;
use watch::WatcherRegistry;

pub use layer::OutputMode;
pub use timer::{TimerCallback, TimerId};
pub use watch::{
    DirectoryWatcherCallback, FileWatcherCallback, FileWatcherEventKind, WatcherHandle,
};

/// Everything the compiler needs from its environment.
pub trait System: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;
    fn read_file(&self, path: &Path) -> Option<String>;
    fn directory_exists(&self, path: &Path) -> bool;
    /// Sub-directories of `path` (full paths).
    fn get_directories(&self, path: &Path) -> Vec<PathBuf>;
    /// Files and sub-directories directly inside `path`.
    fn read_dir(&self, path: &Path) -> Vec<DirEntry>;
    fn get_modified_time(&self, path: &Path) -> Option<SystemTime>;
    fn set_modified_time(&self, path: &Path, time: SystemTime) -> io::Result<()>;
    fn write_file(&self, path: &Path, data: &str) -> io::Result<()>;
    fn delete_file(&self, path: &Path) -> io::Result<()>;
    fn create_directory(&self, path: &Path) -> io::Result<()>;
    fn realpath(&self, path: &Path) -> PathBuf;
    fn watch_file(&self, path: &Path, callback: FileWatcherCallback) -> WatcherHandle;
    fn watch_directory(
        &self,
        path: &Path,
        callback: DirectoryWatcherCallback,
        recursive: bool,
    ) -> WatcherHandle;
    fn set_timeout(&self, callback: TimerCallback) -> TimerId;
    fn clear_timeout(&self, id: TimerId);
}

/// Virtual system whose reads, writes, watch notifications and timers are all
/// under the engine's control.
pub struct ControlledSystem {
    this: Weak<ControlledSystem>,
    mode: OutputMode,
    real: Arc<RealFileSystem>,
    passive: PassiveFileSystem,
    memory: MemFileSystem,
    artifacts: RwLock<FilesMatch>,
    seeded: Mutex<HashSet<PathBuf>>,
    deleted: Mutex<HashSet<PathBuf>>,
    watchers: Arc<WatcherRegistry>,
    timers: TimerQueue,
}

impl ControlledSystem {
    pub fn new(mode: OutputMode) -> Arc<Self> {
        let real = Arc::new(RealFileSystem::new());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            mode,
            passive: PassiveFileSystem::new(Arc::clone(&real)),
            real,
            memory: MemFileSystem::new(),
            artifacts: RwLock::new(FilesMatch::default()),
            seeded: Mutex::new(HashSet::new()),
            deleted: Mutex::new(HashSet::new()),
            watchers: WatcherRegistry::new(),
            timers: TimerQueue::new(),
        })
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Replace the artifact snapshot used to classify paths.
    pub fn set_artifacts(&self, artifacts: FilesMatch) {
        *self.artifacts.write() = artifacts;
    }

    pub fn is_artifact(&self, path: &Path) -> bool {
        self.artifacts.read().is_match(path)
    }

    pub fn layer(&self, path: &Path) -> Layer {
        let kind = PathKind::classify(path, self.is_artifact(path));
        layer_for(self.mode, kind)
    }

    /// Clear memoized disk state; called once per cycle before any file access.
    pub fn invalidate_cache(&self) {
        self.real.clear_cache();
    }

    /// Number of files currently held by the in-memory overlay.
    pub fn overlay_len(&self) -> usize {
        self.memory.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Run all scheduled work, including work scheduled while draining.
    pub fn wait_for_queued(&self) -> usize {
        let ran = self.timers.drain();
        if ran > 0 {
            tracing::trace!(ran, "system.drain");
        }
        ran
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    pub fn invoke_file_created(&self, path: &Path) {
        let path = normalize(path);
        self.forget_overlay(&path);
        self.dispatch_created(&path);
    }

    pub fn invoke_file_changed(&self, path: &Path) {
        let path = normalize(path);
        self.forget_overlay(&path);
        self.dispatch_changed(&path);
    }

    pub fn invoke_file_deleted(&self, path: &Path) {
        let path = normalize(path);
        self.forget_overlay(&path);
        self.dispatch_deleted(&path);
    }

    /// An externally reported change makes any overlay copy stale; the next
    /// access re-seeds it from disk.
    fn forget_overlay(&self, path: &Path) {
        if self.layer(path) == Layer::Memory && self.seeded.lock().remove(path) {
            let _ = self.memory.delete_file(path);
        }
    }

    fn dispatch_created(&self, path: &Path) {
        self.deleted.lock().remove(path);
        for callback in self.watchers.file_callbacks(path) {
            callback(path, FileWatcherEventKind::Created);
        }
        self.notify_directories(path);
    }

    fn dispatch_changed(&self, path: &Path) {
        if file_name(path).ends_with(".js")
            && let Some(declaration) = path::replace_suffix(path, &[".js"], ".d.ts")
        {
            for callback in self.watchers.file_callbacks(&declaration) {
                callback(&declaration, FileWatcherEventKind::Changed);
            }
        }

        let was_deleted = self.deleted.lock().contains(path);
        if was_deleted || !self.watchers.has_file_watcher(path) {
            self.dispatch_created(path);
            return;
        }
        for callback in self.watchers.file_callbacks(path) {
            callback(path, FileWatcherEventKind::Changed);
        }
        self.notify_directories(path);
    }

    fn dispatch_deleted(&self, path: &Path) {
        let first_sighting = self.deleted.lock().insert(path.to_path_buf());
        if !first_sighting {
            return;
        }
        for callback in self.watchers.file_callbacks(path) {
            callback(path, FileWatcherEventKind::Deleted);
        }
        self.notify_directories(path);
    }

    fn notify_directories(&self, path: &Path) {
        for callback in self.watchers.directory_callbacks(path) {
            callback(path);
        }
    }

    /// Physical writes notify watchers the way an OS would: later, not inside
    /// the write call.
    fn queue_notification(&self, path: PathBuf, kind: FileWatcherEventKind) {
        let this = self.this.clone();
        self.timers.set_timeout(Box::new(move || {
            if let Some(system) = this.upgrade() {
                match kind {
                    FileWatcherEventKind::Created => system.dispatch_created(&path),
                    FileWatcherEventKind::Changed => system.dispatch_changed(&path),
                    FileWatcherEventKind::Deleted => system.dispatch_deleted(&path),
                }
            }
        }));
    }

    // -----------------------------------------------------------------------
    // Layer routing
    // -----------------------------------------------------------------------

    fn fs_for(&self, path: &Path) -> (&dyn FileSystem, Layer) {
        match self.layer(path) {
            Layer::Real => (self.real.as_ref() as &dyn FileSystem, Layer::Real),
            Layer::Passive => (&self.passive as &dyn FileSystem, Layer::Passive),
            Layer::Memory => {
                self.seed(path);
                (&self.memory as &dyn FileSystem, Layer::Memory)
            }
        }
    }

    /// Copy `path` from disk into the overlay the first time it is accessed.
    fn seed(&self, path: &Path) {
        let mut seeded = self.seeded.lock();
        if !seeded.insert(path.to_path_buf()) {
            return;
        }
        if let Some(content) = self.real.read_file(path) {
            let _ = self.memory.write_file(path, &content);
            if let Some(modified) = self.real.stats(path).and_then(|s| s.modified) {
                let _ = self.memory.set_modified(path, modified);
            }
        }
    }

    fn merged_entries(&self, dir: &Path) -> Vec<DirEntry> {
        let mut entries: Vec<DirEntry> = self
            .real
            .read_dir(dir)
            .into_iter()
            .filter(|e| e.is_dir || self.file_exists(&e.path))
            .collect();
        for entry in self.memory.read_dir(dir) {
            if !entries.iter().any(|e| e.path == entry.path)
                && (entry.is_dir || self.layer(&entry.path) == Layer::Memory)
            {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

impl System for ControlledSystem {
    fn file_exists(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.fs_for(&path).0.file_exists(&path)
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        let path = normalize(path);
        self.fs_for(&path).0.read_file(&path)
    }

    fn directory_exists(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.real.dir_exists(&path) || self.memory.dir_exists(&path)
    }

    fn get_directories(&self, path: &Path) -> Vec<PathBuf> {
        let path = normalize(path);
        self.merged_entries(&path)
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.path)
            .collect()
    }

    fn read_dir(&self, path: &Path) -> Vec<DirEntry> {
        self.merged_entries(&normalize(path))
    }

    fn get_modified_time(&self, path: &Path) -> Option<SystemTime> {
        let path = normalize(path);
        self.fs_for(&path).0.stats(&path).and_then(|s| s.modified)
    }

    fn set_modified_time(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        let path = normalize(path);
        self.fs_for(&path).0.set_modified(&path, time)
    }

    fn write_file(&self, path: &Path, data: &str) -> io::Result<()> {
        let path = normalize(path);
        let (fs, layer) = self.fs_for(&path);
        if layer == Layer::Passive {
            return Ok(());
        }
        let existed = fs.file_exists(&path);
        fs.write_file(&path, data)?;
        let kind = if existed {
            FileWatcherEventKind::Changed
        } else {
            FileWatcherEventKind::Created
        };
        self.queue_notification(path, kind);
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let (fs, layer) = self.fs_for(&path);
        if layer == Layer::Passive || !fs.file_exists(&path) {
            return Ok(());
        }
        fs.delete_file(&path)?;
        self.queue_notification(path, FileWatcherEventKind::Deleted);
        Ok(())
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        // Writes create their parents themselves; the overlay only records the
        // directory so it is visible to the compiler.
        self.memory.create_dir(&normalize(path))
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        let path = normalize(path);
        self.fs_for(&path).0.realpath(&path)
    }

    fn watch_file(&self, path: &Path, callback: FileWatcherCallback) -> WatcherHandle {
        self.watchers.watch_file(normalize(path), callback)
    }

    fn watch_directory(
        &self,
        path: &Path,
        callback: DirectoryWatcherCallback,
        recursive: bool,
    ) -> WatcherHandle {
        self.watchers
            .watch_directory(normalize(path), callback, recursive)
    }

    fn set_timeout(&self, callback: TimerCallback) -> TimerId {
        self.timers.set_timeout(callback)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.timers.clear_timeout(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type EventLog = Arc<Mutex<Vec<(PathBuf, FileWatcherEventKind)>>>;

    fn recording_watcher(system: &ControlledSystem, path: &Path) -> (EventLog, WatcherHandle) {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let handle = system.watch_file(
            path,
            Arc::new(move |p, kind| sink.lock().push((p.to_path_buf(), kind))),
        );
        (log, handle)
    }

    fn artifacts_in(dir: &Path) -> FilesMatch {
        FilesMatch {
            files: vec![dir.join("tsconfig.tsbuildinfo")],
            dirs: vec![dir.join("dist")],
            excluded: Vec::new(),
            extensions: vec![".d.ts".into(), ".js".into()],
        }
    }

    #[test]
    fn test_readonly_mode_keeps_artifact_writes_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let system = ControlledSystem::new(OutputMode::Readonly);
        system.set_artifacts(artifacts_in(&root));

        let output = root.join("dist/a.d.ts");
        system.write_file(&output, "export {};").unwrap();
        assert!(!output.exists(), "readonly mode must not touch the disk");
        assert_eq!(system.overlay_len(), 1);
        assert!(system.file_exists(&output));
        assert_eq!(system.read_file(&output).as_deref(), Some("export {};"));
        assert!(system.directory_exists(&root.join("dist")));
    }

    #[test]
    fn test_write_dts_mode_writes_declarations_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let system = ControlledSystem::new(OutputMode::WriteDts);
        system.set_artifacts(artifacts_in(&root));

        system.write_file(&root.join("dist/a.d.ts"), "export {};").unwrap();
        system.write_file(&root.join("dist/a.js"), "export {};").unwrap();
        assert!(root.join("dist/a.d.ts").exists());
        assert!(!root.join("dist/a.js").exists());
        assert!(system.file_exists(&root.join("dist/a.js")));
    }

    #[test]
    fn test_overlay_is_seeded_once_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("dist/a.d.ts"), "from disk").unwrap();

        let system = ControlledSystem::new(OutputMode::Readonly);
        system.set_artifacts(artifacts_in(&root));
        assert_eq!(
            system.read_file(&root.join("dist/a.d.ts")).as_deref(),
            Some("from disk")
        );

        std::fs::write(root.join("dist/a.d.ts"), "changed on disk").unwrap();
        system.invalidate_cache();
        assert_eq!(
            system.read_file(&root.join("dist/a.d.ts")).as_deref(),
            Some("from disk")
        );

        system.invoke_file_changed(&root.join("dist/a.d.ts"));
        assert_eq!(
            system.read_file(&root.join("dist/a.d.ts")).as_deref(),
            Some("changed on disk")
        );
    }

    #[test]
    fn test_source_writes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let system = ControlledSystem::new(OutputMode::WriteReferences);
        let file = dir.path().join("src/a.ts");
        system.write_file(&file, "x").unwrap();
        assert!(!file.exists());
        assert_eq!(system.pending_timers(), 0);
    }

    #[test]
    fn test_changed_without_watcher_is_promoted_to_created() {
        let system = ControlledSystem::new(OutputMode::Readonly);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _dir = system.watch_directory(
            Path::new("/p/src"),
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        );
        system.invoke_file_changed(Path::new("/p/src/new.ts"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (log, _handle) = recording_watcher(&system, Path::new("/p/src/new.ts"));
        system.invoke_file_changed(Path::new("/p/src/new.ts"));
        assert_eq!(
            *log.lock(),
            vec![(PathBuf::from("/p/src/new.ts"), FileWatcherEventKind::Changed)]
        );
    }

    #[test]
    fn test_change_after_delete_is_created_and_delete_is_idempotent() {
        let system = ControlledSystem::new(OutputMode::Readonly);
        let path = Path::new("/p/src/a.ts");
        let (log, _handle) = recording_watcher(&system, path);

        system.invoke_file_deleted(path);
        system.invoke_file_deleted(path);
        system.invoke_file_changed(path);
        system.invoke_file_changed(path);

        let kinds: Vec<_> = log.lock().iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                FileWatcherEventKind::Deleted,
                FileWatcherEventKind::Created,
                FileWatcherEventKind::Changed,
            ]
        );
    }

    #[test]
    fn test_js_change_refires_sibling_declaration_watcher() {
        let system = ControlledSystem::new(OutputMode::Readonly);
        let (log, _handle) = recording_watcher(&system, Path::new("/p/node_modules/lib/index.d.ts"));
        system.invoke_file_changed(Path::new("/p/node_modules/lib/index.js"));
        assert_eq!(
            *log.lock(),
            vec![(
                PathBuf::from("/p/node_modules/lib/index.d.ts"),
                FileWatcherEventKind::Changed
            )]
        );
    }

    #[test]
    fn test_physical_writes_notify_after_drain() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let system = ControlledSystem::new(OutputMode::Readonly);
        system.set_artifacts(artifacts_in(&root));
        let output = root.join("dist/a.d.ts");
        let (log, _handle) = recording_watcher(&system, &output);

        system.write_file(&output, "one").unwrap();
        system.write_file(&output, "two").unwrap();
        system.delete_file(&output).unwrap();
        assert!(log.lock().is_empty());

        assert_eq!(system.wait_for_queued(), 3);
        let kinds: Vec<_> = log.lock().iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                FileWatcherEventKind::Created,
                FileWatcherEventKind::Changed,
                FileWatcherEventKind::Deleted,
            ]
        );
    }

    #[test]
    fn test_read_dir_merges_overlay_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("dist/old.d.ts"), "").unwrap();

        let system = ControlledSystem::new(OutputMode::Readonly);
        system.set_artifacts(artifacts_in(&root));
        system.write_file(&root.join("dist/new.d.ts"), "").unwrap();
        system.delete_file(&root.join("dist/old.d.ts")).unwrap();

        let names: Vec<_> = system
            .read_dir(&root.join("dist"))
            .into_iter()
            .map(|e| file_name(&e.path).to_string())
            .collect();
        assert_eq!(names, vec!["new.d.ts".to_string()]);
        assert!(root.join("dist/old.d.ts").exists());
    }
}
