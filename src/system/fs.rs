use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Result of a stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub is_file: bool,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// One storage backend the controlled system can route a path to.
///
/// Lookups that fail (missing path, permission error) report "not found"
/// instead of an error.
pub trait FileSystem: Send + Sync {
    fn stats(&self, path: &Path) -> Option<FileStats>;
    fn read_file(&self, path: &Path) -> Option<String>;
    /// Immediate children of `path`.
    fn read_dir(&self, path: &Path) -> Vec<DirEntry>;
    fn write_file(&self, path: &Path, data: &str) -> io::Result<()>;
    fn delete_file(&self, path: &Path) -> io::Result<()>;
    fn create_dir(&self, path: &Path) -> io::Result<()>;
    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()>;
    fn realpath(&self, path: &Path) -> PathBuf;

    fn file_exists(&self, path: &Path) -> bool {
        self.stats(path).is_some_and(|s| s.is_file)
    }

    fn dir_exists(&self, path: &Path) -> bool {
        self.stats(path).is_some_and(|s| s.is_dir)
    }
}

// ---------------------------------------------------------------------------
// Real disk
// ---------------------------------------------------------------------------

/// Disk-backed file system that memoizes stats, reads, listings and realpaths
/// until [`RealFileSystem::clear_cache`] is called.
#[derive(Default)]
pub struct RealFileSystem {
    stats: Mutex<HashMap<PathBuf, Option<FileStats>>>,
    contents: Mutex<HashMap<PathBuf, Option<String>>>,
    listings: Mutex<HashMap<PathBuf, Vec<DirEntry>>>,
    realpaths: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl RealFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything memoized by previous calls.
    pub fn clear_cache(&self) {
        self.stats.lock().clear();
        self.contents.lock().clear();
        self.listings.lock().clear();
        self.realpaths.lock().clear();
    }

    fn evict(&self, path: &Path) {
        self.stats.lock().remove(path);
        self.contents.lock().remove(path);
        self.realpaths.lock().remove(path);
        let mut listings = self.listings.lock();
        listings.remove(path);
        if let Some(parent) = path.parent() {
            listings.remove(parent);
        }
    }
}

impl FileSystem for RealFileSystem {
    fn stats(&self, path: &Path) -> Option<FileStats> {
        if let Some(cached) = self.stats.lock().get(path) {
            return *cached;
        }
        let stats = std::fs::metadata(path).ok().map(|m| FileStats {
            is_file: m.is_file(),
            is_dir: m.is_dir(),
            modified: m.modified().ok(),
        });
        self.stats.lock().insert(path.to_path_buf(), stats);
        stats
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        if let Some(cached) = self.contents.lock().get(path) {
            return cached.clone();
        }
        let content = std::fs::read_to_string(path).ok();
        self.contents
            .lock()
            .insert(path.to_path_buf(), content.clone());
        content
    }

    fn read_dir(&self, path: &Path) -> Vec<DirEntry> {
        if let Some(cached) = self.listings.lock().get(path) {
            return cached.clone();
        }

        // Plain listing: TypeScript does not honour .gitignore, so the walker's
        // standard filters are off.
        let walker = ignore::WalkBuilder::new(path)
            .standard_filters(false)
            .max_depth(Some(1))
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                path: entry.path().to_path_buf(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        self.listings
            .lock()
            .insert(path.to_path_buf(), entries.clone());
        entries
    }

    fn write_file(&self, path: &Path, data: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            self.evict(parent);
        }
        std::fs::write(path, data)?;
        self.evict(path);
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        let result = std::fs::remove_file(path);
        self.evict(path);
        match result {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)?;
        self.evict(path);
        Ok(())
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        let file = std::fs::File::options().write(true).open(path)?;
        file.set_modified(time)?;
        self.evict(path);
        Ok(())
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        if let Some(cached) = self.realpaths.lock().get(path) {
            return cached.clone();
        }
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.realpaths
            .lock()
            .insert(path.to_path_buf(), resolved.clone());
        resolved
    }
}

// ---------------------------------------------------------------------------
// In-memory overlay
// ---------------------------------------------------------------------------

struct MemFile {
    content: String,
    modified: SystemTime,
}

#[derive(Default)]
struct MemTree {
    files: HashMap<PathBuf, MemFile>,
    dirs: HashSet<PathBuf>,
}

impl MemTree {
    fn add_ancestors(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if !self.dirs.insert(dir.to_path_buf()) {
                break;
            }
            current = dir.parent();
        }
    }
}

/// Purely in-memory file system. Never touches the disk.
#[derive(Default)]
pub struct MemFileSystem {
    tree: Mutex<MemTree>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileSystem for MemFileSystem {
    fn stats(&self, path: &Path) -> Option<FileStats> {
        let tree = self.tree.lock();
        if let Some(file) = tree.files.get(path) {
            return Some(FileStats {
                is_file: true,
                is_dir: false,
                modified: Some(file.modified),
            });
        }
        tree.dirs.contains(path).then_some(FileStats {
            is_file: false,
            is_dir: true,
            modified: None,
        })
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        self.tree.lock().files.get(path).map(|f| f.content.clone())
    }

    fn read_dir(&self, path: &Path) -> Vec<DirEntry> {
        let tree = self.tree.lock();
        let files = tree.files.keys().map(|p| (p, false));
        let dirs = tree.dirs.iter().map(|p| (p, true));
        let mut entries: Vec<DirEntry> = files
            .chain(dirs)
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, is_dir)| DirEntry {
                path: p.clone(),
                is_dir,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    fn write_file(&self, path: &Path, data: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        tree.add_ancestors(path);
        tree.files.insert(
            path.to_path_buf(),
            MemFile {
                content: data.to_string(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        self.tree.lock().files.remove(path);
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree.lock();
        tree.add_ancestors(path);
        tree.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        match self.tree.lock().files.get_mut(path) {
            Some(file) => {
                file.modified = time;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not in memory", path.display()),
            )),
        }
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

// ---------------------------------------------------------------------------
// Pass-through
// ---------------------------------------------------------------------------

/// Reads go straight to the (memoized) disk, writes are dropped.
pub struct PassiveFileSystem {
    real: Arc<RealFileSystem>,
}

impl PassiveFileSystem {
    pub fn new(real: Arc<RealFileSystem>) -> Self {
        Self { real }
    }
}

impl FileSystem for PassiveFileSystem {
    fn stats(&self, path: &Path) -> Option<FileStats> {
        self.real.stats(path)
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        self.real.read_file(path)
    }

    fn read_dir(&self, path: &Path) -> Vec<DirEntry> {
        self.real.read_dir(path)
    }

    fn write_file(&self, _path: &Path, _data: &str) -> io::Result<()> {
        Ok(())
    }

    fn delete_file(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn create_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn set_modified(&self, _path: &Path, _time: SystemTime) -> io::Result<()> {
        Ok(())
    }

    fn realpath(&self, path: &Path) -> PathBuf {
        self.real.realpath(path)
    }
}
