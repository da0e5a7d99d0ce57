use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::system::System;
use crate::system::path::{file_name, normalize};

/// Extensions the compiler accepts as inputs, longest first so `.d.ts` wins
/// over `.ts`.
const SUPPORTED: &[(&str, bool)] = &[
    (".d.ts", false),
    (".d.mts", false),
    (".d.cts", false),
    (".tsx", false),
    (".ts", false),
    (".mts", false),
    (".cts", false),
    (".jsx", true),
    (".js", true),
    (".mjs", true),
    (".cjs", true),
];

/// Files with the same stem shadow each other within a group; earlier entries win.
const SHADOW_GROUPS: &[&[&str]] = &[
    &[".ts", ".tsx", ".d.ts", ".js", ".jsx"],
    &[".mts", ".d.mts", ".mjs"],
    &[".cts", ".d.cts", ".cjs"],
];

/// Directory names excluded when the configuration does not say otherwise.
pub const DEFAULT_EXCLUDES: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// `include`/`exclude` patterns of one configuration, relative to `base_dir`.
#[derive(Debug, Clone, Default)]
pub struct FileSpecs {
    pub base_dir: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub allow_js: bool,
}

/// A directory whose contents can change the matched file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardDirectory {
    pub path: PathBuf,
    pub recursive: bool,
}

struct IncludeSpec {
    base: PathBuf,
    pattern: Pattern,
    recursive: bool,
}

/// Returns the matched extension and whether it is a JavaScript one.
pub fn supported_extension(path: &Path) -> Option<(&'static str, bool)> {
    let name = file_name(path);
    SUPPORTED
        .iter()
        .find(|(ext, _)| name.len() > ext.len() && name.ends_with(ext))
        .copied()
}

/// Input extensions accepted under the given `allowJs` setting.
pub fn supported_extensions(allow_js: bool) -> Vec<&'static str> {
    SUPPORTED
        .iter()
        .filter(|(_, is_js)| allow_js || !is_js)
        .map(|(ext, _)| *ext)
        .collect()
}

pub fn is_supported(path: &Path, allow_js: bool) -> bool {
    supported_extension(path).is_some_and(|(_, is_js)| allow_js || !is_js)
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// Absolute pattern text for an include entry. A last segment without wildcard
/// or extension names a directory and matches everything below it.
fn include_pattern(base_dir: &Path, spec: &str) -> String {
    let joined = normalize(&base_dir.join(spec));
    let mut text = joined.to_string_lossy().into_owned();
    let last = file_name(&joined);
    if last == "**" {
        text.push_str("/*");
    } else if !has_wildcard(last) && !last.contains('.') {
        text.push_str("/**/*");
    }
    text
}

/// Split a pattern into its literal directory prefix and whether anything
/// below the prefix spans more than one level.
fn literal_base(pattern: &str) -> (PathBuf, bool) {
    let mut base = PathBuf::new();
    let mut rest = Vec::new();
    for segment in Path::new(pattern).iter() {
        let text = segment.to_string_lossy();
        if rest.is_empty() && !has_wildcard(&text) {
            base.push(segment);
        } else {
            rest.push(text.into_owned());
        }
    }
    if rest.is_empty() {
        // Plain file path: its directory is the one to watch.
        let parent = base.parent().map(Path::to_path_buf).unwrap_or_default();
        return (parent, false);
    }
    let recursive = rest.len() > 1 || rest.iter().any(|s| s == "**");
    (base, recursive)
}

fn compile_includes(specs: &FileSpecs) -> Vec<IncludeSpec> {
    specs
        .include
        .iter()
        .filter_map(|spec| {
            let text = include_pattern(&specs.base_dir, spec);
            let pattern = Pattern::new(&text).ok()?;
            let (base, recursive) = literal_base(&text);
            Some(IncludeSpec {
                base,
                pattern,
                recursive,
            })
        })
        .collect()
}

fn compile_excludes(specs: &FileSpecs) -> Vec<Pattern> {
    specs
        .exclude
        .iter()
        .filter_map(|spec| {
            let text = normalize(&specs.base_dir.join(spec));
            Pattern::new(&text.to_string_lossy()).ok()
        })
        .collect()
}

/// An exclude pattern matches the path itself or any of its ancestors.
fn is_excluded(path: &Path, excludes: &[Pattern]) -> bool {
    excludes
        .iter()
        .any(|ex| path.ancestors().any(|a| ex.matches_path_with(a, MATCH_OPTIONS)))
}

fn collect_files(system: &dyn System, dir: &Path, excludes: &[Pattern], out: &mut Vec<PathBuf>) {
    for entry in system.read_dir(dir) {
        if is_excluded(&entry.path, excludes) {
            continue;
        }
        if entry.is_dir {
            collect_files(system, &entry.path, excludes, out);
        } else {
            out.push(entry.path);
        }
    }
}

/// Expand `include`/`exclude` into the sorted list of matching input files.
///
/// Order follows the include list; files found by several includes are kept
/// once. Within a directory, `a.ts` shadows `a.d.ts` and `a.js`.
pub fn match_files(system: &dyn System, specs: &FileSpecs) -> Vec<PathBuf> {
    let includes = compile_includes(specs);
    let excludes = compile_excludes(specs);

    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    for include in &includes {
        if !system.directory_exists(&include.base) {
            continue;
        }
        let mut found = Vec::new();
        collect_files(system, &include.base, &excludes, &mut found);
        found.sort();
        for file in found {
            if include.pattern.matches_path_with(&file, MATCH_OPTIONS)
                && is_supported(&file, specs.allow_js)
                && seen.insert(file.clone())
            {
                matched.push(file);
            }
        }
    }

    remove_shadowed(matched)
}

/// True if `path` would be picked up by `specs` were it to exist.
pub fn matches_specs(specs: &FileSpecs, path: &Path) -> bool {
    let path = normalize(path);
    if !is_supported(&path, specs.allow_js) || is_excluded(&path, &compile_excludes(specs)) {
        return false;
    }
    compile_includes(specs)
        .iter()
        .any(|include| include.pattern.matches_path_with(&path, MATCH_OPTIONS))
}

fn shadow_key(path: &Path) -> Option<(PathBuf, usize, usize)> {
    let (ext, _) = supported_extension(path)?;
    let (group, rank) = SHADOW_GROUPS.iter().enumerate().find_map(|(g, exts)| {
        exts.iter().position(|e| *e == ext).map(|rank| (g, rank))
    })?;
    let name = file_name(path);
    let stem = path.with_file_name(&name[..name.len() - ext.len()]);
    Some((stem, group, rank))
}

fn remove_shadowed(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut best: HashMap<(PathBuf, usize), usize> = HashMap::new();
    for file in &files {
        if let Some((stem, group, rank)) = shadow_key(file) {
            best.entry((stem, group))
                .and_modify(|r| *r = (*r).min(rank))
                .or_insert(rank);
        }
    }
    files
        .into_iter()
        .filter(|file| match shadow_key(file) {
            Some((stem, group, rank)) => best.get(&(stem, group)) == Some(&rank),
            None => true,
        })
        .collect()
}

/// Directories the include patterns look into. Nested entries already covered
/// by a recursive ancestor are dropped.
pub fn wildcard_directories(specs: &FileSpecs) -> Vec<WildcardDirectory> {
    let mut dirs: Vec<WildcardDirectory> = Vec::new();
    for include in compile_includes(specs) {
        let covered = dirs
            .iter()
            .any(|d| include.base.starts_with(&d.path) && (d.recursive || d.path == include.base));
        if covered {
            continue;
        }
        dirs.retain(|d| !(include.recursive && d.path.starts_with(&include.base)));
        dirs.push(WildcardDirectory {
            path: include.base,
            recursive: include.recursive,
        });
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{ControlledSystem, OutputMode};
    use std::fs;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export {};").unwrap();
    }

    fn specs(root: &Path, include: &[&str], exclude: &[&str]) -> FileSpecs {
        FileSpecs {
            base_dir: root.to_path_buf(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            allow_js: false,
        }
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_bare_directory_includes_everything_below() {
        let dir = tmp();
        let root = normalize(dir.path());
        write(&root, "src/a.ts");
        write(&root, "src/nested/b.tsx");
        write(&root, "src/readme.md");
        write(&root, "other/c.ts");

        let system = ControlledSystem::new(OutputMode::Readonly);
        let files = match_files(system.as_ref(), &specs(&root, &["src"], &[]));
        assert_eq!(relative(&root, &files), vec!["src/a.ts", "src/nested/b.tsx"]);
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let dir = tmp();
        let root = normalize(dir.path());
        write(&root, "src/a.ts");
        write(&root, "src/nested/b.ts");

        let system = ControlledSystem::new(OutputMode::Readonly);
        let files = match_files(system.as_ref(), &specs(&root, &["src/*"], &[]));
        assert_eq!(relative(&root, &files), vec!["src/a.ts"]);
    }

    #[test]
    fn test_excludes_apply_to_directories_and_files() {
        let dir = tmp();
        let root = normalize(dir.path());
        write(&root, "src/a.ts");
        write(&root, "src/a.test.ts");
        write(&root, "node_modules/pkg/index.ts");
        write(&root, "dist/a.d.ts");

        let system = ControlledSystem::new(OutputMode::Readonly);
        let files = match_files(
            system.as_ref(),
            &specs(&root, &["**/*"], &["node_modules", "dist", "**/*.test.ts"]),
        );
        assert_eq!(relative(&root, &files), vec!["src/a.ts"]);
    }

    #[test]
    fn test_ts_shadows_declaration_and_js() {
        let dir = tmp();
        let root = normalize(dir.path());
        write(&root, "src/a.ts");
        write(&root, "src/a.d.ts");
        write(&root, "src/a.js");
        write(&root, "src/b.d.ts");

        let system = ControlledSystem::new(OutputMode::Readonly);
        let mut spec = specs(&root, &["src"], &[]);
        spec.allow_js = true;
        let files = match_files(system.as_ref(), &spec);
        assert_eq!(relative(&root, &files), vec!["src/a.ts", "src/b.d.ts"]);
    }

    #[test]
    fn test_js_needs_allow_js() {
        let dir = tmp();
        let root = normalize(dir.path());
        write(&root, "src/a.js");

        let system = ControlledSystem::new(OutputMode::Readonly);
        assert!(match_files(system.as_ref(), &specs(&root, &["src"], &[])).is_empty());
    }

    #[test]
    fn test_matches_specs_without_touching_disk() {
        let root = PathBuf::from("/p");
        let spec = specs(&root, &["src"], &["src/generated"]);
        assert!(matches_specs(&spec, Path::new("/p/src/new.ts")));
        assert!(!matches_specs(&spec, Path::new("/p/src/generated/x.ts")));
        assert!(!matches_specs(&spec, Path::new("/p/src/style.css")));
        assert!(!matches_specs(&spec, Path::new("/p/lib/a.ts")));
    }

    #[test]
    fn test_wildcard_directories() {
        let root = PathBuf::from("/p");
        let dirs = wildcard_directories(&specs(&root, &["src", "src/nested/*", "types/*.d.ts"], &[]));
        assert_eq!(
            dirs,
            vec![
                WildcardDirectory {
                    path: PathBuf::from("/p/src"),
                    recursive: true
                },
                WildcardDirectory {
                    path: PathBuf::from("/p/types"),
                    recursive: false
                },
            ]
        );
    }
}
