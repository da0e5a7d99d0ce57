//! Snapshots of generated outputs (artifacts) and of the inputs a host has to
//! watch (dependencies). Both are computed from one configuration generation
//! and every project it references.

use std::sync::Arc;

use crate::compiler::emit::declaration_path;
use crate::compiler::tsconfig::ParsedConfig;
use crate::files::FilesMatch;
use crate::walker::supported_extensions;

/// Suffixes of everything the compiler may generate.
const ARTIFACT_EXTENSIONS: &[&str] = &[
    ".d.ts",
    ".d.mts",
    ".d.cts",
    ".d.ts.map",
    ".js",
    ".mjs",
    ".cjs",
    ".js.map",
    ".tsbuildinfo",
];

pub fn artifacts(projects: &[Arc<ParsedConfig>]) -> FilesMatch {
    projects
        .iter()
        .map(|config| project_artifacts(config))
        .fold(FilesMatch::default(), FilesMatch::merge)
}

fn project_artifacts(config: &ParsedConfig) -> FilesMatch {
    let options = &config.options;
    let mut out = FilesMatch {
        extensions: ARTIFACT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        ..FilesMatch::default()
    };

    if let Some(build_info) = options.build_info_path() {
        out.files.push(build_info);
    }
    if options.no_emit {
        return out;
    }
    for dir in [&options.out_dir, &options.declaration_dir].into_iter().flatten() {
        if !out.dirs.contains(dir) {
            out.dirs.push(dir.clone());
        }
    }
    if options.declaration_output_dir().is_none() && options.emits_declarations() {
        out.files.extend(
            config
                .file_names
                .iter()
                .filter_map(|source| declaration_path(config, source)),
        );
    }
    out
}

pub fn dependencies(projects: &[Arc<ParsedConfig>]) -> FilesMatch {
    let mut out = projects
        .iter()
        .map(|config| project_dependencies(config))
        .fold(FilesMatch::default(), FilesMatch::merge);
    // Outputs of one project may sit inside another project's directories.
    let outputs = artifacts(projects);
    for dir in outputs.dirs {
        if !out.excluded.contains(&dir) {
            out.excluded.push(dir);
        }
    }
    out
}

fn project_dependencies(config: &ParsedConfig) -> FilesMatch {
    let mut files = vec![config.config_path.clone()];
    files.extend(config.extended_paths.iter().cloned());
    files.extend(config.file_names.iter().cloned());

    let dirs = config
        .wildcard_directories
        .iter()
        .map(|w| w.path.clone())
        .collect();

    let excluded = config
        .file_specs
        .exclude
        .iter()
        .filter(|pattern| !pattern.contains(['*', '?', '[']))
        .map(Into::into)
        .collect();

    let mut extensions: Vec<String> = supported_extensions(config.options.allow_js)
        .into_iter()
        .map(str::to_string)
        .collect();
    extensions.push(".json".to_string());

    FilesMatch {
        files,
        dirs,
        excluded,
        extensions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tsconfig::parse_config;
    use crate::system::path::normalize;
    use crate::system::{ControlledSystem, OutputMode};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn parse(root: &Path, rel: &str) -> Arc<ParsedConfig> {
        let system = ControlledSystem::new(OutputMode::Readonly);
        Arc::new(parse_config(system.as_ref(), &root.join(rel), None))
    }

    #[test]
    fn test_artifacts_cover_out_dir_and_build_info() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(
            &root,
            "tsconfig.json",
            r#"{ "compilerOptions": { "composite": true, "outDir": "dist" }, "include": ["src"] }"#,
        );
        write(&root, "src/a.ts", "export {};\n");

        let snapshot = artifacts(&[parse(&root, "tsconfig.json")]);
        assert_eq!(snapshot.dirs, vec![root.join("dist")]);
        assert_eq!(snapshot.files, vec![root.join("dist/tsconfig.tsbuildinfo")]);
        assert!(snapshot.is_match(&root.join("dist/a.d.ts")));
        assert!(!snapshot.is_match(&root.join("src/a.ts")));
    }

    #[test]
    fn test_artifacts_without_out_dir_list_declarations_next_to_sources() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(&root, "tsconfig.json", r#"{ "compilerOptions": { "declaration": true } }"#);
        write(&root, "a.ts", "export {};\n");

        let snapshot = artifacts(&[parse(&root, "tsconfig.json")]);
        assert!(snapshot.dirs.is_empty());
        assert_eq!(snapshot.files, vec![root.join("a.d.ts")]);
    }

    #[test]
    fn test_no_emit_keeps_only_build_info() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(
            &root,
            "tsconfig.json",
            r#"{ "compilerOptions": { "incremental": true, "noEmit": true, "outDir": "dist" } }"#,
        );
        write(&root, "a.ts", "export {};\n");

        let snapshot = artifacts(&[parse(&root, "tsconfig.json")]);
        assert!(snapshot.dirs.is_empty());
        assert_eq!(snapshot.files.len(), 1);
    }

    #[test]
    fn test_dependencies_include_configs_roots_and_wildcard_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(&root, "base.json", r#"{ "compilerOptions": { "outDir": "dist" } }"#);
        write(
            &root,
            "tsconfig.json",
            r#"{ "extends": "./base.json", "include": ["src"], "exclude": ["src/generated"] }"#,
        );
        write(&root, "src/a.ts", "export {};\n");

        let snapshot = dependencies(&[parse(&root, "tsconfig.json")]);
        assert_eq!(
            snapshot.files,
            vec![root.join("tsconfig.json"), root.join("base.json"), root.join("src/a.ts")]
        );
        assert_eq!(snapshot.dirs, vec![root.join("src")]);
        assert!(snapshot.excluded.contains(&PathBuf::from(root.join("src/generated"))));
        assert!(snapshot.excluded.contains(&root.join("dist")));
        assert!(snapshot.extensions.contains(&".ts".to_string()));
        assert!(!snapshot.extensions.contains(&".js".to_string()));
        assert!(snapshot.is_match(&root.join("src/b.ts")));
        assert!(!snapshot.is_match(&root.join("src/generated/x.ts")));
    }
}
