//! Output paths and generated text: declaration files and build metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use super::tsconfig::ParsedConfig;
use crate::parser::{ExportDecl, FileAnalysis, is_declaration_file};
use crate::system::path::replace_suffix;
use crate::walker::supported_extension;

/// Directory the output tree mirrors: `rootDir`, the config directory for
/// composite projects, else the common directory of all non-declaration inputs.
pub fn output_root_dir(config: &ParsedConfig) -> PathBuf {
    if let Some(root) = &config.options.root_dir {
        return root.clone();
    }
    if config.options.composite {
        return config.config_dir().to_path_buf();
    }
    let mut common: Option<PathBuf> = None;
    for file in config.file_names.iter().filter(|f| !is_declaration_file(f)) {
        let Some(dir) = file.parent() else {
            continue;
        };
        common = Some(match common {
            None => dir.to_path_buf(),
            Some(current) => current
                .ancestors()
                .find(|a| dir.starts_with(a))
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        });
    }
    common.unwrap_or_else(|| config.config_dir().to_path_buf())
}

/// Declaration output for `source`, or `None` for declaration inputs and
/// files outside the output root.
pub fn declaration_path(config: &ParsedConfig, source: &Path) -> Option<PathBuf> {
    if is_declaration_file(source) {
        return None;
    }
    let (ext, _) = supported_extension(source)?;
    let replacement = match ext {
        ".mts" | ".mjs" => ".d.mts",
        ".cts" | ".cjs" => ".d.cts",
        _ => ".d.ts",
    };
    let target = match config.options.declaration_output_dir() {
        Some(out_dir) => {
            let relative = source.strip_prefix(output_root_dir(config)).ok()?;
            out_dir.join(relative)
        }
        None => source.to_path_buf(),
    };
    replace_suffix(&target, &[ext], replacement)
}

/// Declaration file text for one module.
pub fn render_declaration(analysis: &FileAnalysis) -> String {
    let mut out = String::new();
    for export in &analysis.exports {
        let line = match export {
            ExportDecl::Variable { keyword, name, ty } => format!(
                "export declare {keyword} {name}: {};",
                ty.as_deref().unwrap_or("any")
            ),
            ExportDecl::Function {
                name,
                parameters,
                return_type,
                ..
            } => format!(
                "export declare function {name}{parameters}: {};",
                return_type.as_deref().unwrap_or("any")
            ),
            ExportDecl::Type { text } => format!("export {text}"),
            ExportDecl::Class { name } => format!("export declare class {name} {{\n}}"),
            ExportDecl::Enum { name } => format!("export declare enum {name} {{\n}}"),
        };
        out.push_str(&line);
        out.push('\n');
    }
    for statement in &analysis.reexports {
        out.push_str(statement);
        out.push('\n');
    }
    if out.is_empty() {
        out.push_str("export {};\n");
    }
    out
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Input state recorded in `.tsbuildinfo`.
pub struct BuildInfoInput<'a> {
    pub config: &'a ParsedConfig,
    pub root_names: &'a [PathBuf],
    /// (path, version, direct imports)
    pub files: Vec<(&'a Path, u64, Vec<PathBuf>)>,
    pub error_files: Vec<PathBuf>,
    pub has_errors: bool,
}

/// `.tsbuildinfo` contents. Deterministic for identical inputs so an
/// unchanged build writes nothing.
pub fn render_build_info(input: &BuildInfoInput<'_>, build_info_path: &Path) -> String {
    let base = build_info_path.parent().unwrap_or(Path::new("/"));
    let file_infos: BTreeMap<String, String> = input
        .files
        .iter()
        .map(|(path, version, _)| (display_relative(path, base), format!("{version:016x}")))
        .collect();
    let referenced_map: BTreeMap<String, Vec<String>> = input
        .files
        .iter()
        .filter(|(_, _, imports)| !imports.is_empty())
        .map(|(path, _, imports)| {
            (
                display_relative(path, base),
                imports.iter().map(|i| display_relative(i, base)).collect(),
            )
        })
        .collect();
    let mut error_files: Vec<String> = input
        .error_files
        .iter()
        .map(|p| display_relative(p, base))
        .collect();
    error_files.sort();
    error_files.dedup();

    let info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "root": input.root_names.iter().map(|p| display_relative(p, base)).collect::<Vec<_>>(),
        "fileInfos": file_infos,
        "referencedMap": referenced_map,
        "options": Value::Object(input.config.options.raw.clone()),
        "errorFiles": error_files,
        "hasErrors": input.has_errors,
    });
    let mut text = serde_json::to_string_pretty(&info).unwrap_or_default();
    text.push('\n');
    text
}
