//! `tsconfig.json` loading: `extends` chains, caller overrides, option
//! validation, `files`/`include`/`exclude` expansion and project references.
//!
//! Parsing never fails. Problems are reported as diagnostics attached to the
//! configuration file they come from, next to whatever could still be parsed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::diagnostic::{Diagnostic, DiagnosticFile, LineMap};
use crate::system::System;
use crate::system::path::{file_name, normalize};
use crate::walker::{self, DEFAULT_EXCLUDES, FileSpecs, WildcardDirectory};

// ---------------------------------------------------------------------------
// Compiler options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    Boolean,
    String,
    /// String resolved against the directory of the defining config file.
    Path,
    List,
    /// Objects and anything else the checker does not interpret.
    Any,
}

impl OptionKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::String | OptionKind::Path => value.is_string(),
            OptionKind::List => value.is_array(),
            OptionKind::Any => true,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            OptionKind::Boolean => "boolean",
            OptionKind::String | OptionKind::Path => "string",
            OptionKind::List => "Array",
            OptionKind::Any => "object",
        }
    }
}

const KNOWN_OPTIONS: &[(&str, OptionKind)] = &[
    ("allowJs", OptionKind::Boolean),
    ("allowImportingTsExtensions", OptionKind::Boolean),
    ("allowSyntheticDefaultImports", OptionKind::Boolean),
    ("baseUrl", OptionKind::Path),
    ("checkJs", OptionKind::Boolean),
    ("composite", OptionKind::Boolean),
    ("declaration", OptionKind::Boolean),
    ("declarationDir", OptionKind::Path),
    ("declarationMap", OptionKind::Boolean),
    ("emitDeclarationOnly", OptionKind::Boolean),
    ("esModuleInterop", OptionKind::Boolean),
    ("experimentalDecorators", OptionKind::Boolean),
    ("emitDecoratorMetadata", OptionKind::Boolean),
    ("forceConsistentCasingInFileNames", OptionKind::Boolean),
    ("incremental", OptionKind::Boolean),
    ("isolatedDeclarations", OptionKind::Boolean),
    ("isolatedModules", OptionKind::Boolean),
    ("jsx", OptionKind::String),
    ("lib", OptionKind::List),
    ("module", OptionKind::String),
    ("moduleDetection", OptionKind::String),
    ("moduleResolution", OptionKind::String),
    ("noEmit", OptionKind::Boolean),
    ("noEmitOnError", OptionKind::Boolean),
    ("noFallthroughCasesInSwitch", OptionKind::Boolean),
    ("noImplicitAny", OptionKind::Boolean),
    ("noImplicitReturns", OptionKind::Boolean),
    ("noLib", OptionKind::Boolean),
    ("noUnusedLocals", OptionKind::Boolean),
    ("noUnusedParameters", OptionKind::Boolean),
    ("outDir", OptionKind::Path),
    ("paths", OptionKind::Any),
    ("preserveWatchOutput", OptionKind::Boolean),
    ("removeComments", OptionKind::Boolean),
    ("resolveJsonModule", OptionKind::Boolean),
    ("rootDir", OptionKind::Path),
    ("skipLibCheck", OptionKind::Boolean),
    ("sourceMap", OptionKind::Boolean),
    ("strict", OptionKind::Boolean),
    ("strictNullChecks", OptionKind::Boolean),
    ("target", OptionKind::String),
    ("tsBuildInfoFile", OptionKind::Path),
    ("typeRoots", OptionKind::List),
    ("types", OptionKind::List),
    ("useDefineForClassFields", OptionKind::Boolean),
    ("verbatimModuleSyntax", OptionKind::Boolean),
];

fn option_kind(name: &str) -> Option<OptionKind> {
    KNOWN_OPTIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, kind)| *kind)
}

/// Compiler options the reference compiler acts on. Everything else stays in
/// `raw` and is echoed into build metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilerOptions {
    pub config_file_path: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub declaration_dir: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub ts_build_info_file: Option<PathBuf>,
    pub allow_js: bool,
    pub composite: bool,
    pub declaration: bool,
    pub declaration_map: bool,
    pub emit_declaration_only: bool,
    pub incremental: bool,
    pub isolated_declarations: bool,
    pub no_emit: bool,
    pub no_emit_on_error: bool,
    pub skip_lib_check: bool,
    pub source_map: bool,
    pub raw: Map<String, Value>,
}

impl CompilerOptions {
    fn from_map(raw: Map<String, Value>, config_path: &Path) -> Self {
        let flag = |name: &str| raw.get(name).and_then(Value::as_bool).unwrap_or(false);
        let path = |name: &str| raw.get(name).and_then(Value::as_str).map(PathBuf::from);
        Self {
            config_file_path: Some(config_path.to_path_buf()),
            out_dir: path("outDir"),
            declaration_dir: path("declarationDir"),
            root_dir: path("rootDir"),
            ts_build_info_file: path("tsBuildInfoFile"),
            allow_js: flag("allowJs"),
            composite: flag("composite"),
            declaration: flag("declaration"),
            declaration_map: flag("declarationMap"),
            emit_declaration_only: flag("emitDeclarationOnly"),
            incremental: flag("incremental"),
            isolated_declarations: flag("isolatedDeclarations"),
            no_emit: flag("noEmit"),
            no_emit_on_error: flag("noEmitOnError"),
            skip_lib_check: flag("skipLibCheck"),
            source_map: flag("sourceMap"),
            raw,
        }
    }

    pub fn emits_declarations(&self) -> bool {
        self.declaration || self.composite
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental || self.composite
    }

    pub fn declaration_output_dir(&self) -> Option<&Path> {
        self.declaration_dir.as_deref().or(self.out_dir.as_deref())
    }

    /// Where `.tsbuildinfo` goes: explicit option, else next to the outputs
    /// (or the config file) named after the config file.
    pub fn build_info_path(&self) -> Option<PathBuf> {
        if !self.is_incremental() {
            return None;
        }
        if let Some(explicit) = &self.ts_build_info_file {
            return Some(explicit.clone());
        }
        let config = self.config_file_path.as_deref()?;
        let name = file_name(config);
        let stem = name.strip_suffix(".json").unwrap_or(name);
        let dir = match &self.out_dir {
            Some(out_dir) => out_dir.clone(),
            None => config.parent()?.to_path_buf(),
        };
        Some(dir.join(format!("{stem}.tsbuildinfo")))
    }
}

// ---------------------------------------------------------------------------
// Parsed configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReference {
    /// Resolved path of the referenced configuration file.
    pub path: PathBuf,
    pub original: String,
}

/// One fully resolved configuration. Replaced, never mutated.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub config_path: PathBuf,
    pub file_names: Vec<PathBuf>,
    pub options: CompilerOptions,
    pub references: Vec<ProjectReference>,
    pub raw_files: Option<Vec<String>>,
    pub raw_include: Option<Vec<String>>,
    pub raw_exclude: Option<Vec<String>>,
    pub file_specs: FileSpecs,
    pub wildcard_directories: Vec<WildcardDirectory>,
    pub extended_paths: Vec<PathBuf>,
    pub errors: Vec<Diagnostic>,
}

impl ParsedConfig {
    pub fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or(Path::new("/"))
    }

    /// Root file names as one comparable string.
    pub fn root_names_key(&self) -> String {
        self.file_names
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Re-expand the root file names of `config` against the current file system:
/// explicit entries that still exist, then fresh wildcard matches.
pub fn expand_file_names(system: &dyn System, config: &ParsedConfig) -> Vec<PathBuf> {
    let mut names: Vec<PathBuf> = config
        .file_names
        .iter()
        .filter(|p| !walker::matches_specs(&config.file_specs, p) && system.file_exists(p))
        .cloned()
        .collect();
    for path in walker::match_files(system, &config.file_specs) {
        if !names.contains(&path) {
            names.push(path);
        }
    }
    names
}

/// A list-valued top-level key together with the directory it is relative to.
#[derive(Debug, Clone)]
struct SpecList {
    dir: PathBuf,
    specs: Vec<String>,
}

impl SpecList {
    fn absolute(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|s| normalize(&self.dir.join(s)).to_string_lossy().into_owned())
            .collect()
    }
}

/// What one file of an `extends` chain contributes, already merged with its bases.
#[derive(Default)]
struct ConfigLayer {
    compiler_options: Map<String, Value>,
    files: Option<SpecList>,
    include: Option<SpecList>,
    exclude: Option<SpecList>,
    references: Vec<Value>,
    file: Option<DiagnosticFile>,
}

impl ConfigLayer {
    fn inherit(&mut self, base: ConfigLayer) {
        self.compiler_options.extend(base.compiler_options);
        if base.files.is_some() {
            self.files = base.files;
        }
        if base.include.is_some() {
            self.include = base.include;
        }
        if base.exclude.is_some() {
            self.exclude = base.exclude;
        }
    }
}

struct Loader<'a> {
    system: &'a dyn System,
    chain: Vec<PathBuf>,
    extended: Vec<PathBuf>,
    errors: Vec<Diagnostic>,
}

/// Parse `config_path`, merging `overrides` into its top-level keys and its
/// `compilerOptions`.
pub fn parse_config(
    system: &dyn System,
    config_path: &Path,
    overrides: Option<&Value>,
) -> ParsedConfig {
    let config_path = normalize(config_path);
    let mut loader = Loader {
        system,
        chain: vec![config_path.clone()],
        extended: Vec::new(),
        errors: Vec::new(),
    };
    let layer = loader
        .load(&config_path, overrides)
        .unwrap_or_default();
    let Loader {
        extended,
        mut errors,
        ..
    } = loader;

    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let options = CompilerOptions::from_map(layer.compiler_options, &config_path);
    let references = resolve_references(system, &config_dir, &layer.references);

    // Explicit files first, then wildcard matches.
    let mut file_names = Vec::new();
    if let Some(files) = &layer.files {
        for (spec, absolute) in files.specs.iter().zip(files.absolute()) {
            let path = PathBuf::from(absolute);
            if system.file_exists(&path) {
                if !file_names.contains(&path) {
                    file_names.push(path);
                }
            } else {
                errors.push(config_error(
                    layer.file.as_ref(),
                    spec,
                    6053,
                    format!("File '{}' not found.", path.display()),
                ));
            }
        }
    }

    let include = match (&layer.include, &layer.files) {
        (Some(include), _) => include.absolute(),
        (None, None) => vec![normalize(&config_dir.join("**/*")).to_string_lossy().into_owned()],
        (None, Some(_)) => Vec::new(),
    };
    let exclude = match &layer.exclude {
        Some(exclude) => exclude.absolute(),
        None => {
            let mut defaults: Vec<String> = DEFAULT_EXCLUDES
                .iter()
                .map(|d| config_dir.join(d).to_string_lossy().into_owned())
                .collect();
            for dir in [&options.out_dir, &options.declaration_dir].into_iter().flatten() {
                defaults.push(dir.to_string_lossy().into_owned());
            }
            defaults
        }
    };
    let file_specs = FileSpecs {
        base_dir: config_dir.clone(),
        include,
        exclude,
        allow_js: options.allow_js,
    };
    for path in walker::match_files(system, &file_specs) {
        if !file_names.contains(&path) {
            file_names.push(path);
        }
    }
    let wildcard_directories = walker::wildcard_directories(&file_specs);

    let raw_files = layer.files.as_ref().map(|l| l.specs.clone());
    let raw_include = layer.include.as_ref().map(|l| l.specs.clone());
    let raw_exclude = layer.exclude.as_ref().map(|l| l.specs.clone());

    if references.is_empty() && layer.file.is_some() {
        if raw_files.as_ref().is_some_and(Vec::is_empty) && raw_include.is_none() {
            errors.push(config_error(
                layer.file.as_ref(),
                "files",
                18002,
                format!(
                    "The 'files' list in config file '{}' is empty.",
                    config_path.display()
                ),
            ));
        } else if file_names.is_empty() && raw_files.is_none() {
            let shown_include = raw_include.clone().unwrap_or_else(|| vec!["**/*".to_owned()]);
            let shown_exclude = raw_exclude.clone().unwrap_or_default();
            errors.push(config_error(
                layer.file.as_ref(),
                "",
                18003,
                format!(
                    "No inputs were found in config file '{}'. Specified 'include' paths were '{}' and 'exclude' paths were '{}'.",
                    config_path.display(),
                    Value::from(shown_include),
                    Value::from(shown_exclude),
                ),
            ));
        }
    }

    ParsedConfig {
        config_path,
        file_names,
        options,
        references,
        raw_files,
        raw_include,
        raw_exclude,
        file_specs,
        wildcard_directories,
        extended_paths: extended,
        errors,
    }
}

impl Loader<'_> {
    fn load(&mut self, path: &Path, overrides: Option<&Value>) -> Option<ConfigLayer> {
        let Some(text) = self.system.read_file(path) else {
            self.errors.push(Diagnostic::global(
                5083,
                format!("Cannot read file '{}'.", path.display()),
            ));
            return None;
        };
        let file = DiagnosticFile {
            path: path.to_path_buf(),
            line_map: Arc::new(LineMap::new(&text)),
        };

        let mut root = match serde_json::from_str::<Value>(&strip_jsonc(&text)) {
            Ok(Value::Object(root)) => root,
            Ok(_) => {
                self.errors.push(Diagnostic::at(
                    &file,
                    0,
                    0,
                    5092,
                    format!("The root value of a '{}' file must be an object.", file_name(path)),
                ));
                return None;
            }
            Err(err) => {
                let offset = file
                    .line_map
                    .offset_of(err.line().saturating_sub(1), err.column().saturating_sub(1));
                self.errors
                    .push(Diagnostic::at(&file, offset, 0, 1005, format!("Invalid JSON: {err}.")));
                return None;
            }
        };
        if let Some(Value::Object(overrides)) = overrides {
            merge_overrides(&mut root, overrides);
        }

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut layer = ConfigLayer::default();

        for spec in self.extends_list(&file, root.get("extends")) {
            let Some(base_path) = resolve_extends(self.system, &dir, &spec) else {
                self.errors.push(config_error(
                    Some(&file),
                    &spec,
                    6053,
                    format!("File '{spec}' not found."),
                ));
                continue;
            };
            if self.chain.contains(&base_path) {
                let cycle: Vec<String> = self
                    .chain
                    .iter()
                    .chain(std::iter::once(&base_path))
                    .map(|p| p.display().to_string())
                    .collect();
                self.errors.push(config_error(
                    Some(&file),
                    &spec,
                    18000,
                    format!(
                        "Circularity detected while resolving configuration: {}",
                        cycle.join(" -> ")
                    ),
                ));
                continue;
            }
            self.chain.push(base_path.clone());
            if !self.extended.contains(&base_path) {
                self.extended.push(base_path.clone());
            }
            if let Some(base) = self.load(&base_path, None) {
                layer.inherit(base);
            }
            self.chain.pop();
        }

        match root.get("compilerOptions") {
            Some(Value::Object(options)) => {
                for (name, value) in options {
                    if let Some(value) = self.validate_option(&file, &dir, name, value) {
                        layer.compiler_options.insert(name.clone(), value);
                    }
                }
            }
            Some(_) => self.errors.push(config_error(
                Some(&file),
                "compilerOptions",
                5024,
                "Compiler option 'compilerOptions' requires a value of type object.".to_owned(),
            )),
            None => {}
        }

        for (key, slot) in [
            ("files", &mut layer.files),
            ("include", &mut layer.include),
            ("exclude", &mut layer.exclude),
        ] {
            match root.get(key) {
                None => {}
                Some(Value::Array(items)) => {
                    *slot = Some(SpecList {
                        dir: dir.clone(),
                        specs: items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect(),
                    });
                }
                Some(_) => self.errors.push(config_error(
                    Some(&file),
                    key,
                    5024,
                    format!("Compiler option '{key}' requires a value of type Array."),
                )),
            }
        }

        layer.references = match root.get("references") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        layer.file = Some(file);
        Some(layer)
    }

    fn extends_list(&mut self, file: &DiagnosticFile, value: Option<&Value>) -> Vec<String> {
        match value {
            None => Vec::new(),
            Some(Value::String(spec)) => vec![spec.clone()],
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            Some(_) => {
                self.errors.push(config_error(
                    Some(file),
                    "extends",
                    5024,
                    "Compiler option 'extends' requires a value of type string or Array.".to_owned(),
                ));
                Vec::new()
            }
        }
    }

    /// Check one compiler option; returns the value to keep, with paths made absolute.
    fn validate_option(
        &mut self,
        file: &DiagnosticFile,
        dir: &Path,
        name: &str,
        value: &Value,
    ) -> Option<Value> {
        let Some(kind) = option_kind(name) else {
            self.errors.push(config_error(
                Some(file),
                name,
                5023,
                format!("Unknown compiler option '{name}'."),
            ));
            return None;
        };
        if !kind.accepts(value) {
            self.errors.push(config_error(
                Some(file),
                name,
                5024,
                format!(
                    "Compiler option '{name}' requires a value of type {}.",
                    kind.type_name()
                ),
            ));
            return None;
        }
        if kind == OptionKind::Path
            && let Some(relative) = value.as_str()
        {
            let absolute = normalize(&dir.join(relative));
            return Some(Value::String(absolute.to_string_lossy().into_owned()));
        }
        Some(value.clone())
    }
}

/// Diagnostic on the config file, pointing at the first occurrence of `"key"`.
fn config_error(
    file: Option<&DiagnosticFile>,
    key: &str,
    code: u32,
    message: String,
) -> Diagnostic {
    let Some(file) = file else {
        return Diagnostic::global(code, message);
    };
    let needle = format!("\"{key}\"");
    let (start, length) = match file.line_map.text().find(&needle) {
        Some(start) if !key.is_empty() => (start, needle.len()),
        _ => (0, 0),
    };
    Diagnostic::at(file, start, length, code, message)
}

/// Overrides replace top-level keys, except `compilerOptions` which is merged
/// key by key.
fn merge_overrides(root: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        match (key.as_str(), root.get_mut(key), value) {
            ("compilerOptions", Some(Value::Object(existing)), Value::Object(extra)) => {
                for (name, option) in extra {
                    existing.insert(name.clone(), option.clone());
                }
            }
            _ => {
                root.insert(key.clone(), value.clone());
            }
        }
    }
}

fn with_json_suffix(path: &Path) -> PathBuf {
    let mut text = path.as_os_str().to_os_string();
    text.push(".json");
    PathBuf::from(text)
}

/// Relative specifiers resolve against `dir` (adding `.json` if needed); bare
/// ones are looked up in `node_modules` of `dir` and its ancestors.
fn resolve_extends(system: &dyn System, dir: &Path, spec: &str) -> Option<PathBuf> {
    let is_relative = spec.starts_with("./") || spec.starts_with("../");
    if is_relative || Path::new(spec).is_absolute() {
        let candidate = normalize(&dir.join(spec));
        if system.file_exists(&candidate) {
            return Some(candidate);
        }
        let with_json = with_json_suffix(&candidate);
        return system.file_exists(&with_json).then_some(with_json);
    }
    for ancestor in dir.ancestors() {
        let base = ancestor.join("node_modules").join(spec);
        for candidate in [base.clone(), with_json_suffix(&base), base.join("tsconfig.json")] {
            if system.file_exists(&candidate) {
                return Some(normalize(&candidate));
            }
        }
    }
    None
}

fn resolve_references(system: &dyn System, dir: &Path, raw: &[Value]) -> Vec<ProjectReference> {
    raw.iter()
        .filter_map(|item| item.get("path").and_then(Value::as_str))
        .map(|original| {
            let target = normalize(&dir.join(original));
            let path = if system.directory_exists(&target) {
                target.join("tsconfig.json")
            } else {
                target
            };
            ProjectReference {
                path,
                original: original.to_owned(),
            }
        })
        .collect()
}

/// Blank out comments and trailing commas so the text parses as JSON. Byte
/// offsets are preserved, so parse error positions stay meaningful.
fn strip_jsonc(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = bytes.to_vec();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }
        match (b, bytes.get(i + 1)) {
            (b'"', _) => {
                in_string = true;
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                let start = i;
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                let end = (i + 2).min(bytes.len());
                for byte in &mut out[start..end] {
                    if *byte != b'\n' {
                        *byte = b' ';
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    // Trailing commas, on the comment-free text.
    let mut in_string = false;
    let mut i = 0;
    while i < out.len() {
        let b = out[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b',' {
            let next = out[i + 1..].iter().find(|c| !c.is_ascii_whitespace());
            if matches!(next, Some(b'}') | Some(b']')) {
                out[i] = b' ';
            }
        }
        i += 1;
    }

    String::from_utf8(out).unwrap_or_else(|_| text.to_owned())
}
