use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::diagnostic::{Diagnostic, DiagnosticCategory};
use super::emit::{self, BuildInfoInput};
use super::host::{CompilerHost, SourceFile};
use super::resolve::ModuleResolver;
use super::tsconfig::ParsedConfig;
use crate::graph::ModuleGraph;
use crate::graph::edge::EdgeKind;
use crate::parser::{ImportRef, SyntaxProblem};
use crate::walker::supported_extension;

/// Where one import of a file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImport {
    File(PathBuf),
    /// Resolved to a source of a referenced project; the program uses that
    /// project's declaration output instead.
    Redirect { source: PathBuf, output: PathBuf },
    /// Like `Redirect`, but the referenced project has not produced the output.
    MissingOutput { source: PathBuf, output: PathBuf },
    Unresolved,
}

impl ResolvedImport {
    pub fn target(&self) -> Option<&Path> {
        match self {
            ResolvedImport::File(path) => Some(path),
            ResolvedImport::Redirect { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportResolution {
    pub import: ImportRef,
    pub resolved: ResolvedImport,
}

/// Outcome of [`Program::emit`].
#[derive(Debug, Default)]
pub struct EmitResult {
    pub written: Vec<PathBuf>,
    pub unchanged: usize,
    /// Declarations were suppressed by `noEmit` or `noEmitOnError`.
    pub skipped: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// One immutable snapshot of the files reachable from the root names, with
/// their resolved imports.
pub struct Program {
    host: Arc<CompilerHost>,
    config: Arc<ParsedConfig>,
    root_names: Vec<PathBuf>,
    files: Vec<Arc<SourceFile>>,
    index: HashMap<PathBuf, usize>,
    resolutions: HashMap<PathBuf, Vec<ImportResolution>>,
    graph: ModuleGraph,
    missing_roots: Vec<PathBuf>,
    failed_lookups: HashSet<PathBuf>,
}

impl Program {
    /// Load the root files and everything they import.
    ///
    /// `references` are the parsed configurations of the projects this one
    /// references; imports of their sources are redirected to their
    /// declaration outputs.
    pub fn create(
        host: Arc<CompilerHost>,
        config: Arc<ParsedConfig>,
        root_names: Vec<PathBuf>,
        references: &[Arc<ParsedConfig>],
    ) -> Self {
        let mut files = Vec::new();
        let mut index = HashMap::new();
        let mut resolutions = HashMap::new();
        let mut graph = ModuleGraph::new();
        let mut missing_roots = Vec::new();
        let mut failed_lookups = HashSet::new();
        let resolver = ModuleResolver::for_config(&host, &config);

        let mut queue: VecDeque<(PathBuf, bool)> =
            root_names.iter().map(|p| (p.clone(), true)).collect();
        let mut queued: HashSet<PathBuf> = root_names.iter().cloned().collect();

        while let Some((path, is_root)) = queue.pop_front() {
            let Some(source) = host.get_source_file(&path) else {
                if is_root {
                    missing_roots.push(path);
                }
                continue;
            };
            graph.add_file(&path);

            let mut resolved_imports = Vec::new();
            for import in &source.analysis.imports {
                let resolved = match resolver.resolve(&path, &import.specifier, &mut failed_lookups) {
                    None => ResolvedImport::Unresolved,
                    Some(found) => redirect(&host, references, found),
                };
                resolved_imports.push(ImportResolution {
                    import: import.clone(),
                    resolved,
                });
            }

            for resolution in &resolved_imports {
                let Some(target) = resolution.resolved.target() else {
                    continue;
                };
                let specifier = resolution.import.specifier.clone();
                let kind = match &resolution.resolved {
                    ResolvedImport::Redirect { .. } => EdgeKind::Redirected { specifier },
                    _ if source.analysis.reexports.iter().any(|r| r.contains(&resolution.import.specifier)) => {
                        EdgeKind::ReExports { specifier }
                    }
                    _ => EdgeKind::Imports { specifier },
                };
                graph.add_import(&path, target, kind);
                if queued.insert(target.to_path_buf()) {
                    queue.push_back((target.to_path_buf(), false));
                }
            }

            index.insert(path.clone(), files.len());
            files.push(source);
            resolutions.insert(path, resolved_imports);
        }

        Self {
            host,
            config,
            root_names,
            files,
            index,
            resolutions,
            graph,
            missing_roots,
            failed_lookups,
        }
    }

    pub fn config(&self) -> &Arc<ParsedConfig> {
        &self.config
    }

    pub fn host(&self) -> &Arc<CompilerHost> {
        &self.host
    }

    pub fn root_names(&self) -> &[PathBuf] {
        &self.root_names
    }

    pub fn source_files(&self) -> &[Arc<SourceFile>] {
        &self.files
    }

    pub fn get_source_file(&self, path: &Path) -> Option<&Arc<SourceFile>> {
        self.index.get(path).map(|&i| &self.files[i])
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn resolutions(&self, path: &Path) -> &[ImportResolution] {
        self.resolutions.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Paths probed during module resolution that did not exist.
    pub fn failed_lookups(&self) -> &HashSet<PathBuf> {
        &self.failed_lookups
    }

    /// Files diagnostics are reported for: everything outside `node_modules`.
    pub fn checked_files(&self) -> impl Iterator<Item = &Arc<SourceFile>> {
        self.files.iter().filter(|f| !f.is_external())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn options_diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = self.config.errors.clone();
        for reference in &self.config.references {
            if !self.host.file_exists(&reference.path) {
                out.push(Diagnostic::global(
                    6053,
                    format!("File '{}' not found.", reference.path.display()),
                ));
            }
        }
        out
    }

    pub fn global_diagnostics(&self) -> Vec<Diagnostic> {
        self.missing_roots
            .iter()
            .map(|path| Diagnostic::global(6053, format!("File '{}' not found.", path.display())))
            .collect()
    }

    pub fn syntactic_diagnostics(&self, file: &SourceFile) -> Vec<Diagnostic> {
        let diagnostic_file = file.diagnostic_file();
        file.analysis
            .syntax_errors
            .iter()
            .map(|error| {
                let (code, message) = match &error.problem {
                    SyntaxProblem::Missing(kind) if kind == "identifier" => {
                        (1003, "Identifier expected.".to_owned())
                    }
                    SyntaxProblem::Missing(kind) if !kind.chars().any(char::is_alphanumeric) => {
                        (1005, format!("'{kind}' expected."))
                    }
                    SyntaxProblem::Missing(_) => (1109, "Expression expected.".to_owned()),
                    SyntaxProblem::Unexpected => {
                        (1128, "Declaration or statement expected.".to_owned())
                    }
                };
                Diagnostic::at(
                    &diagnostic_file,
                    error.span.start,
                    error.span.length,
                    code,
                    message,
                )
            })
            .collect()
    }

    fn is_type_checked(&self, file: &SourceFile) -> bool {
        if file.is_declaration && self.config.options.skip_lib_check {
            return false;
        }
        let is_js = supported_extension(&file.path).is_some_and(|(_, js)| js);
        !is_js || self.config.options.raw.get("checkJs").and_then(|v| v.as_bool()) == Some(true)
    }

    pub fn semantic_diagnostics(&self, file: &SourceFile) -> Vec<Diagnostic> {
        if !self.is_type_checked(file) {
            return Vec::new();
        }
        let diagnostic_file = file.diagnostic_file();
        let mut out = Vec::new();

        for mismatch in &file.analysis.mismatches {
            out.push(Diagnostic::at(
                &diagnostic_file,
                mismatch.span.start,
                mismatch.span.length,
                2322,
                format!(
                    "Type '{}' is not assignable to type '{}'.",
                    mismatch.actual, mismatch.declared
                ),
            ));
        }

        for resolution in self.resolutions(&file.path) {
            let import = &resolution.import;
            match &resolution.resolved {
                ResolvedImport::Unresolved => out.push(Diagnostic::at(
                    &diagnostic_file,
                    import.span.start,
                    import.span.length,
                    2307,
                    format!(
                        "Cannot find module '{}' or its corresponding type declarations.",
                        import.specifier
                    ),
                )),
                ResolvedImport::MissingOutput { source, output } => out.push(Diagnostic::at(
                    &diagnostic_file,
                    import.span.start,
                    import.span.length,
                    6305,
                    format!(
                        "Output file '{}' has not been built from source file '{}'.",
                        output.display(),
                        source.display()
                    ),
                )),
                resolved => {
                    let Some(target) = resolved.target().and_then(|t| self.get_source_file(t))
                    else {
                        continue;
                    };
                    if target.analysis.exports_all {
                        continue;
                    }
                    for name in &import.names {
                        if !target.analysis.export_names.contains(&name.name) {
                            out.push(Diagnostic::at(
                                &diagnostic_file,
                                name.span.start,
                                name.span.length,
                                2305,
                                format!(
                                    "Module '\"{}\"' has no exported member '{}'.",
                                    import.specifier, name.name
                                ),
                            ));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn declaration_diagnostics(&self, file: &SourceFile) -> Vec<Diagnostic> {
        let options = &self.config.options;
        if !options.isolated_declarations || !options.emits_declarations() || file.is_declaration {
            return Vec::new();
        }
        let diagnostic_file = file.diagnostic_file();
        file.analysis
            .exports
            .iter()
            .filter_map(|export| match export {
                crate::parser::ExportDecl::Function {
                    return_type: None,
                    span,
                    ..
                } => Some(Diagnostic::at(
                    &diagnostic_file,
                    span.start,
                    span.length,
                    9007,
                    "Function must have an explicit return type annotation with --isolatedDeclarations.",
                )),
                _ => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Emit
    // -----------------------------------------------------------------------

    /// Write declaration files and build metadata through the system.
    ///
    /// Files whose content would not change are not written, so a rebuild
    /// with no changes produces no file events.
    pub fn emit(&self, diagnostics: &[Diagnostic]) -> EmitResult {
        let options = &self.config.options;
        let has_errors = diagnostics
            .iter()
            .any(|d| d.category == DiagnosticCategory::Error);
        let mut result = EmitResult::default();

        if options.emits_declarations() {
            if options.no_emit || (options.no_emit_on_error && has_errors) {
                result.skipped = true;
            } else {
                for root in &self.root_names {
                    let Some(source) = self.get_source_file(root) else {
                        continue;
                    };
                    if source.is_declaration || source.is_external() {
                        continue;
                    }
                    let Some(output) = emit::declaration_path(&self.config, root) else {
                        continue;
                    };
                    let text = emit::render_declaration(&source.analysis);
                    self.write_output(&output, &text, &mut result);
                }
            }
        }

        if let Some(build_info_path) = options.build_info_path() {
            let input = BuildInfoInput {
                config: &self.config,
                root_names: &self.root_names,
                files: self
                    .files
                    .iter()
                    .map(|f| (f.path.as_path(), f.version, self.graph.imports_of(&f.path)))
                    .collect(),
                error_files: diagnostics
                    .iter()
                    .filter(|d| d.category == DiagnosticCategory::Error)
                    .filter_map(|d| d.file_path().map(Path::to_path_buf))
                    .collect(),
                has_errors,
            };
            let text = emit::render_build_info(&input, &build_info_path);
            self.write_output(&build_info_path, &text, &mut result);
        }

        result
    }

    fn write_output(&self, path: &Path, text: &str, result: &mut EmitResult) {
        let system = self.host.system();
        if system.read_file(path).as_deref() == Some(text) {
            result.unchanged += 1;
            return;
        }
        match system.write_file(path, text) {
            Ok(()) => result.written.push(path.to_path_buf()),
            Err(err) => result.diagnostics.push(Diagnostic::global(
                5033,
                format!("Could not write file '{}': {err}.", path.display()),
            )),
        }
    }
}

/// Redirect an import that resolved into a referenced project's sources.
fn redirect(host: &CompilerHost, references: &[Arc<ParsedConfig>], found: PathBuf) -> ResolvedImport {
    for reference in references {
        if !reference.file_names.contains(&found) {
            continue;
        }
        let Some(output) = emit::declaration_path(reference, &found) else {
            break;
        };
        return if host.file_exists(&output) {
            ResolvedImport::Redirect {
                source: found,
                output,
            }
        } else {
            ResolvedImport::MissingOutput {
                source: found,
                output,
            }
        };
    }
    ResolvedImport::File(found)
}
