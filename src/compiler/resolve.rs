use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use oxc_resolver::{
    FileMetadata, FileSystem, ResolveContext, ResolveError, ResolveOptions, ResolverGeneric,
    TsconfigOptions, TsconfigReferences,
};

use super::host::CompilerHost;
use super::tsconfig::ParsedConfig;
use crate::system::System;
use crate::system::path::{file_name, normalize};
use crate::walker::supported_extension;

const TS_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts"];
const JS_EXTENSIONS: &[&str] = &[".js", ".jsx"];

pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

/// `@scope/pkg` is published to DefinitelyTyped as `@types/scope__pkg`.
fn types_package_name(specifier: &str) -> String {
    match specifier.strip_prefix('@') {
        Some(scoped) => scoped.replacen('/', "__", 1),
        None => specifier.to_owned(),
    }
}

/// `@scope/pkg/sub` -> (`@scope/pkg`, `/sub`); `pkg/sub` -> (`pkg`, `/sub`).
fn split_package(specifier: &str) -> (&str, &str) {
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut end = specifier.len();
    let mut seen = 0;
    for (i, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == segments {
                end = i;
                break;
            }
        }
    }
    specifier.split_at(end)
}

/// Resolver file system backed by the worker's [`System`], so resolution sees
/// the same replayed changes and in-memory outputs as the rest of the compiler.
#[derive(Clone)]
pub struct SystemFs {
    system: Arc<dyn System>,
}

impl SystemFs {
    pub fn new(system: Arc<dyn System>) -> Self {
        Self { system }
    }
}

impl FileSystem for SystemFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.system
            .read_file(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        if self.system.file_exists(path) {
            Ok(FileMetadata::new(true, false, false))
        } else if self.system.directory_exists(path) {
            Ok(FileMetadata::new(false, true, false))
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        self.metadata(path)
    }

    fn read_link(&self, _path: &Path) -> io::Result<PathBuf> {
        Err(io::Error::from(io::ErrorKind::InvalidInput))
    }
}

/// Resolver options for one program.
///
/// - `.ts`, `.tsx` and `.d.ts` are probed first; `.js`/`.jsx` only with `allowJs`.
/// - Output extensions written in a specifier (`./a.js`) map back to the
///   sources that produce them.
/// - `types`/`typings` win over `main` in `package.json`.
/// - When the tsconfig exists, its `paths` and those of its references apply.
fn resolve_options(allow_js: bool, tsconfig: Option<&Path>) -> ResolveOptions {
    let js: &[&str] = if allow_js { JS_EXTENSIONS } else { &[] };
    let with_js = |sources: &[&str], js_ext: &str| -> Vec<String> {
        let mut exts: Vec<String> = sources.iter().map(|e| (*e).to_owned()).collect();
        if allow_js {
            exts.push(js_ext.to_owned());
        }
        exts
    };

    ResolveOptions {
        extensions: TS_EXTENSIONS.iter().chain(js).map(|e| (*e).to_owned()).collect(),
        extension_alias: vec![
            (".js".into(), with_js(&[".ts", ".tsx", ".d.ts"], ".js")),
            (".jsx".into(), with_js(&[".tsx"], ".jsx")),
            (".mjs".into(), with_js(&[".mts", ".d.mts"], ".mjs")),
            (".cjs".into(), with_js(&[".cts", ".d.cts"], ".cjs")),
        ],
        main_fields: vec!["types".into(), "typings".into(), "main".into()],
        condition_names: vec!["types".into(), "import".into(), "node".into()],
        tsconfig: tsconfig.map(|config_file| TsconfigOptions {
            config_file: config_file.to_path_buf(),
            references: TsconfigReferences::Auto,
        }),
        builtin_modules: true,
        symlinks: false,
        ..ResolveOptions::default()
    }
}

/// Module resolution for one program. Paths probed without success are
/// reported so a watcher can rebuild when one of them appears.
pub struct ModuleResolver {
    resolver: ResolverGeneric<SystemFs>,
    allow_js: bool,
}

impl ModuleResolver {
    pub fn new(host: &CompilerHost, allow_js: bool, tsconfig: Option<&Path>) -> Self {
        let tsconfig = tsconfig.filter(|path| host.file_exists(path));
        let fs = SystemFs::new(Arc::clone(host.system()));
        Self {
            resolver: ResolverGeneric::new_with_file_system(
                fs,
                resolve_options(allow_js, tsconfig),
            ),
            allow_js,
        }
    }

    /// Resolver for a program built from `config`. Path mapping from the
    /// tsconfig applies only when the configuration and its references load
    /// cleanly.
    pub fn for_config(host: &CompilerHost, config: &ParsedConfig) -> Self {
        let loads = config.errors.is_empty()
            && config.references.iter().all(|r| host.file_exists(&r.path));
        let tsconfig = loads.then_some(config.config_path.as_path());
        Self::new(host, config.options.allow_js, tsconfig)
    }

    pub fn resolve(
        &self,
        containing_file: &Path,
        specifier: &str,
        failed_lookups: &mut HashSet<PathBuf>,
    ) -> Option<PathBuf> {
        let dir = containing_file.parent()?;
        if let Some(found) = self.resolve_in(dir, specifier, failed_lookups) {
            return Some(found);
        }
        if is_relative_specifier(specifier) {
            let base = normalize(&dir.join(specifier));
            failed_lookups.extend(self.candidates(&base));
            return None;
        }

        let (package, subpath) = split_package(specifier);
        if package.starts_with("@types/") {
            return None;
        }
        let types = format!("@types/{}{subpath}", types_package_name(package));
        self.resolve_in(dir, &types, failed_lookups)
    }

    fn resolve_in(
        &self,
        dir: &Path,
        specifier: &str,
        failed_lookups: &mut HashSet<PathBuf>,
    ) -> Option<PathBuf> {
        let mut ctx = ResolveContext::default();
        let result = self.resolver.resolve_with_context(dir, specifier, &mut ctx);
        failed_lookups.extend(ctx.missing_dependencies.into_iter().map(|p| normalize(&p)));
        match result {
            Ok(resolution) => {
                let path = normalize(&resolution.into_path_buf());
                self.accepts(&path).then_some(path)
            }
            Err(ResolveError::Builtin { .. }) => None,
            Err(err) => {
                tracing::trace!(specifier, error = %err, "resolve.unresolved");
                None
            }
        }
    }

    /// Only inputs the program can load; a `.js` file without `allowJs` stays
    /// unresolved.
    fn accepts(&self, path: &Path) -> bool {
        supported_extension(path).is_some_and(|(_, is_js)| self.allow_js || !is_js)
    }

    /// Files whose creation would make a relative specifier resolve.
    fn candidates(&self, base: &Path) -> Vec<PathBuf> {
        let name = file_name(base).to_owned();
        let js: &[&str] = if self.allow_js { JS_EXTENSIONS } else { &[] };
        let mut out: Vec<PathBuf> = TS_EXTENSIONS
            .iter()
            .chain(js)
            .map(|ext| base.with_file_name(format!("{name}{ext}")))
            .collect();
        if let Some(stem) = name.strip_suffix(".js").filter(|s| !s.is_empty()) {
            out.extend(TS_EXTENSIONS.iter().map(|ext| base.with_file_name(format!("{stem}{ext}"))));
        }
        out.push(base.join("index.ts"));
        out
    }
}
