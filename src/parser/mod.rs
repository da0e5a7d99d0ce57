//! Tree-sitter front end: parses one source file and extracts everything the
//! checker and emitter need, then drops the syntax tree.

pub mod declarations;
pub mod languages;
pub mod syntax;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tree_sitter::Parser;

pub use declarations::{ExportDecl, ImportRef, NamedImport, TypeMismatch};
pub use languages::{Dialect, is_declaration_file};
pub use syntax::{SyntaxError, SyntaxProblem};

// One Parser per dialect per thread, initialised lazily. The worker checks files
// sequentially, so in practice this is one set of parsers per process.
thread_local! {
    static PARSERS: RefCell<HashMap<Dialect, Parser>> = RefCell::new(HashMap::new());
}

/// Byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub length: usize,
}

impl Span {
    pub fn of(node: tree_sitter::Node<'_>) -> Self {
        Self {
            start: node.start_byte(),
            length: node.end_byte().saturating_sub(node.start_byte()),
        }
    }
}

/// Everything extracted from one file.
///
/// - `syntax_errors`: missing tokens and unparseable regions
/// - `imports`: static imports and re-export sources, with the named bindings they pull in
/// - `exports`: exported declarations, kept for declaration emit
/// - `export_names`: every name the module exports (`default` included)
/// - `exports_all`: true when the module contains `export * from ...`
/// - `reexports`: `export ... from` statements, verbatim
/// - `mismatches`: primitive annotations initialised with a literal of another type
#[derive(Debug, Clone, Default)]
pub struct FileAnalysis {
    pub syntax_errors: Vec<SyntaxError>,
    pub imports: Vec<ImportRef>,
    pub exports: Vec<ExportDecl>,
    pub export_names: BTreeSet<String>,
    pub exports_all: bool,
    pub reexports: Vec<String>,
    pub mismatches: Vec<TypeMismatch>,
}

/// Parse `text` with the grammar chosen from `path` and extract a [`FileAnalysis`].
///
/// # Errors
/// Returns an error if:
/// - the extension is not a TypeScript/JavaScript one
/// - tree-sitter returns `None` (parser cancelled or misconfigured)
pub fn analyze(path: &Path, text: &str) -> Result<FileAnalysis> {
    let dialect =
        Dialect::for_path(path).ok_or_else(|| anyhow!("unsupported file extension: {:?}", path))?;

    let tree = PARSERS.with(|cell| -> Result<tree_sitter::Tree> {
        let mut parsers = cell.borrow_mut();
        if !parsers.contains_key(&dialect) {
            let mut parser = Parser::new();
            parser
                .set_language(&dialect.language())
                .with_context(|| format!("failed to set tree-sitter language for {dialect:?}"))?;
            parsers.insert(dialect, parser);
        }
        let parser = parsers
            .get_mut(&dialect)
            .ok_or_else(|| anyhow!("parser for {dialect:?} missing"))?;
        parser
            .parse(text, None)
            .ok_or_else(|| anyhow!("tree-sitter returned None for {:?}", path))
    })?;

    let root = tree.root_node();
    let source = text.as_bytes();

    let mut analysis = FileAnalysis::default();
    syntax::collect(root, &mut analysis.syntax_errors);
    declarations::collect(root, source, &mut analysis);
    Ok(analysis)
}
