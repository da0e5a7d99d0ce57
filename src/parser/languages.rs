use std::path::Path;

use tree_sitter::Language;

use crate::system::path::file_name;

/// Source dialect of a file, decided by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    TypeScript,
    Tsx,
    JavaScript,
}

impl Dialect {
    /// `.ts`/`.mts`/`.cts` (including declaration files) -> TypeScript,
    /// `.tsx` -> TSX, `.js`/`.jsx`/`.mjs`/`.cjs` -> JavaScript.
    ///
    /// TypeScript and TSX MUST stay separate grammars: the TypeScript grammar
    /// cannot parse JSX and the TSX grammar breaks `<T>expr` assertions.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "ts" | "mts" | "cts" => Some(Dialect::TypeScript),
            "tsx" => Some(Dialect::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Dialect::JavaScript),
            _ => None,
        }
    }

    pub fn language(self) -> Language {
        match self {
            Dialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Dialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Dialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

/// True for `.d.ts`, `.d.mts` and `.d.cts` files.
pub fn is_declaration_file(path: &Path) -> bool {
    let name = file_name(path);
    [".d.ts", ".d.mts", ".d.cts"]
        .iter()
        .any(|ext| name.ends_with(ext))
}
