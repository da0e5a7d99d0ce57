/// The kind of directed edge between two files in the module graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// The source file imports from the target file.
    /// `specifier` is the raw module specifier as written in source.
    Imports { specifier: String },
    /// `export ... from` the target file.
    ReExports { specifier: String },
    /// The import resolved into a referenced project and was redirected to
    /// that project's declaration output.
    Redirected { specifier: String },
}

impl EdgeKind {
    pub fn specifier(&self) -> &str {
        match self {
            EdgeKind::Imports { specifier }
            | EdgeKind::ReExports { specifier }
            | EdgeKind::Redirected { specifier } => specifier,
        }
    }
}
