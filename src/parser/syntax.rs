use tree_sitter::Node;

use super::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxProblem {
    /// The parser inserted a zero-width node of this kind.
    Missing(String),
    /// A region the grammar could not make sense of.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub span: Span,
    pub problem: SyntaxProblem,
}

/// Collect MISSING and ERROR nodes. Does not descend into ERROR nodes, so one
/// broken region yields one error.
pub(super) fn collect(node: Node<'_>, out: &mut Vec<SyntaxError>) {
    if node.is_missing() {
        out.push(SyntaxError {
            span: Span {
                start: node.start_byte(),
                length: 0,
            },
            problem: SyntaxProblem::Missing(node.kind().to_string()),
        });
        return;
    }
    if node.is_error() {
        out.push(SyntaxError {
            span: Span::of(node),
            problem: SyntaxProblem::Unexpected,
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, out);
    }
}
