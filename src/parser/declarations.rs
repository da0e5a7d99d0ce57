use tree_sitter::Node;

use super::{FileAnalysis, Span};

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// One name pulled in by `import { name }` or `export { name } from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedImport {
    /// Name as exported by the target module (the part before `as`).
    pub name: String,
    pub span: Span,
}

/// A module reference: static import, re-export source, `require()` or `import()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    /// Span of the string literal, quotes included.
    pub span: Span,
    pub names: Vec<NamedImport>,
    pub type_only: bool,
}

/// `const name: declared = <literal of type actual>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub span: Span,
    pub declared: String,
    pub actual: String,
}

/// Exported declaration, in the shape declaration emit needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportDecl {
    Variable {
        keyword: String,
        name: String,
        ty: Option<String>,
    },
    Function {
        name: String,
        parameters: String,
        return_type: Option<String>,
        span: Span,
    },
    /// Interfaces and type aliases, re-emitted verbatim.
    Type { text: String },
    Class { name: String },
    Enum { name: String },
}

// ---------------------------------------------------------------------------
// Helper utilities
// ---------------------------------------------------------------------------

fn node_text<'a>(node: Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor).any(|c| c.kind() == kind)
}

fn descendants_of_kind<'a>(node: Node<'a>, kind: &str, out: &mut Vec<Node<'a>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == kind {
            out.push(child);
        } else {
            descendants_of_kind(child, kind, out);
        }
    }
}

/// Contents of a `string` node. An empty literal has no fragment child.
fn string_value(node: Node<'_>, source: &[u8]) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut cursor = node.walk();
    let fragment = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "string_fragment");
    Some(fragment.map(|f| node_text(f, source).to_owned()).unwrap_or_default())
}

/// Type text of a `type_annotation` node, without the leading colon.
fn annotation_text(annotation: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = annotation.walk();
    let ty = annotation.named_children(&mut cursor).next()?;
    Some(node_text(ty, source).to_owned())
}

/// Primitive type of a literal initializer, if it is one.
fn literal_type(value: Node<'_>) -> Option<&'static str> {
    match value.kind() {
        "number" => Some("number"),
        "string" | "template_string" => Some("string"),
        "true" | "false" => Some("boolean"),
        "unary_expression" => {
            let argument = value.child_by_field_name("argument")?;
            (argument.kind() == "number").then_some("number")
        }
        "parenthesized_expression" => {
            let mut cursor = value.walk();
            let inner = value.named_children(&mut cursor).next()?;
            literal_type(inner)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

pub(super) fn collect(root: Node<'_>, source: &[u8], out: &mut FileAnalysis) {
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "import_statement" => {
                if let Some(import) = import_statement(child, source) {
                    out.imports.push(import);
                }
            }
            "export_statement" => export_statement(child, source, out),
            _ => {}
        }
    }
    walk_expressions(root, source, out);
}

fn import_statement(node: Node<'_>, source: &[u8]) -> Option<ImportRef> {
    let literal = node.child_by_field_name("source")?;
    let specifier = string_value(literal, source)?;

    let mut specs = Vec::new();
    descendants_of_kind(node, "import_specifier", &mut specs);
    let names = specs
        .into_iter()
        .filter_map(|spec| spec.child_by_field_name("name"))
        .map(|name| NamedImport {
            name: node_text(name, source).to_owned(),
            span: Span::of(name),
        })
        .collect();

    Some(ImportRef {
        specifier,
        span: Span::of(literal),
        names,
        type_only: has_child_kind(node, "type"),
    })
}

fn export_statement(node: Node<'_>, source: &[u8], out: &mut FileAnalysis) {
    let is_default = has_child_kind(node, "default");
    if is_default {
        out.export_names.insert("default".to_owned());
    }
    if let Some(declaration) = node.child_by_field_name("declaration") {
        export_declaration(declaration, source, out);
        return;
    }
    if is_default {
        return;
    }

    let mut specs = Vec::new();
    descendants_of_kind(node, "export_specifier", &mut specs);
    let mut reexported = Vec::new();
    for spec in &specs {
        let Some(name) = spec.child_by_field_name("name") else {
            continue;
        };
        let exported = spec.child_by_field_name("alias").unwrap_or(name);
        out.export_names.insert(node_text(exported, source).to_owned());
        reexported.push(NamedImport {
            name: node_text(name, source).to_owned(),
            span: Span::of(name),
        });
    }

    let mut namespaces = Vec::new();
    descendants_of_kind(node, "namespace_export", &mut namespaces);
    for namespace in &namespaces {
        let mut cursor = namespace.walk();
        let ident = namespace
            .named_children(&mut cursor)
            .find(|c| c.kind() == "identifier" || c.kind() == "string");
        if let Some(ident) = ident {
            out.export_names.insert(node_text(ident, source).to_owned());
        }
    }

    let Some(literal) = node.child_by_field_name("source") else {
        return;
    };
    if specs.is_empty() && namespaces.is_empty() && has_child_kind(node, "*") {
        out.exports_all = true;
    }
    out.reexports.push(node_text(node, source).to_owned());
    if let Some(specifier) = string_value(literal, source) {
        out.imports.push(ImportRef {
            specifier,
            span: Span::of(literal),
            names: reexported,
            type_only: has_child_kind(node, "type"),
        });
    }
}

fn export_declaration(decl: Node<'_>, source: &[u8], out: &mut FileAnalysis) {
    let name_of = |node: Node<'_>| {
        node.child_by_field_name("name")
            .map(|n| node_text(n, source).to_owned())
    };

    match decl.kind() {
        "ambient_declaration" => {
            let mut cursor = decl.walk();
            for inner in decl.named_children(&mut cursor) {
                export_declaration(inner, source, out);
            }
        }
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            let Some(name) = name_of(decl) else {
                return;
            };
            let parameters = decl
                .child_by_field_name("parameters")
                .map(|p| node_text(p, source).to_owned())
                .unwrap_or_else(|| "()".to_owned());
            let return_type = decl
                .child_by_field_name("return_type")
                .and_then(|r| annotation_text(r, source));
            let span = decl
                .child_by_field_name("name")
                .map(Span::of)
                .unwrap_or_else(|| Span::of(decl));
            out.export_names.insert(name.clone());
            out.exports.push(ExportDecl::Function {
                name,
                parameters,
                return_type,
                span,
            });
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = decl.walk();
            let keyword = decl
                .children(&mut cursor)
                .next()
                .map(|k| node_text(k, source).to_owned())
                .unwrap_or_else(|| "const".to_owned());
            for declarator in decl.named_children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(name_node) = declarator.child_by_field_name("name") else {
                    continue;
                };
                if name_node.kind() != "identifier" {
                    continue;
                }
                let name = node_text(name_node, source).to_owned();
                let ty = declarator
                    .child_by_field_name("type")
                    .and_then(|t| annotation_text(t, source))
                    .or_else(|| {
                        declarator
                            .child_by_field_name("value")
                            .and_then(literal_type)
                            .map(str::to_owned)
                    });
                out.export_names.insert(name.clone());
                out.exports.push(ExportDecl::Variable {
                    keyword: keyword.clone(),
                    name,
                    ty,
                });
            }
        }
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = name_of(decl) {
                out.export_names.insert(name.clone());
                out.exports.push(ExportDecl::Class { name });
            }
        }
        "interface_declaration" | "type_alias_declaration" => {
            if let Some(name) = name_of(decl) {
                out.export_names.insert(name);
                out.exports.push(ExportDecl::Type {
                    text: node_text(decl, source).to_owned(),
                });
            }
        }
        "enum_declaration" => {
            if let Some(name) = name_of(decl) {
                out.export_names.insert(name.clone());
                out.exports.push(ExportDecl::Enum { name });
            }
        }
        _ => {
            if let Some(name) = name_of(decl) {
                out.export_names.insert(name);
            }
        }
    }
}

/// Whole-tree pass: annotated literal mismatches, `require()` and `import()` calls.
fn walk_expressions(node: Node<'_>, source: &[u8], out: &mut FileAnalysis) {
    match node.kind() {
        "variable_declarator" => {
            if let Some(mismatch) = literal_mismatch(node, source) {
                out.mismatches.push(mismatch);
            }
        }
        "call_expression" => {
            if let Some(import) = call_import(node, source) {
                out.imports.push(import);
            }
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_expressions(child, source, out);
    }
}

fn literal_mismatch(declarator: Node<'_>, source: &[u8]) -> Option<TypeMismatch> {
    let name = declarator.child_by_field_name("name")?;
    if name.kind() != "identifier" {
        return None;
    }
    let annotation = declarator.child_by_field_name("type")?;
    let mut cursor = annotation.walk();
    let ty = annotation.named_children(&mut cursor).next()?;
    if ty.kind() != "predefined_type" {
        return None;
    }
    let declared = node_text(ty, source);
    if !matches!(declared, "number" | "string" | "boolean") {
        return None;
    }
    let actual = literal_type(declarator.child_by_field_name("value")?)?;
    (actual != declared).then(|| TypeMismatch {
        span: Span::of(name),
        declared: declared.to_owned(),
        actual: actual.to_owned(),
    })
}

/// `require("x")` and `import("x")` with a literal argument.
fn call_import(call: Node<'_>, source: &[u8]) -> Option<ImportRef> {
    let function = call.child_by_field_name("function")?;
    let is_import = match function.kind() {
        "import" => true,
        "identifier" => node_text(function, source) == "require",
        _ => false,
    };
    if !is_import {
        return None;
    }
    let arguments = call.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let literal = arguments.named_children(&mut cursor).next()?;
    let specifier = string_value(literal, source)?;
    Some(ImportRef {
        specifier,
        span: Span::of(literal),
        names: Vec::new(),
        type_only: false,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::super::analyze;
    use super::*;

    #[test]
    fn test_require_and_dynamic_import_are_references() {
        let src = "const fs = require('./fs');\nasync function f() { await import(\"./lazy\"); }\n";
        let analysis = analyze(Path::new("/p/a.js"), src).unwrap();
        let specifiers: Vec<_> = analysis.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(specifiers, vec!["./fs", "./lazy"]);
    }

    #[test]
    fn test_reexport_names_are_checked_against_source() {
        let src = "export { a as b } from './dep';\n";
        let analysis = analyze(Path::new("/p/a.ts"), src).unwrap();
        assert_eq!(analysis.imports.len(), 1);
        assert_eq!(analysis.imports[0].names[0].name, "a");
        assert!(analysis.export_names.contains("b"));
        assert!(!analysis.exports_all);
        assert_eq!(analysis.reexports, vec!["export { a as b } from './dep';"]);
    }

    #[test]
    fn test_exported_function_without_return_type() {
        let src = "export function run(a: number) { return a; }\n";
        let analysis = analyze(Path::new("/p/a.ts"), src).unwrap();
        match &analysis.exports[0] {
            ExportDecl::Function {
                name,
                parameters,
                return_type,
                span,
            } => {
                assert_eq!(name, "run");
                assert_eq!(parameters, "(a: number)");
                assert!(return_type.is_none());
                assert_eq!(&src[span.start..span.start + span.length], "run");
            }
            other => panic!("unexpected export {other:?}"),
        }
    }

    #[test]
    fn test_exported_variable_type_inferred_from_literal() {
        let analysis = analyze(Path::new("/p/a.ts"), "export const n = 3;\n").unwrap();
        assert_eq!(
            analysis.exports,
            vec![ExportDecl::Variable {
                keyword: "const".into(),
                name: "n".into(),
                ty: Some("number".into()),
            }]
        );
    }

    #[test]
    fn test_declaration_file_exports() {
        let src = "export declare const value: number;\nexport declare function make(): string;\n";
        let analysis = analyze(Path::new("/p/a.d.ts"), src).unwrap();
        assert!(analysis.export_names.contains("value"));
        assert!(analysis.export_names.contains("make"));
    }

    #[test]
    fn test_interface_kept_verbatim() {
        let src = "export interface Shape { size: number }\n";
        let analysis = analyze(Path::new("/p/a.ts"), src).unwrap();
        assert_eq!(
            analysis.exports,
            vec![ExportDecl::Type {
                text: "interface Shape { size: number }".into()
            }]
        );
    }
}
