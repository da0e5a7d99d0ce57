use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Compiler diagnostic categories, lowest severity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Warning,
    Error,
    Suggestion,
    Message,
}

/// Nested message text, as produced when one failure explains another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChain {
    pub text: String,
    pub next: Vec<MessageChain>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageText {
    Text(String),
    Chain(MessageChain),
}

impl MessageText {
    /// Single string with one line per chain entry, indented two spaces per depth.
    pub fn flatten(&self) -> String {
        match self {
            MessageText::Text(text) => text.clone(),
            MessageText::Chain(chain) => {
                let mut out = String::new();
                flatten_chain(chain, 0, &mut out);
                out
            }
        }
    }
}

fn flatten_chain(chain: &MessageChain, depth: usize, out: &mut String) {
    if depth > 0 {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    }
    out.push_str(&chain.text);
    for next in &chain.next {
        flatten_chain(next, depth + 1, out);
    }
}

impl From<String> for MessageText {
    fn from(text: String) -> Self {
        MessageText::Text(text)
    }
}

impl From<&str> for MessageText {
    fn from(text: &str) -> Self {
        MessageText::Text(text.to_string())
    }
}

/// Byte offsets of line starts; maps offsets to 0-based line/character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    text: Arc<str>,
    line_starts: Vec<usize>,
}

impl LineMap {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            text: Arc::from(text),
            line_starts,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 0-based (line, character) of a byte offset. Characters are counted as
    /// Unicode scalar values.
    pub fn position_of(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let character = self
            .text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - start);
        (line, character)
    }

    /// Byte offset of a 0-based (line, character) pair.
    pub fn offset_of(&self, line: usize, character: usize) -> usize {
        let Some(&start) = self.line_starts.get(line) else {
            return self.text.len();
        };
        self.text[start..]
            .char_indices()
            .nth(character)
            .map(|(i, _)| start + i)
            .unwrap_or(self.text.len())
    }
}

/// The file a diagnostic points into, with enough text to compute positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticFile {
    pub path: PathBuf,
    pub line_map: Arc<LineMap>,
}

/// Raw compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: u32,
    pub category: DiagnosticCategory,
    pub message: MessageText,
    pub file: Option<DiagnosticFile>,
    pub start: Option<usize>,
    pub length: Option<usize>,
}

impl Diagnostic {
    /// Diagnostic not attached to any file (options, global).
    pub fn global(code: u32, message: impl Into<MessageText>) -> Self {
        Self {
            code,
            category: DiagnosticCategory::Error,
            message: message.into(),
            file: None,
            start: None,
            length: None,
        }
    }

    pub fn at(
        file: &DiagnosticFile,
        start: usize,
        length: usize,
        code: u32,
        message: impl Into<MessageText>,
    ) -> Self {
        Self {
            code,
            category: DiagnosticCategory::Error,
            message: message.into(),
            file: Some(file.clone()),
            start: Some(start),
            length: Some(length),
        }
    }

    pub fn with_category(mut self, category: DiagnosticCategory) -> Self {
        self.category = category;
        self
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_map_positions() {
        let map = LineMap::new("let a = 1;\nconst b: number = 'x';\n");
        assert_eq!(map.position_of(0), (0, 0));
        assert_eq!(map.position_of(11), (1, 0));
        assert_eq!(map.position_of(17), (1, 6));
        assert_eq!(map.offset_of(1, 6), 17);
    }

    #[test]
    fn test_line_map_counts_characters_not_bytes() {
        let map = LineMap::new("const é: number = 'x';");
        // `:` follows a two-byte character.
        assert_eq!(map.position_of(8), (0, 7));
    }

    #[test]
    fn test_flatten_chain_indents_nested_messages() {
        let chain = MessageText::Chain(MessageChain {
            text: "Type '{ a: string; }' is not assignable to type 'Options'.".into(),
            next: vec![MessageChain {
                text: "Types of property 'a' are incompatible.".into(),
                next: vec![MessageChain {
                    text: "Type 'string' is not assignable to type 'number'.".into(),
                    next: Vec::new(),
                }],
            }],
        });
        assert_eq!(
            chain.flatten(),
            "Type '{ a: string; }' is not assignable to type 'Options'.\n  Types of property 'a' are incompatible.\n    Type 'string' is not assignable to type 'number'."
        );
    }
}
