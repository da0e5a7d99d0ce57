use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::compiler::diagnostic::{Diagnostic, DiagnosticCategory};
use crate::issue::{Issue, IssueLocation, IssuePosition, IssueSeverity, sort_and_dedupe};

/// Latest diagnostics per configuration file. Solution builds keep one entry
/// per project.
#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    by_config: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_diagnostics(&mut self, config_path: &Path, diagnostics: Vec<Diagnostic>) {
        self.by_config.insert(config_path.to_path_buf(), diagnostics);
    }

    pub fn invalidate_diagnostics(&mut self) {
        self.by_config.clear();
    }

    pub fn len(&self) -> usize {
        self.by_config.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_config.is_empty()
    }

    pub fn get_issues(&self) -> Vec<Issue> {
        sort_and_dedupe(self.by_config.values().flatten().map(to_issue).collect())
    }
}

pub fn to_issue(diagnostic: &Diagnostic) -> Issue {
    let severity = match diagnostic.category {
        DiagnosticCategory::Warning => IssueSeverity::Warning,
        _ => IssueSeverity::Error,
    };
    let location = match (&diagnostic.file, diagnostic.start) {
        (Some(file), Some(start)) => {
            let end = start + diagnostic.length.unwrap_or(0);
            Some(IssueLocation {
                start: one_based(file.line_map.position_of(start)),
                end: one_based(file.line_map.position_of(end)),
            })
        }
        _ => None,
    };
    Issue {
        code: format!("TS{}", diagnostic.code),
        severity,
        message: diagnostic.message.flatten(),
        file: diagnostic.file.as_ref().map(|f| f.path.clone()),
        location,
    }
}

fn one_based((line, character): (usize, usize)) -> IssuePosition {
    IssuePosition {
        line: line + 1,
        column: character + 1,
    }
}

/// Issues for configuration errors, which short-circuit a cycle.
pub fn config_issues(errors: &[Diagnostic]) -> Vec<Issue> {
    sort_and_dedupe(errors.iter().map(to_issue).collect())
}
