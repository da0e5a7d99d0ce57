use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Severity of a reported issue. Errors sort before warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssuePosition {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueLocation {
    pub start: IssuePosition,
    pub end: IssuePosition,
}

/// Host-facing, normalized diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<IssueLocation>,
}

impl Issue {
    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

/// Ordering used for every issue list handed to the host:
/// file, severity, location, code, message. Issues without a file come first.
pub fn compare_issues(a: &Issue, b: &Issue) -> Ordering {
    a.file
        .cmp(&b.file)
        .then(a.severity.cmp(&b.severity))
        .then(a.location.cmp(&b.location))
        .then(a.code.cmp(&b.code))
        .then(a.message.cmp(&b.message))
}

/// Sort issues into the stable host order and drop exact duplicates.
pub fn sort_and_dedupe(mut issues: Vec<Issue>) -> Vec<Issue> {
    issues.sort_by(compare_issues);
    issues.dedup();
    issues
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}", file.display())?;
            if let Some(location) = &self.location {
                write!(f, ":{}:{}", location.start.line, location.start.column)?;
            }
            f.write_str(" - ")?;
        }
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(file: Option<&str>, severity: IssueSeverity, line: usize, code: &str) -> Issue {
        Issue {
            code: code.to_string(),
            severity,
            message: "m".to_string(),
            file: file.map(PathBuf::from),
            location: Some(IssueLocation {
                start: IssuePosition { line, column: 1 },
                end: IssuePosition { line, column: 2 },
            }),
        }
    }

    #[test]
    fn test_sort_orders_by_file_then_severity_then_line() {
        let issues = vec![
            issue(Some("/p/b.ts"), IssueSeverity::Error, 1, "TS1"),
            issue(Some("/p/a.ts"), IssueSeverity::Warning, 1, "TS1"),
            issue(Some("/p/a.ts"), IssueSeverity::Error, 9, "TS1"),
            issue(Some("/p/a.ts"), IssueSeverity::Error, 2, "TS1"),
            issue(None, IssueSeverity::Error, 1, "TS5"),
        ];
        let sorted = sort_and_dedupe(issues);
        let keys: Vec<_> = sorted
            .iter()
            .map(|i| (i.file.clone(), i.severity, i.location.map(|l| l.start.line)))
            .collect();
        assert_eq!(
            keys,
            vec![
                (None, IssueSeverity::Error, Some(1)),
                (Some(PathBuf::from("/p/a.ts")), IssueSeverity::Error, Some(2)),
                (Some(PathBuf::from("/p/a.ts")), IssueSeverity::Error, Some(9)),
                (Some(PathBuf::from("/p/a.ts")), IssueSeverity::Warning, Some(1)),
                (Some(PathBuf::from("/p/b.ts")), IssueSeverity::Error, Some(1)),
            ]
        );
    }

    #[test]
    fn test_dedupe_drops_identical_issues() {
        let a = issue(Some("/p/a.ts"), IssueSeverity::Error, 1, "TS2322");
        let sorted = sort_and_dedupe(vec![a.clone(), a.clone(), a]);
        assert_eq!(sorted.len(), 1);
    }

    #[test]
    fn test_wire_shape_is_camel_case_and_omits_missing_fields() {
        let issue = Issue {
            code: "TS5023".into(),
            severity: IssueSeverity::Error,
            message: "Unknown compiler option 'foo'.".into(),
            file: None,
            location: None,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": "TS5023",
                "severity": "error",
                "message": "Unknown compiler option 'foo'."
            })
        );
    }
}
