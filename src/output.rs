use std::fmt::Write as _;
use std::path::Path;

use typecheck_worker::files::FilesMatch;
use typecheck_worker::issue::Issue;

use crate::cli::OutputFormat;

/// Render issues in the requested format.
///
/// Compact output shows paths relative to `base` when they live under it and
/// ends with a summary line.
pub fn format_issues(issues: &[Issue], format: OutputFormat, base: &Path) -> String {
    if format == OutputFormat::Json {
        return to_json(issues);
    }

    let mut out = String::new();
    for issue in issues {
        if let Some(file) = &issue.file {
            let shown = file.strip_prefix(base).unwrap_or(file);
            let _ = write!(out, "{}", shown.display());
            if let Some(location) = issue.location {
                let _ = write!(out, ":{}:{}", location.start.line, location.start.column);
            }
            out.push(' ');
        }
        let _ = writeln!(
            out,
            "{} {}: {}",
            issue.severity,
            issue.code,
            indent_continuation(&issue.message)
        );
    }

    let errors = issues.iter().filter(|i| i.is_error()).count();
    let warnings = issues.len() - errors;
    let _ = writeln!(
        out,
        "Found {} {} and {} {}.",
        errors,
        plural(errors, "error"),
        warnings,
        plural(warnings, "warning"),
    );
    out
}

/// Render a dependency snapshot in the requested format.
pub fn format_dependencies(dependencies: &FilesMatch, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(dependencies);
    }

    let mut out = String::new();
    for file in &dependencies.files {
        let _ = writeln!(out, "file {}", file.display());
    }
    for dir in &dependencies.dirs {
        let _ = writeln!(out, "dir {}", dir.display());
    }
    for excluded in &dependencies.excluded {
        let _ = writeln!(out, "exclude {}", excluded.display());
    }
    if !dependencies.extensions.is_empty() {
        let _ = writeln!(out, "extensions {}", dependencies.extensions.join(","));
    }
    out
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(s) => s + "\n",
        Err(e) => {
            eprintln!("error serialising output: {}", e);
            String::new()
        }
    }
}

fn indent_continuation(message: &str) -> String {
    message.replace('\n', "\n    ")
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
