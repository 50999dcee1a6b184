//! Structured failure records.
//!
//! A [`Failure`] is the unit of output for every diagnostic the toolchain
//! surfaces: parsed compiler errors, breaking-change findings, and anything
//! else a user has to act on. Failures carry a total order so that output is
//! deterministic regardless of how it was produced.
//!
//! # Examples
//!
//! ```
//! use protoforge_core::{Failure, FailureField, sort_failures};
//!
//! let mut failures = vec![
//!     Failure::new("b.proto", 1, 1, "", "second"),
//!     Failure::new("a.proto", 4, 2, "", "first"),
//! ];
//! sort_failures(&mut failures);
//! assert_eq!(failures[0].filename, "a.proto");
//!
//! let fields = FailureField::parse_list("filename:line:message").unwrap();
//! assert_eq!(failures[0].render(&fields), "a.proto:4:first");
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default field list used when rendering failures as text.
pub const DEFAULT_ERROR_FORMAT: &str = "filename:line:column:message";

/// A single diagnostic.
///
/// `line` and `column` are 1-based; zero means "no position".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Failure {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub column: u32,
    /// Rule identifier, e.g. `MESSAGE_FIELDS_SAME_TYPE`. Empty for compiler
    /// diagnostics.
    #[serde(default, rename = "id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub message: String,
    /// Identifier used by the lint collaborator for suppression lookups.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lint_id: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Failure {
    /// Creates a positioned failure.
    pub fn new(
        filename: impl Into<String>,
        line: u32,
        column: u32,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            column,
            id: id.into(),
            message: message.into(),
            lint_id: String::new(),
        }
    }

    /// Creates a failure with no file or position.
    pub fn unpositioned(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("", 0, 0, id, message)
    }

    /// Creates a failure attached to a file but not to a position in it.
    pub fn for_file(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(filename, 0, 0, "", message)
    }

    pub fn with_lint_id(mut self, lint_id: impl Into<String>) -> Self {
        self.lint_id = lint_id.into();
        self
    }

    /// Renders this failure as one line using the given field list.
    ///
    /// Empty filenames and zero positions render as empty segments, except
    /// that an unpositioned failure with no filename renders as just its
    /// message.
    pub fn render(&self, fields: &[FailureField]) -> String {
        if self.filename.is_empty() && self.line == 0 && self.column == 0 {
            let id_requested = fields.contains(&FailureField::Id);
            if id_requested && !self.id.is_empty() {
                return format!("{}:{}", self.id, self.message);
            }
            return self.message.clone();
        }

        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            let part = match field {
                FailureField::Filename => self.filename.clone(),
                FailureField::Line => position(self.line),
                FailureField::Column => position(self.column),
                FailureField::Id => self.id.clone(),
                FailureField::Message => self.message.clone(),
            };
            parts.push(part);
        }
        parts.join(":")
    }
}

fn position(value: u32) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

impl Ord for Failure {
    fn cmp(&self, other: &Self) -> Ordering {
        self.filename
            .cmp(&other.filename)
            .then(self.line.cmp(&other.line))
            .then(self.column.cmp(&other.column))
            .then(self.id.cmp(&other.id))
            .then(self.message.cmp(&other.message))
            .then(self.lint_id.cmp(&other.lint_id))
    }
}

impl PartialOrd for Failure {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(FailureField::DEFAULT))
    }
}

/// Sorts failures by filename, line, column, id, then message.
pub fn sort_failures(failures: &mut [Failure]) {
    failures.sort();
}

/// Renders failures as newline-delimited JSON objects.
pub fn render_json_lines(failures: &[Failure]) -> serde_json::Result<String> {
    let mut out = String::new();
    for failure in failures {
        out.push_str(&serde_json::to_string(failure)?);
        out.push('\n');
    }
    Ok(out)
}

/// Renders failures as text, one per line.
pub fn render_text_lines(failures: &[Failure], fields: &[FailureField]) -> String {
    let mut out = String::new();
    for failure in failures {
        out.push_str(&failure.render(fields));
        out.push('\n');
    }
    out
}

/// One field of the colon-separated error format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureField {
    Filename,
    Line,
    Column,
    Id,
    Message,
}

/// Error returned for an invalid error-format field list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureFormatError {
    #[error("error format cannot be empty")]
    Empty,
    #[error("unknown error format field: {0}")]
    UnknownField(String),
    #[error("duplicate error format field: {0}")]
    DuplicateField(String),
}

impl FailureField {
    pub const DEFAULT: &'static [FailureField] = &[
        FailureField::Filename,
        FailureField::Line,
        FailureField::Column,
        FailureField::Message,
    ];

    /// Parses a colon-separated list such as `filename:line:column:id:message`.
    pub fn parse_list(raw: &str) -> Result<Vec<FailureField>, FailureFormatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FailureFormatError::Empty);
        }
        let mut fields = Vec::new();
        for name in raw.split(':') {
            let field = name.trim().parse::<FailureField>()?;
            if fields.contains(&field) {
                return Err(FailureFormatError::DuplicateField(name.trim().to_string()));
            }
            fields.push(field);
        }
        Ok(fields)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::Line => "line",
            Self::Column => "column",
            Self::Id => "id",
            Self::Message => "message",
        }
    }
}

impl std::str::FromStr for FailureField {
    type Err = FailureFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filename" => Ok(Self::Filename),
            "line" => Ok(Self::Line),
            "column" => Ok(Self::Column),
            "id" => Ok(Self::Id),
            "message" => Ok(Self::Message),
            other => Err(FailureFormatError::UnknownField(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_orders_by_all_fields() {
        let mut failures = vec![
            Failure::new("b.proto", 1, 1, "", "x"),
            Failure::new("a.proto", 2, 1, "", "x"),
            Failure::new("a.proto", 1, 5, "", "x"),
            Failure::new("a.proto", 1, 1, "B", "x"),
            Failure::new("a.proto", 1, 1, "A", "z"),
            Failure::new("a.proto", 1, 1, "A", "y"),
        ];
        sort_failures(&mut failures);
        let rendered: Vec<String> = failures
            .iter()
            .map(|f| format!("{}:{}:{}:{}:{}", f.filename, f.line, f.column, f.id, f.message))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "a.proto:1:1:A:y",
                "a.proto:1:1:A:z",
                "a.proto:1:1:B:x",
                "a.proto:1:5::x",
                "a.proto:2:1::x",
                "b.proto:1:1::x",
            ]
        );
    }

    #[test]
    fn test_render_default_format() {
        let failure = Failure::new("foo/bar.proto", 3, 14, "", "Expected \";\".");
        assert_eq!(failure.to_string(), "foo/bar.proto:3:14:Expected \";\".");
    }

    #[test]
    fn test_render_custom_field_list() {
        let failure = Failure::new("x.proto", 3, 1, "SOME_RULE", "boom");
        let fields = FailureField::parse_list("id:filename:message").unwrap();
        assert_eq!(failure.render(&fields), "SOME_RULE:x.proto:boom");
    }

    #[test]
    fn test_render_file_only_failure_leaves_positions_empty() {
        let failure = Failure::for_file("x.proto", "No syntax specified.");
        assert_eq!(failure.to_string(), "x.proto:::No syntax specified.");
    }

    #[test]
    fn test_render_unpositioned_failure_prints_message() {
        let failure = Failure::unpositioned("PACKAGES_NOT_DELETED", "Package \"a\" was deleted.");
        assert_eq!(failure.to_string(), "Package \"a\" was deleted.");
        let fields = FailureField::parse_list("id:message").unwrap();
        assert_eq!(
            failure.render(&fields),
            "PACKAGES_NOT_DELETED:Package \"a\" was deleted."
        );
    }

    #[test]
    fn test_parse_list_rejects_unknown_and_duplicate_fields() {
        assert_eq!(
            FailureField::parse_list("filename:bogus"),
            Err(FailureFormatError::UnknownField("bogus".to_string()))
        );
        assert_eq!(
            FailureField::parse_list("line:line"),
            Err(FailureFormatError::DuplicateField("line".to_string()))
        );
        assert_eq!(FailureField::parse_list("  "), Err(FailureFormatError::Empty));
    }

    #[test]
    fn test_json_lines_skip_empty_fields() {
        let failures = vec![
            Failure::new("a.proto", 1, 2, "", "first"),
            Failure::unpositioned("RULE", "second"),
        ];
        let out = render_json_lines(&failures).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"filename":"a.proto","line":1,"column":2,"message":"first"}"#
        );
        assert_eq!(lines[1], r#"{"id":"RULE","message":"second"}"#);

        let back: Failure = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, failures[1]);
    }
}
