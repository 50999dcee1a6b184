//! Translation of `protoc` stderr into structured failures.
//!
//! Each non-blank line is matched against an ordered dictionary of known
//! compiler messages; the first match decides the outcome. Lines nothing
//! matches are logged and carried through verbatim.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::warn;

use protoforge_core::{Failure, sort_failures};

use crate::discover::{ProjectSnapshot, ProtoFile};

/// First compiler release that prints a position on unused-import warnings.
const POSITIONED_WARNINGS_SINCE: (u64, u64, u64) = (3, 8, 0);

const NO_SYNTAX_MESSAGE: &str = "No syntax specified. Please use 'syntax = \"proto2\";' or 'syntax = \"proto3\";' to specify a syntax version.";

static PATTERNS: LazyLock<DiagnosticPatterns> = LazyLock::new(DiagnosticPatterns::new);

struct DiagnosticPatterns {
    plugin_failed: Regex,
    plugin_not_found: Regex,
    plugin_output: Regex,
    no_syntax: Regex,
    unused_import_positioned: Regex,
    unused_import_unpositioned: Regex,
    recursive_import: Regex,
    file_not_found: Regex,
    import_had_errors: Regex,
    json_camel_case: Regex,
    not_defined: Regex,
    explicit_default: Regex,
    first_enum_value: Regex,
    positioned: Regex,
}

impl DiagnosticPatterns {
    fn new() -> Self {
        Self {
            // --go_out: protoc-gen-go: Plugin failed with status code 1.
            plugin_failed: Regex::new(r"^--\w+_out: protoc-gen-(\S+): Plugin failed with status code (\d+)\.$")
                .expect("static regex must compile"),
            plugin_not_found: Regex::new(r"^protoc-gen-(\S+): program not found or is not executable")
                .expect("static regex must compile"),
            plugin_output: Regex::new(r"^--\w+_out: ").expect("static regex must compile"),
            no_syntax: Regex::new(r"^No syntax specified for the proto file: (.+?)\. Please")
                .expect("static regex must compile"),
            unused_import_positioned: Regex::new(r"^(.+?):(\d+):(\d+): warning: Import (.+) but not used\.$")
                .expect("static regex must compile"),
            unused_import_unpositioned: Regex::new(r"^(.+?): warning: Import (.+) but not used\.$")
                .expect("static regex must compile"),
            recursive_import: Regex::new(r"^(.+?)(?::(\d+):(\d+))?: (File recursively imports itself: .*)$")
                .expect("static regex must compile"),
            file_not_found: Regex::new(r"^(.+?): File not found\.$").expect("static regex must compile"),
            import_had_errors: Regex::new(r"Import .+ was not found or had errors\.$")
                .expect("static regex must compile"),
            json_camel_case: Regex::new(r"^(.+?):(\d+):(\d+): (The JSON camel-case name of field .*)$")
                .expect("static regex must compile"),
            not_defined: Regex::new(r"^(.+?):(\d+):(\d+): (.+(?:is not defined|seems to be defined in).*)$")
                .expect("static regex must compile"),
            explicit_default: Regex::new(r"^(.+?):(\d+):(\d+): (Explicit default values are not allowed in proto3\.)$")
                .expect("static regex must compile"),
            first_enum_value: Regex::new(r"^(.+?):(\d+):(\d+): (The first enum value must be zero in proto3\.)$")
                .expect("static regex must compile"),
            positioned: Regex::new(r"^(.+?):(\d+):(\d+): (.+)$").expect("static regex must compile"),
        }
    }
}

/// What became of one stderr line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Failure(Failure),
    /// An unused-import warning silenced by `allow_unused_imports`.
    Suppressed,
    /// A line already covered by another failure.
    Dropped,
    /// No pattern matched; the line is carried through verbatim.
    Unparsed(Failure),
}

/// Turns compiler stderr into failures for one project snapshot.
#[derive(Debug, Clone)]
pub struct DiagnosticParser {
    files: Vec<ProtoFile>,
    positioned_warnings_first: bool,
    allow_unused_imports: bool,
}

impl DiagnosticParser {
    pub fn new(files: &[ProtoFile], protoc_version: &str, allow_unused_imports: bool) -> Self {
        let positioned_warnings_first = parse_version(protoc_version)
            .map(|version| version >= POSITIONED_WARNINGS_SINCE)
            .unwrap_or(true);
        Self {
            files: files.to_vec(),
            positioned_warnings_first,
            allow_unused_imports,
        }
    }

    pub fn for_snapshot(snapshot: &ProjectSnapshot) -> Self {
        let files: Vec<ProtoFile> = snapshot.files().cloned().collect();
        Self::new(
            &files,
            &snapshot.config.compile.protoc_version,
            snapshot.config.compile.allow_unused_imports,
        )
    }

    /// Parses a full stderr capture. Blank lines are skipped; the result is
    /// sorted.
    pub fn parse_stderr(&self, stderr: &str) -> Vec<Failure> {
        let mut failures: Vec<Failure> = stderr
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match self.parse_line(line) {
                LineOutcome::Failure(failure) | LineOutcome::Unparsed(failure) => Some(failure),
                LineOutcome::Suppressed | LineOutcome::Dropped => None,
            })
            .collect();
        sort_failures(&mut failures);
        failures
    }

    pub fn parse_line(&self, line: &str) -> LineOutcome {
        let line = line.trim();
        let p = &*PATTERNS;

        if let Some(caps) = p.plugin_failed.captures(line) {
            return LineOutcome::Failure(Failure::unpositioned(
                "",
                format!("protoc-gen-{} failed with status code {}.", &caps[1], &caps[2]),
            ));
        }
        if let Some(caps) = p.plugin_not_found.captures(line) {
            return LineOutcome::Failure(Failure::unpositioned(
                "",
                format!("protoc-gen-{} not found or is not executable.", &caps[1]),
            ));
        }
        if p.plugin_output.is_match(line) {
            return LineOutcome::Failure(Failure::unpositioned("", line));
        }
        if let Some(caps) = p.no_syntax.captures(line) {
            return LineOutcome::Failure(Failure::for_file(
                self.display_path(&caps[1]),
                NO_SYNTAX_MESSAGE,
            ));
        }
        if let Some(outcome) = self.unused_import(line) {
            return outcome;
        }
        if let Some(caps) = p.recursive_import.captures(line) {
            return LineOutcome::Failure(Failure::new(
                self.display_path(&caps[1]),
                capture_number(&caps, 2),
                capture_number(&caps, 3),
                "",
                &caps[4],
            ));
        }
        if let Some(caps) = p.file_not_found.captures(line) {
            return LineOutcome::Failure(Failure::unpositioned(
                "",
                format!("Import \"{}\" was not found.", &caps[1]),
            ));
        }
        if p.import_had_errors.is_match(line) {
            return LineOutcome::Dropped;
        }
        for regex in [
            &p.json_camel_case,
            &p.not_defined,
            &p.explicit_default,
            &p.first_enum_value,
            &p.positioned,
        ] {
            if let Some(caps) = regex.captures(line) {
                return LineOutcome::Failure(self.positioned(&caps));
            }
        }

        warn!(line, "unrecognized protoc output");
        LineOutcome::Unparsed(Failure::unpositioned("", line))
    }

    fn unused_import(&self, line: &str) -> Option<LineOutcome> {
        let p = &*PATTERNS;
        let order = if self.positioned_warnings_first {
            [&p.unused_import_positioned, &p.unused_import_unpositioned]
        } else {
            [&p.unused_import_unpositioned, &p.unused_import_positioned]
        };
        for regex in order {
            let Some(caps) = regex.captures(line) else {
                continue;
            };
            if self.allow_unused_imports {
                return Some(LineOutcome::Suppressed);
            }
            // The import is always the last group, the position is optional.
            let import = caps
                .get(caps.len() - 1)
                .map_or("", |m| m.as_str())
                .trim_matches('"');
            let (line_no, column) = if caps.len() == 5 {
                (capture_number(&caps, 2), capture_number(&caps, 3))
            } else {
                (0, 0)
            };
            return Some(LineOutcome::Failure(Failure::new(
                self.display_path(&caps[1]),
                line_no,
                column,
                "",
                format!("Import \"{import}\" was not used."),
            )));
        }
        None
    }

    fn positioned(&self, caps: &Captures<'_>) -> Failure {
        Failure::new(
            self.display_path(&caps[1]),
            capture_number(caps, 2),
            capture_number(caps, 3),
            "",
            &caps[4],
        )
    }

    /// Rewrites a compiler-emitted path to the matching file's display path.
    ///
    /// Only a unique match on a `/` boundary is rewritten.
    fn display_path(&self, emitted: &str) -> String {
        let suffix = format!("/{emitted}");
        let mut matches = self.files.iter().filter(|file| {
            let absolute = file.path.to_string_lossy();
            absolute == emitted
                || file.display_path == emitted
                || absolute.ends_with(&suffix)
                || file.display_path.ends_with(&suffix)
        });
        match (matches.next(), matches.next()) {
            (Some(file), None) => file.display_path.clone(),
            _ => emitted.to_string(),
        }
    }
}

fn capture_number(caps: &Captures<'_>, index: usize) -> u32 {
    caps.get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// `MAJOR.MINOR[.PATCH]`, ignoring any suffix after the last number.
fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let leading = |raw: &str| -> Option<u64> {
        raw.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok()
    };
    let mut parts = version.trim().trim_start_matches('v').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = leading(parts.next()?)?;
    let patch = match parts.next() {
        Some(raw) => leading(raw)?,
        None => 0,
    };
    Some((major, minor, patch))
}
