//! Effective configuration types.
//!
//! A [`Config`] is what the rest of the toolchain sees: every path is
//! absolute, lists are sorted and deduplicated, and defaults are filled in.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use protoforge_core::BreakingConfig;
use serde::Serialize;

/// Compiler version used when a config does not name one.
pub const DEFAULT_PROTOC_VERSION: &str = "3.8.0";

/// Effective project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Directory the config applies to.
    pub dir: PathBuf,
    /// Config file this was read from; `None` for defaults or inline data.
    pub path: Option<PathBuf>,
    /// Absolute directory prefixes strictly inside `dir`. Sorted, unique.
    pub excludes: Vec<PathBuf>,
    pub compile: CompileConfig,
    pub generate: GenerateConfig,
    pub breaking: BreakingConfig,
    pub lint: LintConfig,
    pub create: CreateConfig,
}

impl Config {
    /// Default config rooted at `dir`.
    pub fn default_for(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            path: None,
            excludes: Vec::new(),
            compile: CompileConfig::default(),
            generate: GenerateConfig::default(),
            breaking: BreakingConfig::default(),
            lint: LintConfig::default(),
            create: CreateConfig::default(),
        }
    }

    /// Returns `true` if `path` is equal to or under any exclude.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|exclude| path.starts_with(exclude))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileConfig {
    pub protoc_version: String,
    /// Absolute include directories. Sorted, unique.
    pub include_paths: Vec<PathBuf>,
    /// The well-known types include is always added.
    pub include_well_known_types: bool,
    pub allow_unused_imports: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            protoc_version: DEFAULT_PROTOC_VERSION.to_string(),
            include_paths: Vec::new(),
            include_well_known_types: true,
            allow_unused_imports: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerateConfig {
    pub go_options: GoOptions,
    pub generators: Vec<Generator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GoOptions {
    /// Go import path of the config directory.
    pub import_path: String,
    /// Extra `M` modifiers, file to Go import path.
    pub extra_modifiers: BTreeMap<String, String>,
}

/// Which Go modifier table a generator receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    #[default]
    None,
    Go,
    Gogo,
}

impl GeneratorType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" | "none" => Some(Self::None),
            "go" => Some(Self::Go),
            "gogo" => Some(Self::Gogo),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Go => "go",
            Self::Gogo => "gogo",
        }
    }

    pub fn is_go_family(self) -> bool {
        matches!(self, Self::Go | Self::Gogo)
    }
}

impl fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the built-in generator that writes a descriptor set.
pub const DESCRIPTOR_SET_GENERATOR: &str = "descriptor_set";

/// A `protoc` plugin invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generator {
    /// Plugin name as in `--{name}_out`; never prefixed with `protoc-gen-`.
    pub name: String,
    pub kind: GeneratorType,
    pub flags: String,
    /// Absolute output directory, or base directory for `file_suffix` output.
    pub output: PathBuf,
    /// Output as written, when it was relative to the config directory.
    pub output_rel: Option<PathBuf>,
    /// Plugin executable, passed as `--plugin=protoc-gen-{name}={path}`.
    pub path: Option<PathBuf>,
    /// When set, output goes to a single file with this extension.
    pub file_suffix: String,
    pub include_imports: bool,
    pub include_source_info: bool,
}

impl Generator {
    pub fn is_descriptor_set(&self) -> bool {
        self.name == DESCRIPTOR_SET_GENERATOR
    }
}

/// Lint settings, carried through for the lint collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintConfig {
    pub group: String,
    pub include_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
    /// Rule id to absolute files it is ignored in.
    pub ignore_id_to_files: BTreeMap<String, Vec<PathBuf>>,
    pub file_header: Option<FileHeader>,
    pub java_package_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    /// Absolute path of the header file, when given as a path.
    pub path: Option<PathBuf>,
    pub content: String,
    pub is_commented: bool,
}

/// Package naming rules for new files, carried through for `create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateConfig {
    /// Absolute directory to base package name.
    pub dir_to_base_package: BTreeMap<PathBuf, String>,
}
