//! On-disk form of `protoforge.yaml` / `protoforge.json`.
//!
//! These structs mirror the document exactly; unknown keys are rejected.
//! Paths are kept as written. [`crate::resolve`] turns an
//! [`ExternalConfig`] into an effective [`crate::Config`].
//!
//! # Example YAML
//!
//! ```yaml
//! compiler:
//!   version: "3.11.4"
//!   includes: [ "../vendor" ]
//!   allow_unused_imports: false
//! excludes: [ "gen/third_party" ]
//! generators:
//!   - name: go
//!     type: go
//!     output: ../out/go
//!     flags: "plugins=grpc"
//! go_options:
//!   import_path: "example.com/idl"
//! compatibility:
//!   include_beta: false
//!   allow_beta_deps: false
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub compiler: ExternalCompiler,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generators: Vec<ExternalGenerator>,
    #[serde(skip_serializing_if = "is_default")]
    pub go_options: ExternalGoOptions,
    #[serde(skip_serializing_if = "is_default")]
    pub compatibility: ExternalCompatibility,
    #[serde(skip_serializing_if = "is_default")]
    pub lint: ExternalLint,
    #[serde(skip_serializing_if = "is_default")]
    pub create: ExternalCreate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalCompiler {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub allow_unused_imports: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalGenerator {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flags: String,
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file_suffix: String,
    #[serde(skip_serializing_if = "is_default")]
    pub include_imports: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub include_source_info: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalGoOptions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub import_path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_modifiers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalCompatibility {
    #[serde(skip_serializing_if = "is_default")]
    pub include_beta: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub allow_beta_deps: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalLint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "is_default")]
    pub rules: ExternalLintRules,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignores: Vec<ExternalLintIgnore>,
    #[serde(skip_serializing_if = "is_default")]
    pub file_header: ExternalFileHeader,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub java_package_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalLintRules {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalLintIgnore {
    pub id: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalFileHeader {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "is_default")]
    pub is_commented: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalCreate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<ExternalCreatePackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalCreatePackage {
    pub directory: String,
    pub name: String,
}
