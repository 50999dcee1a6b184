//! Shared types for the protoforge toolchain.
//!
//! This crate holds the pieces that do not touch the filesystem or spawn
//! processes:
//!
//! - [`Failure`]: a structured diagnostic with a total order and text/JSON
//!   rendering.
//! - [`PackageSet`]: the package graph built from `protoc` descriptor sets.
//! - [`BreakingChecker`]: the rule battery that compares two package sets
//!   and reports backward-incompatible changes.
//!
//! # Example
//!
//! ```
//! use prost_types::{FileDescriptorProto, FileDescriptorSet};
//! use protoforge_core::*;
//!
//! let file = |name: &str, package: &str| FileDescriptorProto {
//!     name: Some(name.to_string()),
//!     package: Some(package.to_string()),
//!     ..Default::default()
//! };
//! let from = PackageSet::from_descriptor_sets(&[FileDescriptorSet {
//!     file: vec![file("foo.proto", "foo.v1"), file("bar.proto", "bar.v1")],
//! }])
//! .unwrap();
//! let to = PackageSet::from_descriptor_sets(&[FileDescriptorSet {
//!     file: vec![file("foo.proto", "foo.v1")],
//! }])
//! .unwrap();
//!
//! let failures = BreakingChecker::default().check(&from, &to);
//! assert_eq!(failures[0].id, "PACKAGES_NOT_DELETED");
//! assert_eq!(failures[0].message, "Package \"bar.v1\" was deleted.");
//! ```

mod breaking;
mod descriptor;
mod failure;

pub use breaking::{BreakingChecker, BreakingConfig, Rule};
pub use descriptor::{
    DescriptorError, Enum, EnumValue, Field, FieldLabel, FieldType, Message, Method, Oneof,
    Package, PackageSet, Service, decode_descriptor_set, is_beta_package,
};
pub use failure::{
    DEFAULT_ERROR_FORMAT, Failure, FailureField, FailureFormatError, render_json_lines,
    render_text_lines, sort_failures,
};

/// Result alias for descriptor construction.
pub type Result<T> = std::result::Result<T, DescriptorError>;
