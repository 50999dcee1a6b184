//! Project configuration for protoforge.
//!
//! A project is governed by at most one `protoforge.yaml` or
//! `protoforge.json`. This crate finds that file, parses it strictly
//! ([`external`]), and resolves it into an effective [`Config`] with
//! absolute paths and defaults filled in.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use protoforge_config::config_for_dir;
//!
//! let config = config_for_dir(Path::new("idl/acme/v1")).unwrap();
//! println!("protoc {}", config.compile.protoc_version);
//! for generator in &config.generate.generators {
//!     println!("--{}_out={}", generator.name, generator.output.display());
//! }
//! ```

mod error;
pub mod external;
mod resolve;
mod types;

pub use error::{ConfigError, Result};
pub use external::ExternalConfig;
pub use resolve::{
    CONFIG_FILE_NAMES, absolutize, clean_path, config_file_path_in, config_for_data,
    config_for_dir, config_for_file, excludes_for_dir, relative_to,
};
pub use types::{
    CompileConfig, Config, CreateConfig, DEFAULT_PROTOC_VERSION, DESCRIPTOR_SET_GENERATOR,
    FileHeader, GenerateConfig, Generator, GeneratorType, GoOptions, LintConfig,
};
