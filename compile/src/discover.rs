//! Project discovery: find the governing config and the `.proto` files it
//! covers.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use protoforge_compile::discover::{DiscoverOptions, snapshot_for};
//!
//! let work_dir = std::env::current_dir().unwrap();
//! let snapshot = snapshot_for(&work_dir, Path::new("idl"), &DiscoverOptions::default()).unwrap();
//! for file in snapshot.files() {
//!     println!("{}", file.display_path);
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use protoforge_config::{
    Config, absolutize, config_file_path_in, config_for_data, config_for_dir, excludes_for_dir,
};
use tracing::debug;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::DiscoverError;

/// Default wall-clock limit for a directory walk.
pub const DEFAULT_WALK_TIMEOUT: Duration = Duration::from_secs(3);

const PROTO_EXTENSION: &str = "proto";

/// One `.proto` file in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtoFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the working directory when it is inside it,
    /// otherwise the absolute path.
    pub display_path: String,
}

impl ProtoFile {
    pub fn new(work_dir: &Path, path: PathBuf) -> Self {
        let display_path = match path.strip_prefix(work_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
            _ => path.to_string_lossy().into_owned(),
        };
        Self { path, display_path }
    }
}

/// The files to operate on plus their governing config.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub work_dir: PathBuf,
    pub root_dir: PathBuf,
    /// Directory to the `.proto` files directly inside it, sorted by path.
    pub dir_to_files: BTreeMap<PathBuf, Vec<ProtoFile>>,
    pub config: Config,
}

impl ProjectSnapshot {
    /// All files in directory order.
    pub fn files(&self) -> impl Iterator<Item = &ProtoFile> {
        self.dir_to_files.values().flatten()
    }

    pub fn file_count(&self) -> usize {
        self.dir_to_files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dir_to_files.is_empty()
    }
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Inline config data used instead of searching for config files.
    pub config_data: Option<String>,
    /// Walk deadline; zero disables it.
    pub walk_timeout: Duration,
    /// Checked once per walked entry.
    pub cancel: CancelToken,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            config_data: None,
            walk_timeout: DEFAULT_WALK_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }
}

fn is_proto_file(path: &Path) -> bool {
    path.extension().and_then(OsStr::to_str) == Some(PROTO_EXTENSION)
}

fn is_under_any(path: &Path, prefixes: &BTreeSet<PathBuf>) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

/// Builds the snapshot for the project containing `target`.
///
/// # Errors
///
/// Returns [`DiscoverError::WalkTimeout`] when the walk exceeds
/// `options.walk_timeout`, [`DiscoverError::Cancelled`] once
/// `options.cancel` trips, and [`DiscoverError::MultipleConfigs`] when a
/// nested config governs `.proto` files inside the scanned tree.
pub fn snapshot_for(
    work_dir: &Path,
    target: &Path,
    options: &DiscoverOptions,
) -> Result<ProjectSnapshot, DiscoverError> {
    let work_dir = absolutize(work_dir)?;
    let target = absolutize(target)?;
    if !target.is_dir() {
        return Err(DiscoverError::NotADirectory(target));
    }

    let config = match &options.config_data {
        Some(data) => config_for_data(&target, data)?,
        None => config_for_dir(&target)?,
    };
    let root_dir = config.dir.clone();
    let honor_nested = options.config_data.is_none();

    let deadline = (!options.walk_timeout.is_zero()).then(|| Instant::now() + options.walk_timeout);
    let mut excludes: BTreeSet<PathBuf> = config.excludes.iter().cloned().collect();
    let mut nested_configs: Vec<PathBuf> = Vec::new();
    let mut dir_to_files: BTreeMap<PathBuf, Vec<ProtoFile>> = BTreeMap::new();
    let mut visited = 0usize;

    let mut walker = WalkDir::new(&root_dir).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        if options.cancel.is_cancelled() {
            return Err(DiscoverError::Cancelled);
        }
        if let Some(deadline) = deadline
            && Instant::now() > deadline
        {
            return Err(DiscoverError::WalkTimeout {
                visited,
                root: root_dir,
            });
        }
        let entry = entry?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            visited += 1;
            if is_under_any(path, &excludes) {
                debug!(dir = %path.display(), "skipping excluded directory");
                walker.skip_current_dir();
                continue;
            }
            if honor_nested && path != root_dir {
                if config_file_path_in(path)?.is_some() {
                    nested_configs.push(path.to_path_buf());
                }
                excludes.extend(excludes_for_dir(path)?);
            }
            continue;
        }

        if entry.file_type().is_file() && is_proto_file(path) && !is_under_any(path, &excludes) {
            let Some(parent) = path.parent() else {
                continue;
            };
            dir_to_files
                .entry(parent.to_path_buf())
                .or_default()
                .push(ProtoFile::new(&work_dir, path.to_path_buf()));
        }
    }

    let mut offending: Vec<PathBuf> = nested_configs
        .into_iter()
        .filter(|nested| dir_to_files.keys().any(|dir| dir.starts_with(nested)))
        .collect();
    if !offending.is_empty() {
        offending.sort();
        return Err(DiscoverError::MultipleConfigs(offending));
    }

    for files in dir_to_files.values_mut() {
        files.sort();
    }
    debug!(
        root = %root_dir.display(),
        dirs = dir_to_files.len(),
        visited,
        "discovered project files"
    );

    Ok(ProjectSnapshot {
        work_dir,
        root_dir,
        dir_to_files,
        config,
    })
}

/// Builds a snapshot for explicit `.proto` file arguments.
///
/// Every file must be governed by the same config.
pub fn snapshot_for_files(
    work_dir: &Path,
    files: &[PathBuf],
    options: &DiscoverOptions,
) -> Result<ProjectSnapshot, DiscoverError> {
    let work_dir = absolutize(work_dir)?;
    let mut config: Option<Config> = None;
    let mut dir_to_files: BTreeMap<PathBuf, Vec<ProtoFile>> = BTreeMap::new();

    for file in files {
        let path = absolutize(file)?;
        if !is_proto_file(&path) || !path.is_file() {
            return Err(DiscoverError::NotProtoFile(path));
        }
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| DiscoverError::NotProtoFile(path.clone()))?;
        let file_config = match &options.config_data {
            Some(data) => config_for_data(&work_dir, data)?,
            None => config_for_dir(&parent)?,
        };
        match &config {
            Some(existing) if existing.dir != file_config.dir => {
                return Err(DiscoverError::ConfigMismatch {
                    first: existing.dir.clone(),
                    second: file_config.dir,
                });
            }
            Some(_) => {}
            None => config = Some(file_config),
        }
        let entry = dir_to_files.entry(parent).or_default();
        let proto = ProtoFile::new(&work_dir, path);
        if !entry.contains(&proto) {
            entry.push(proto);
        }
    }

    let config = match config {
        Some(config) => config,
        None => match &options.config_data {
            Some(data) => config_for_data(&work_dir, data)?,
            None => config_for_dir(&work_dir)?,
        },
    };
    for files in dir_to_files.values_mut() {
        files.sort();
    }
    Ok(ProjectSnapshot {
        work_dir,
        root_dir: config.dir.clone(),
        dir_to_files,
        config,
    })
}
