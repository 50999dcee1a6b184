//! Locating config files and resolving them into a [`Config`].

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use protoforge_core::BreakingConfig;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::external::{
    ExternalCompatibility, ExternalCompiler, ExternalConfig, ExternalCreate,
    ExternalCreatePackage, ExternalFileHeader, ExternalGenerator, ExternalGoOptions,
    ExternalLint, ExternalLintIgnore, ExternalLintRules,
};
use crate::types::{
    CompileConfig, Config, CreateConfig, FileHeader, GenerateConfig, Generator, GeneratorType,
    GoOptions, LintConfig, DEFAULT_PROTOC_VERSION,
};

/// Recognized config file names, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &["protoforge.yaml", "protoforge.json"];

const PLUGIN_PREFIX: &str = "protoc-gen-";
const INLINE_ORIGIN: &str = "<config-data>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(OsStr::to_str) {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigError::UnrecognizedFileName(path.to_path_buf())),
        }
    }
}

/// Returns the config file directly inside `dir`, if there is one.
///
/// # Errors
///
/// Returns [`ConfigError::MultipleConfigFiles`] if more than one recognized
/// name exists in `dir`.
pub fn config_file_path_in(dir: &Path) -> Result<Option<PathBuf>> {
    let found: Vec<&str> = CONFIG_FILE_NAMES
        .iter()
        .copied()
        .filter(|name| dir.join(name).is_file())
        .collect();
    match found.as_slice() {
        [] => Ok(None),
        [name] => Ok(Some(dir.join(name))),
        _ => Err(ConfigError::MultipleConfigFiles {
            dir: dir.to_path_buf(),
            names: found.iter().map(|n| n.to_string()).collect(),
        }),
    }
}

/// Resolves the config governing `dir`.
///
/// Walks from `dir` towards the filesystem root; the first directory holding
/// a config file wins. With no config anywhere, returns defaults rooted at
/// `dir`.
pub fn config_for_dir(dir: &Path) -> Result<Config> {
    let dir = absolutize(dir)?;
    for current in dir.ancestors() {
        if let Some(path) = config_file_path_in(current)? {
            debug!(config = %path.display(), dir = %dir.display(), "found config file");
            return config_for_file(&path);
        }
    }
    debug!(dir = %dir.display(), "no config file found, using defaults");
    Ok(Config::default_for(dir))
}

/// Reads and resolves one config file. Its directory becomes the config dir.
pub fn config_for_file(path: &Path) -> Result<Config> {
    let path = absolutize(path)?;
    let format = Format::from_path(&path)?;
    let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let origin = path.display().to_string();
    let external = parse(&data, format, &origin)?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    resolve(dir, Some(path), &origin, external)
}

/// Resolves inline config data as if it lived in `dir`.
///
/// The data may be JSON or YAML; JSON documents are valid YAML.
pub fn config_for_data(dir: &Path, data: &str) -> Result<Config> {
    let dir = absolutize(dir)?;
    let external = parse(data, Format::Yaml, INLINE_ORIGIN)?;
    resolve(dir, None, INLINE_ORIGIN, external)
}

/// Returns the excludes declared by a config file directly inside `dir`.
///
/// Parent directories are not consulted.
pub fn excludes_for_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    match config_file_path_in(dir)? {
        Some(path) => Ok(config_for_file(&path)?.excludes),
        None => Ok(Vec::new()),
    }
}

fn parse(data: &str, format: Format, origin: &str) -> Result<ExternalConfig> {
    if data.trim().is_empty() {
        return Ok(ExternalConfig::default());
    }
    match format {
        Format::Yaml => serde_yaml::from_str(data).map_err(|source| ConfigError::Yaml {
            origin: origin.to_string(),
            source,
        }),
        Format::Json => serde_json::from_str(data).map_err(|source| ConfigError::Json {
            origin: origin.to_string(),
            source,
        }),
    }
}

fn invalid(origin: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        origin: origin.to_string(),
        message: message.into(),
    }
}

/// Makes `path` absolute against the current directory and removes `.` and
/// `..` components lexically.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(clean_path(path));
    }
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(clean_path(&cwd.join(path)))
}

/// Lexically normalizes a path without touching the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Expresses absolute `path` relative to absolute `base`, using `..` where
/// needed.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component<'_>> = path.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &path[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

fn resolve_in(dir: &Path, raw: &str) -> PathBuf {
    clean_path(&dir.join(raw))
}

fn validate_version(version: &str, origin: &str) -> Result<()> {
    let parts: Vec<&str> = version.split('.').collect();
    let valid = matches!(parts.len(), 2 | 3)
        && parts.iter().all(|p| !p.is_empty() && p.parse::<u64>().is_ok());
    if valid {
        Ok(())
    } else {
        Err(invalid(
            origin,
            format!("compiler version {version:?} is not of the form MAJOR.MINOR or MAJOR.MINOR.PATCH"),
        ))
    }
}

fn sorted_unique<T: Ord>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    items.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

fn resolve(dir: PathBuf, path: Option<PathBuf>, origin: &str, external: ExternalConfig) -> Result<Config> {
    let compile = resolve_compile(&dir, origin, &external.compiler)?;

    let mut excludes = Vec::new();
    for raw in &external.excludes {
        let exclude = resolve_in(&dir, raw);
        if exclude == dir || !exclude.starts_with(&dir) {
            return Err(ConfigError::ExcludeOutsideDir { exclude, dir });
        }
        excludes.push(exclude);
    }
    let excludes = sorted_unique(excludes);

    let go_options = GoOptions {
        import_path: external.go_options.import_path.clone(),
        extra_modifiers: external.go_options.extra_modifiers.clone(),
    };
    let generators = resolve_generators(&dir, origin, &external.generators, &go_options)?;

    let breaking = BreakingConfig {
        include_beta: external.compatibility.include_beta,
        allow_beta_deps: external.compatibility.allow_beta_deps,
    };
    let lint = resolve_lint(&dir, origin, &external.lint)?;
    let create = CreateConfig {
        dir_to_base_package: external
            .create
            .packages
            .iter()
            .map(|p| (resolve_in(&dir, &p.directory), p.name.clone()))
            .collect(),
    };

    Ok(Config {
        dir,
        path,
        excludes,
        compile,
        generate: GenerateConfig {
            go_options,
            generators,
        },
        breaking,
        lint,
        create,
    })
}

fn resolve_compile(dir: &Path, origin: &str, compiler: &ExternalCompiler) -> Result<CompileConfig> {
    let protoc_version = if compiler.version.is_empty() {
        DEFAULT_PROTOC_VERSION.to_string()
    } else {
        validate_version(&compiler.version, origin)?;
        compiler.version.clone()
    };
    Ok(CompileConfig {
        protoc_version,
        include_paths: sorted_unique(compiler.includes.iter().map(|raw| resolve_in(dir, raw))),
        include_well_known_types: true,
        allow_unused_imports: compiler.allow_unused_imports,
    })
}

fn resolve_generators(
    dir: &Path,
    origin: &str,
    external: &[ExternalGenerator],
    go_options: &GoOptions,
) -> Result<Vec<Generator>> {
    let mut seen = BTreeSet::new();
    let mut generators = Vec::with_capacity(external.len());
    for raw in external {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(invalid(origin, "generator name is required"));
        }
        if name.starts_with(PLUGIN_PREFIX) {
            return Err(invalid(
                origin,
                format!("generator name {name:?} must not start with {PLUGIN_PREFIX:?}"),
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(invalid(origin, format!("duplicate generator name {name:?}")));
        }
        let kind = GeneratorType::parse(&raw.kind).ok_or_else(|| {
            invalid(
                origin,
                format!(
                    "generator {name:?} has unknown type {:?}, expected go, gogo or none",
                    raw.kind
                ),
            )
        })?;
        if raw.output.is_empty() {
            return Err(invalid(origin, format!("generator {name:?} has no output")));
        }
        let is_descriptor_set = name == crate::types::DESCRIPTOR_SET_GENERATOR;
        if (raw.include_imports || raw.include_source_info) && !is_descriptor_set {
            return Err(invalid(
                origin,
                format!(
                    "generator {name:?}: include_imports and include_source_info are only valid for the descriptor_set generator"
                ),
            ));
        }
        if raw.file_suffix.starts_with('.') {
            return Err(invalid(
                origin,
                format!(
                    "generator {name:?}: file_suffix {:?} must not start with \".\"",
                    raw.file_suffix
                ),
            ));
        }
        if is_descriptor_set && raw.file_suffix.is_empty() {
            return Err(invalid(
                origin,
                "the descriptor_set generator requires a file_suffix",
            ));
        }

        let output_path = Path::new(&raw.output);
        let (output, output_rel) = if output_path.is_absolute() {
            (clean_path(output_path), None)
        } else {
            (resolve_in(dir, &raw.output), Some(clean_path(output_path)))
        };
        if kind.is_go_family() && output_rel.is_none() && !go_options.import_path.is_empty() {
            return Err(invalid(
                origin,
                format!(
                    "generator {name:?} has an absolute output and cannot be combined with go_options.import_path"
                ),
            ));
        }

        generators.push(Generator {
            name: name.to_string(),
            kind,
            flags: raw.flags.clone(),
            output,
            output_rel,
            path: (!raw.path.is_empty()).then(|| resolve_in(dir, &raw.path)),
            file_suffix: raw.file_suffix.clone(),
            include_imports: raw.include_imports,
            include_source_info: raw.include_source_info,
        });
    }
    Ok(generators)
}

fn resolve_lint(dir: &Path, origin: &str, lint: &ExternalLint) -> Result<LintConfig> {
    let include_ids = sorted_unique(lint.rules.add.iter().cloned());
    let exclude_ids = sorted_unique(lint.rules.remove.iter().cloned());
    if let Some(id) = include_ids.iter().find(|id| exclude_ids.contains(id)) {
        return Err(invalid(
            origin,
            format!("lint rule {id:?} is listed in both rules.add and rules.remove"),
        ));
    }

    let mut ignore_id_to_files: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
    for ignore in &lint.ignores {
        ignore_id_to_files
            .entry(ignore.id.clone())
            .or_default()
            .extend(ignore.files.iter().map(|f| resolve_in(dir, f)));
    }

    let header = &lint.file_header;
    let file_header = match (header.path.is_empty(), header.content.is_empty()) {
        (false, false) => {
            return Err(invalid(
                origin,
                "lint.file_header cannot set both path and content",
            ));
        }
        (true, true) => {
            if header.is_commented {
                return Err(invalid(
                    origin,
                    "lint.file_header.is_commented requires path or content",
                ));
            }
            None
        }
        (false, true) => Some(FileHeader {
            path: Some(resolve_in(dir, &header.path)),
            content: String::new(),
            is_commented: header.is_commented,
        }),
        (true, false) => Some(FileHeader {
            path: None,
            content: header.content.clone(),
            is_commented: header.is_commented,
        }),
    };

    Ok(LintConfig {
        group: lint.group.clone(),
        include_ids,
        exclude_ids,
        ignore_id_to_files: ignore_id_to_files
            .into_iter()
            .map(|(id, files)| (id, files.into_iter().collect()))
            .collect(),
        file_header,
        java_package_prefix: lint.java_package_prefix.clone(),
    })
}

fn display_rel(path: &Path, dir: &Path) -> String {
    relative_to(path, dir).to_string_lossy().replace('\\', "/")
}

impl Config {
    /// Renders this config back into document form, with paths relative to
    /// [`Config::dir`] where they were relative.
    pub fn to_external(&self) -> ExternalConfig {
        let dir = &self.dir;
        let compiler = ExternalCompiler {
            version: if self.compile.protoc_version == DEFAULT_PROTOC_VERSION {
                String::new()
            } else {
                self.compile.protoc_version.clone()
            },
            includes: self
                .compile
                .include_paths
                .iter()
                .map(|p| display_rel(p, dir))
                .collect(),
            allow_unused_imports: self.compile.allow_unused_imports,
        };
        let generators = self
            .generate
            .generators
            .iter()
            .map(|g| ExternalGenerator {
                name: g.name.clone(),
                kind: match g.kind {
                    GeneratorType::None => String::new(),
                    other => other.as_str().to_string(),
                },
                flags: g.flags.clone(),
                output: match &g.output_rel {
                    Some(rel) => rel.to_string_lossy().replace('\\', "/"),
                    None => g.output.to_string_lossy().into_owned(),
                },
                path: g
                    .path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                file_suffix: g.file_suffix.clone(),
                include_imports: g.include_imports,
                include_source_info: g.include_source_info,
            })
            .collect();
        let file_header = match &self.lint.file_header {
            Some(header) => ExternalFileHeader {
                path: header
                    .path
                    .as_ref()
                    .map(|p| display_rel(p, dir))
                    .unwrap_or_default(),
                content: header.content.clone(),
                is_commented: header.is_commented,
            },
            None => ExternalFileHeader::default(),
        };
        ExternalConfig {
            compiler,
            excludes: self.excludes.iter().map(|p| display_rel(p, dir)).collect(),
            generators,
            go_options: ExternalGoOptions {
                import_path: self.generate.go_options.import_path.clone(),
                extra_modifiers: self.generate.go_options.extra_modifiers.clone(),
            },
            compatibility: ExternalCompatibility {
                include_beta: self.breaking.include_beta,
                allow_beta_deps: self.breaking.allow_beta_deps,
            },
            lint: ExternalLint {
                group: self.lint.group.clone(),
                rules: ExternalLintRules {
                    add: self.lint.include_ids.clone(),
                    remove: self.lint.exclude_ids.clone(),
                },
                ignores: self
                    .lint
                    .ignore_id_to_files
                    .iter()
                    .map(|(id, files)| ExternalLintIgnore {
                        id: id.clone(),
                        files: files.iter().map(|f| display_rel(f, dir)).collect(),
                    })
                    .collect(),
                file_header,
                java_package_prefix: self.lint.java_package_prefix.clone(),
            },
            create: ExternalCreate {
                packages: self
                    .create
                    .dir_to_base_package
                    .iter()
                    .map(|(directory, name)| ExternalCreatePackage {
                        directory: display_rel(directory, dir),
                        name: name.clone(),
                    })
                    .collect(),
            },
        }
    }

    /// Writes this config to `path` as YAML or JSON, chosen by extension.
    ///
    /// Relative paths are written against [`Config::dir`], so `path` should
    /// live in that directory for the file to read back identically.
    pub fn write_config(&self, path: &Path) -> Result<()> {
        let format = Format::from_path(path)?;
        let origin = path.display().to_string();
        let external = self.to_external();
        let data = match format {
            Format::Yaml => serde_yaml::to_string(&external)
                .map_err(|source| ConfigError::Yaml { origin, source })?,
            Format::Json => {
                let mut json = serde_json::to_string_pretty(&external)
                    .map_err(|source| ConfigError::Json { origin, source })?;
                json.push('\n');
                json
            }
        };
        std::fs::write(path, data).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
