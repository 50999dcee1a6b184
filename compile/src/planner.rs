//! Turns a project snapshot into concrete `protoc` command lines.

use std::path::{Path, PathBuf};

use protoforge_config::{Config, Generator, GeneratorType, relative_to};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cache::ToolchainPaths;
use crate::discover::{ProjectSnapshot, ProtoFile};
use crate::error::Result;

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Output file name stem used for the config directory itself.
const DEFAULT_BASENAME: &str = "default";

const WKT_PREFIX: &str = "google/protobuf/";

/// Go import paths for the well-known types, as used by `protoc-gen-go`.
const GO_WKT_MODIFIERS: &[(&str, &str)] = &[
    ("any", "github.com/golang/protobuf/ptypes/any"),
    ("api", "google.golang.org/genproto/protobuf/api"),
    ("compiler/plugin", "github.com/golang/protobuf/protoc-gen-go/plugin"),
    ("descriptor", "github.com/golang/protobuf/protoc-gen-go/descriptor"),
    ("duration", "github.com/golang/protobuf/ptypes/duration"),
    ("empty", "github.com/golang/protobuf/ptypes/empty"),
    ("field_mask", "google.golang.org/genproto/protobuf/field_mask"),
    ("source_context", "google.golang.org/genproto/protobuf/source_context"),
    ("struct", "github.com/golang/protobuf/ptypes/struct"),
    ("timestamp", "github.com/golang/protobuf/ptypes/timestamp"),
    ("type", "google.golang.org/genproto/protobuf/ptype"),
    ("wrappers", "github.com/golang/protobuf/ptypes/wrappers"),
];

const GOGO_TYPES: &str = "github.com/gogo/protobuf/types";

/// Go import paths for the well-known types, as used by `protoc-gen-gogo*`.
const GOGO_WKT_MODIFIERS: &[(&str, &str)] = &[
    ("any", GOGO_TYPES),
    ("api", GOGO_TYPES),
    ("compiler/plugin", "github.com/gogo/protobuf/protoc-gen-gogo/plugin"),
    ("descriptor", "github.com/gogo/protobuf/protoc-gen-gogo/descriptor"),
    ("duration", GOGO_TYPES),
    ("empty", GOGO_TYPES),
    ("field_mask", GOGO_TYPES),
    ("source_context", GOGO_TYPES),
    ("struct", GOGO_TYPES),
    ("timestamp", GOGO_TYPES),
    ("type", GOGO_TYPES),
    ("wrappers", GOGO_TYPES),
];

/// What the invocations should produce.
///
/// `descriptor_set` and `generate` combine: each directory then gets its
/// descriptor-set plan followed by its generator plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Write a descriptor set per directory to a temporary file.
    pub descriptor_set: bool,
    pub include_imports: bool,
    pub include_source_info: bool,
    /// Use the explicit include flags instead of always passing both.
    pub full_control: bool,
    /// Run the configured generators.
    pub generate: bool,
}

/// One `protoc` invocation for one directory.
#[derive(Debug)]
pub struct InvocationPlan {
    pub dir: PathBuf,
    pub program: PathBuf,
    args: Vec<String>,
    pub files: Vec<PathBuf>,
    /// Removed when the plan is dropped.
    descriptor: Option<NamedTempFile>,
    pub generator: Option<String>,
    /// Directories that must exist before the invocation runs.
    pub output_dirs: Vec<PathBuf>,
}

impl InvocationPlan {
    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full command line, space separated, for dry runs and logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Temporary descriptor-set output, for descriptor-set plans.
    pub fn descriptor_path(&self) -> Option<&Path> {
        self.descriptor.as_ref().map(NamedTempFile::path)
    }
}

/// Builds every invocation needed for `snapshot`, in directory order.
///
/// Per directory: a descriptor-set plan when asked for, plus one plan per
/// generator in generate mode. A directory gets a compile-only plan when
/// neither is requested. Generate mode without generators logs a warning
/// and yields nothing.
pub fn plan_invocations(
    snapshot: &ProjectSnapshot,
    toolchain: &ToolchainPaths,
    options: &PlanOptions,
) -> Result<Vec<InvocationPlan>> {
    let config = &snapshot.config;
    if options.generate && !options.descriptor_set && config.generate.generators.is_empty() {
        warn!(config = %config.dir.display(), "no generators configured, nothing to generate");
        return Ok(Vec::new());
    }

    let mut plans = Vec::new();
    for (dir, files) in &snapshot.dir_to_files {
        let base_args = include_args(config, toolchain, dir);
        let file_args: Vec<String> = files
            .iter()
            .map(|f| f.path.display().to_string())
            .collect();
        let file_paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

        let mut push = |output: Vec<String>,
                        descriptor: Option<NamedTempFile>,
                        generator: Option<String>,
                        output_dirs: Vec<PathBuf>| {
            let mut args = base_args.clone();
            args.extend(output);
            args.extend(file_args.iter().cloned());
            let plan = InvocationPlan {
                dir: dir.clone(),
                program: toolchain.protoc.clone(),
                args,
                files: file_paths.clone(),
                descriptor,
                generator,
                output_dirs,
            };
            debug!(command = %plan.command_line(), "planned protoc invocation");
            plans.push(plan);
        };

        if options.descriptor_set {
            let temp = tempfile::Builder::new()
                .prefix("protoforge-")
                .suffix(".bin")
                .tempfile()?;
            let mut output = vec!["-o".to_string(), temp.path().display().to_string()];
            if !options.full_control || options.include_imports {
                output.push("--include_imports".to_string());
            }
            if !options.full_control || options.include_source_info {
                output.push("--include_source_info".to_string());
            }
            push(output, Some(temp), None, Vec::new());
        }
        if options.generate {
            for generator in &config.generate.generators {
                let (output, output_dirs) =
                    generator_args(snapshot, generator, dir, &snapshot.dir_to_files);
                push(output, None, Some(generator.name.clone()), output_dirs);
            }
        }
        if !options.descriptor_set && !options.generate {
            push(
                vec!["-o".to_string(), NULL_DEVICE.to_string()],
                None,
                None,
                Vec::new(),
            );
        }
    }
    Ok(plans)
}

/// Creates every output directory the plans write into.
pub fn prepare_output_dirs(plans: &[InvocationPlan]) -> Result<()> {
    for dir in plans.iter().flat_map(|plan| &plan.output_dirs) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn include_args(config: &Config, toolchain: &ToolchainPaths, dir: &Path) -> Vec<String> {
    let mut includes: Vec<&Path> = config
        .compile
        .include_paths
        .iter()
        .map(PathBuf::as_path)
        .collect();
    includes.push(&toolchain.wkt_include);
    let covered = |path: &Path| includes.iter().any(|inc| path.starts_with(inc));
    if !covered(dir) && !covered(&config.dir) {
        includes.push(&config.dir);
    }
    includes
        .into_iter()
        .map(|inc| format!("-I{}", inc.display()))
        .collect()
}

fn generator_args(
    snapshot: &ProjectSnapshot,
    generator: &Generator,
    dir: &Path,
    dir_to_files: &std::collections::BTreeMap<PathBuf, Vec<ProtoFile>>,
) -> (Vec<String>, Vec<PathBuf>) {
    let config = &snapshot.config;
    let rel = relative_to(dir, &config.dir);

    if generator.is_descriptor_set() {
        let file = suffixed_output(generator, &rel);
        let mut args = vec!["-o".to_string(), file.display().to_string()];
        if generator.include_imports {
            args.push("--include_imports".to_string());
        }
        if generator.include_source_info {
            args.push("--include_source_info".to_string());
        }
        return (args, parent_dirs(&file));
    }

    let (out_path, output_dirs) = if generator.file_suffix.is_empty() {
        (generator.output.clone(), vec![generator.output.clone()])
    } else {
        let file = suffixed_output(generator, &rel);
        let dirs = parent_dirs(&file);
        (file, dirs)
    };

    let flags = if generator.kind.is_go_family() {
        go_flags(config, generator, dir, dir_to_files)
    } else {
        generator.flags.clone()
    };
    let out_flag = if flags.is_empty() {
        format!("--{}_out={}", generator.name, out_path.display())
    } else {
        format!("--{}_out={}:{}", generator.name, flags, out_path.display())
    };

    let mut args = vec![out_flag];
    if let Some(path) = &generator.path {
        args.push(format!("--plugin=protoc-gen-{}={}", generator.name, path.display()));
    }
    (args, output_dirs)
}

/// `{output}/{rel}/{basename}.{suffix}`.
fn suffixed_output(generator: &Generator, rel: &Path) -> PathBuf {
    let basename = if rel == Path::new(".") {
        DEFAULT_BASENAME.to_string()
    } else {
        rel.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_BASENAME.to_string())
    };
    let mut file = generator.output.clone();
    if rel != Path::new(".") {
        file.push(rel);
    }
    file.push(format!("{basename}.{}", generator.file_suffix));
    file
}

fn parent_dirs(file: &Path) -> Vec<PathBuf> {
    file.parent().map(Path::to_path_buf).into_iter().collect()
}

/// User flags, then project modifiers, then the well-known types table,
/// then extra modifiers. Each group after the first is sorted.
fn go_flags(
    config: &Config,
    generator: &Generator,
    dir: &Path,
    dir_to_files: &std::collections::BTreeMap<PathBuf, Vec<ProtoFile>>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !generator.flags.is_empty() {
        parts.push(generator.flags.clone());
    }

    let import_path = &config.generate.go_options.import_path;
    if let (false, Some(output_rel)) = (import_path.is_empty(), &generator.output_rel) {
        let mut modifiers: Vec<String> = dir_to_files
            .iter()
            .filter(|(other, _)| other.as_path() != dir)
            .flat_map(|(other, files)| {
                let rel_dir = to_slash(&relative_to(other, &config.dir));
                let go_package = clean_import_path(&format!(
                    "{import_path}/{}/{rel_dir}",
                    to_slash(output_rel)
                ));
                files.iter().map(move |file| {
                    let rel_file = to_slash(&relative_to(&file.path, &config.dir));
                    format!("M{rel_file}={go_package}")
                })
            })
            .collect();
        modifiers.sort();
        parts.extend(modifiers);
    }

    let table = match generator.kind {
        GeneratorType::Gogo => GOGO_WKT_MODIFIERS,
        _ => GO_WKT_MODIFIERS,
    };
    let mut wkt: Vec<String> = table
        .iter()
        .map(|(name, package)| format!("M{WKT_PREFIX}{name}.proto={package}"))
        .collect();
    wkt.sort();
    parts.extend(wkt);

    parts.extend(
        config
            .generate
            .go_options
            .extra_modifiers
            .iter()
            .map(|(file, package)| format!("M{file}={package}")),
    );
    parts.join(",")
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves `.` and `..` segments in a slash-separated import path.
fn clean_import_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(last) if *last != "..") {
                    out.pop();
                } else {
                    out.push(segment);
                }
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoforge_config::{clean_path, config_for_data};
    use std::collections::BTreeMap;

    fn snapshot(root: &Path, yaml: &str, rel_files: &[&str]) -> ProjectSnapshot {
        let config = config_for_data(root, yaml).unwrap();
        let mut dir_to_files: BTreeMap<PathBuf, Vec<ProtoFile>> = BTreeMap::new();
        for rel in rel_files {
            let path = root.join(rel);
            dir_to_files
                .entry(path.parent().unwrap().to_path_buf())
                .or_default()
                .push(ProtoFile::new(root, path));
        }
        ProjectSnapshot {
            work_dir: root.to_path_buf(),
            root_dir: root.to_path_buf(),
            dir_to_files,
            config,
        }
    }

    fn toolchain() -> ToolchainPaths {
        ToolchainPaths {
            protoc: PathBuf::from("/cache/bin/protoc"),
            wkt_include: PathBuf::from("/cache/include"),
        }
    }

    #[test]
    fn test_compile_only_plan_per_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(&root, "{}", &["a/x.proto", "a/y.proto", "b/z.proto"]);
        let plans = plan_invocations(&snap, &toolchain(), &PlanOptions::default()).unwrap();
        assert_eq!(plans.len(), 2);
        let args = plans[0].args();
        assert_eq!(args[0], "-I/cache/include");
        assert_eq!(args[1], format!("-I{}", root.display()));
        assert_eq!(args[2], "-o");
        assert_eq!(args[3], NULL_DEVICE);
        assert_eq!(args[4], root.join("a/x.proto").display().to_string());
        assert_eq!(args[5], root.join("a/y.proto").display().to_string());
        assert!(plans[0].command_line().starts_with("/cache/bin/protoc -I/cache/include"));
    }

    #[test]
    fn test_config_dir_not_added_when_covered_by_include() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(&root, "compiler:\n  includes: [ \".\" ]\n", &["a/x.proto"]);
        let plans = plan_invocations(&snap, &toolchain(), &PlanOptions::default()).unwrap();
        let includes: Vec<&String> = plans[0].args().iter().filter(|a| a.starts_with("-I")).collect();
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0], &format!("-I{}", root.display()));
        assert_eq!(includes[1], "-I/cache/include");
    }

    #[test]
    fn test_descriptor_set_plan_owns_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(&root, "{}", &["x.proto"]);
        let options = PlanOptions {
            descriptor_set: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        let path = plans[0].descriptor_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(plans[0].args().contains(&"--include_imports".to_string()));
        assert!(plans[0].args().contains(&"--include_source_info".to_string()));
        drop(plans);
        assert!(!path.exists());

        let options = PlanOptions {
            descriptor_set: true,
            full_control: true,
            include_imports: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        assert!(plans[0].args().contains(&"--include_imports".to_string()));
        assert!(!plans[0].args().contains(&"--include_source_info".to_string()));
    }

    #[test]
    fn test_generate_without_generators_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(&root, "{}", &["x.proto"]);
        let options = PlanOptions {
            generate: true,
            ..PlanOptions::default()
        };
        assert!(plan_invocations(&snap, &toolchain(), &options).unwrap().is_empty());
    }

    #[test]
    fn test_descriptor_set_and_generators_combine() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(
            &root,
            "generators:\n  - name: cpp\n    output: gen/cpp\n",
            &["a/x.proto", "b/y.proto"],
        );
        let options = PlanOptions {
            descriptor_set: true,
            generate: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        assert_eq!(plans.len(), 4);
        for pair in plans.chunks(2) {
            assert_eq!(pair[0].dir, pair[1].dir);
            assert!(pair[0].descriptor_path().is_some());
            assert!(pair[0].generator.is_none());
            assert!(pair[1].descriptor_path().is_none());
            assert_eq!(pair[1].generator.as_deref(), Some("cpp"));
        }
        assert!(plans.iter().all(|p| !p.args().contains(&NULL_DEVICE.to_string())));
    }

    #[test]
    fn test_descriptor_set_kept_without_generators() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let snap = snapshot(&root, "{}", &["x.proto"]);
        let options = PlanOptions {
            descriptor_set: true,
            generate: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        assert_eq!(plans.len(), 1);
        assert!(plans[0].descriptor_path().is_some());
    }

    #[test]
    fn test_go_generator_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let yaml = "generators:\n  - name: go\n    type: go\n    flags: plugins=grpc\n    output: gen/go\ngo_options:\n  import_path: example.com/idl\n  extra_modifiers:\n    google/api/http.proto: google.golang.org/genproto/googleapis/api/annotations\n";
        let snap = snapshot(&root, yaml, &["acme/v1/a.proto", "acme/v2/b.proto", "c.proto"]);
        let options = PlanOptions {
            generate: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].dir, root);
        assert_eq!(plans[0].generator.as_deref(), Some("go"));

        let out = plans[1]
            .args()
            .iter()
            .find(|a| a.starts_with("--go_out="))
            .unwrap();
        let (flags, path) = out["--go_out=".len()..].rsplit_once(':').unwrap();
        assert_eq!(path, root.join("gen/go").display().to_string());
        let parts: Vec<&str> = flags.split(',').collect();
        assert_eq!(parts[0], "plugins=grpc");
        assert_eq!(parts[1], "Macme/v2/b.proto=example.com/idl/gen/go/acme/v2");
        assert_eq!(parts[2], "Mc.proto=example.com/idl/gen/go");
        assert_eq!(parts[3], "Mgoogle/protobuf/any.proto=github.com/golang/protobuf/ptypes/any");
        assert_eq!(
            parts.last().unwrap(),
            &"Mgoogle/api/http.proto=google.golang.org/genproto/googleapis/api/annotations"
        );
        assert!(!flags.contains("Macme/v1/a.proto"));
        assert_eq!(plans[1].output_dirs, vec![root.join("gen/go")]);
    }

    #[test]
    fn test_gogo_table_and_plugin_path() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let yaml = "generators:\n  - name: gogofast\n    type: gogo\n    output: out\n    path: bin/protoc-gen-gogofast\n";
        let snap = snapshot(&root, yaml, &["x.proto"]);
        let options = PlanOptions {
            generate: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        let args = plans[0].args();
        assert!(args.iter().any(|a| a.contains(
            "Mgoogle/protobuf/descriptor.proto=github.com/gogo/protobuf/protoc-gen-gogo/descriptor"
        )));
        assert!(args.iter().any(|a| a.contains("Mgoogle/protobuf/timestamp.proto=github.com/gogo/protobuf/types")));
        assert!(args.contains(&format!(
            "--plugin=protoc-gen-gogofast={}",
            root.join("bin/protoc-gen-gogofast").display()
        )));
    }

    #[test]
    fn test_file_suffix_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let yaml = "generators:\n  - name: descriptor_set\n    output: desc\n    file_suffix: bin\n    include_imports: true\n  - name: doc\n    output: doc\n    file_suffix: md\n    flags: markdown\n";
        let snap = snapshot(&root, yaml, &["x.proto", "acme/v1/y.proto"]);
        let options = PlanOptions {
            generate: true,
            ..PlanOptions::default()
        };
        let plans = plan_invocations(&snap, &toolchain(), &options).unwrap();
        assert_eq!(plans.len(), 4);

        let root_desc = &plans[0];
        let out_index = root_desc.args().iter().position(|a| a == "-o").unwrap();
        assert_eq!(
            root_desc.args()[out_index + 1],
            root.join("desc/default.bin").display().to_string()
        );
        assert!(root_desc.args().contains(&"--include_imports".to_string()));
        assert!(!root_desc.args().contains(&"--include_source_info".to_string()));

        let nested_doc = &plans[3];
        assert!(nested_doc.args().contains(&format!(
            "--doc_out=markdown:{}",
            root.join("doc/acme/v1/v1.md").display()
        )));
        assert_eq!(nested_doc.output_dirs, vec![root.join("doc/acme/v1")]);

        prepare_output_dirs(&plans).unwrap();
        assert!(root.join("desc").is_dir());
        assert!(root.join("doc/acme/v1").is_dir());
    }

    #[test]
    fn test_clean_import_path() {
        assert_eq!(clean_import_path("example.com/idl/../out/go/./a"), "example.com/out/go/a");
        assert_eq!(clean_import_path("example.com/idl/gen/."), "example.com/idl/gen");
    }
}
