use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use prost::Message;
use prost_types::FileDescriptorSet;
use protoforge_compile::{
    CancelToken, Compiler, DiscoverOptions, PlanOptions, ProjectSnapshot, ToolchainCache,
    ToolchainOptions, install_signal_handlers, package_set_from_files, snapshot_for,
    snapshot_for_files,
};
use protoforge_config::{Config, absolutize, config_for_data, config_for_dir};
use protoforge_core::{
    BreakingChecker, BreakingConfig, DEFAULT_ERROR_FORMAT, Failure, FailureField,
    render_json_lines, render_text_lines,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when the run completed but reported failures.
const FAILURE_EXIT_CODE: i32 = 255;

#[derive(Debug, Parser)]
#[command(name = "protoforge")]
#[command(about = "Compile, generate and check protobuf projects")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Cache directory for downloaded protoc releases.
    #[arg(long, global = true, env = "PROTOFORGE_CACHE_PATH")]
    cache_path: Option<PathBuf>,
    /// Download protoc from this URL instead of the release page.
    #[arg(long, global = true, env = "PROTOFORGE_PROTOC_URL")]
    protoc_url: Option<String>,
    /// Use this protoc binary. Requires --protoc-wkt-path.
    #[arg(long, global = true, env = "PROTOFORGE_PROTOC_BIN_PATH")]
    protoc_bin_path: Option<PathBuf>,
    /// Well-known types include directory for --protoc-bin-path.
    #[arg(long, global = true, env = "PROTOFORGE_PROTOC_WKT_PATH")]
    protoc_wkt_path: Option<PathBuf>,
    /// Inline config data (YAML or JSON) used instead of config files.
    #[arg(long, global = true)]
    config_data: Option<String>,
    /// Directory walk timeout in milliseconds; 0 disables it.
    #[arg(long, global = true, default_value_t = 3000)]
    walk_timeout_ms: u64,
    /// Print failures as JSON lines.
    #[arg(long, global = true)]
    json: bool,
    /// Colon-separated failure fields (filename, line, column, id, message).
    #[arg(long, global = true, default_value = DEFAULT_ERROR_FORMAT)]
    error_format: String,
    /// Enable debug logging on stderr.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile .proto files and report errors.
    Compile(BuildArgs),
    /// Run the configured generators.
    Generate(BuildArgs),
    /// Write a FileDescriptorSet for the project.
    DescriptorSet(DescriptorSetArgs),
    /// List the .proto files in the project.
    Files(TargetArgs),
    /// Breaking-change detection.
    Break(BreakArgs),
    /// Manage the protoc cache.
    Cache(CacheArgs),
    /// Inspect project configuration.
    Config(ConfigArgs),
    /// Print the version.
    Version,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// A directory or .proto files (default: current directory).
    targets: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct BuildArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Print the protoc command lines instead of running them.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DescriptorSetArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Output file.
    #[arg(short = 'o', long)]
    output: PathBuf,
    /// Include all transitive imports.
    #[arg(long)]
    include_imports: bool,
    /// Retain source info.
    #[arg(long)]
    include_source_info: bool,
}

#[derive(Debug, Args)]
struct BreakArgs {
    #[command(subcommand)]
    operation: BreakOperation,
}

#[derive(Debug, Subcommand)]
enum BreakOperation {
    /// Compare the project against a previous version.
    Check(BreakCheckArgs),
    /// List the rules a check would run.
    List(BreakPolicyArgs),
}

#[derive(Debug, Args)]
struct BreakPolicyArgs {
    /// Check beta packages too.
    #[arg(long)]
    include_beta: bool,
    /// Allow stable packages to depend on beta packages.
    #[arg(long)]
    allow_beta_deps: bool,
}

#[derive(Debug, Args)]
struct BreakCheckArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Directory holding the previous version of the project.
    #[arg(long, conflicts_with = "against_descriptor_set", required_unless_present = "against_descriptor_set")]
    against: Option<PathBuf>,
    /// FileDescriptorSet file of the previous version.
    #[arg(long)]
    against_descriptor_set: Option<PathBuf>,
    #[command(flatten)]
    policy: BreakPolicyArgs,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    operation: CacheOperation,
}

#[derive(Debug, Subcommand)]
enum CacheOperation {
    /// Download the protoc release the project needs.
    Update(TargetArgs),
    /// Delete every cached protoc release.
    Delete,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    operation: ConfigOperation,
}

#[derive(Debug, Subcommand)]
enum ConfigOperation {
    /// Print the effective config as YAML.
    Show(ConfigShowArgs),
}

#[derive(Debug, Args)]
struct ConfigShowArgs {
    /// Directory whose config to show (default: current directory).
    dir: Option<PathBuf>,
}

fn main() {
    let Cli { global, command } = Cli::parse();
    init_tracing(global.debug);
    if let Err(err) = install_signal_handlers() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let fields = match FailureField::parse_list(&global.error_format) {
        Ok(fields) => fields,
        Err(err) => {
            eprintln!("error: --error-format: {err}");
            std::process::exit(1);
        }
    };

    let result = Context::new(global.clone()).and_then(|ctx| match command {
        Command::Compile(args) => run_build(&ctx, args, PlanOptions::default()),
        Command::Generate(args) => run_build(
            &ctx,
            args,
            PlanOptions {
                generate: true,
                ..PlanOptions::default()
            },
        ),
        Command::DescriptorSet(args) => run_descriptor_set(&ctx, args),
        Command::Files(args) => run_files(&ctx, args),
        Command::Break(args) => match args.operation {
            BreakOperation::Check(args) => run_break_check(&ctx, args),
            BreakOperation::List(args) => run_break_list(args),
        },
        Command::Cache(args) => match args.operation {
            CacheOperation::Update(args) => run_cache_update(&ctx, args),
            CacheOperation::Delete => run_cache_delete(&ctx),
        },
        Command::Config(args) => match args.operation {
            ConfigOperation::Show(args) => run_config_show(&ctx, args),
        },
        Command::Version => {
            println!("{PACKAGE_VERSION}");
            Ok(Vec::new())
        }
    });

    match result {
        Ok(failures) if failures.is_empty() => {}
        Ok(failures) => {
            let rendered = if global.json {
                render_json_lines(&failures).unwrap_or_else(|err| format!("{err}\n"))
            } else {
                render_text_lines(&failures, &fields)
            };
            print!("{rendered}");
            std::process::exit(FAILURE_EXIT_CODE);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings shared by every command.
struct Context {
    global: GlobalArgs,
    work_dir: PathBuf,
    compiler: Compiler,
}

impl Context {
    fn new(global: GlobalArgs) -> Result<Self, String> {
        let work_dir = std::env::current_dir()
            .map_err(|err| format!("Failed to read current directory: {err}"))?;
        let compiler = Compiler::new(toolchain_options(&global), CancelToken::new());
        Ok(Self {
            global,
            work_dir,
            compiler,
        })
    }

    fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            config_data: self.global.config_data.clone(),
            walk_timeout: Duration::from_millis(self.global.walk_timeout_ms),
            cancel: self.compiler.cancel_token().clone(),
        }
    }

    /// No targets means the working directory; one directory is walked;
    /// otherwise every target must be a `.proto` file.
    fn snapshot(&self, targets: &[PathBuf]) -> Result<ProjectSnapshot, String> {
        let options = self.discover_options();
        let snapshot = match targets {
            [] => snapshot_for(&self.work_dir, &self.work_dir, &options),
            [dir] if dir.is_dir() => snapshot_for(&self.work_dir, dir, &options),
            files => snapshot_for_files(&self.work_dir, files, &options),
        }
        .map_err(|err| err.to_string())?;
        debug!(
            config = %snapshot.config.dir.display(),
            files = snapshot.file_count(),
            "built project snapshot"
        );
        Ok(snapshot)
    }

    fn config(&self, dir: &Path) -> Result<Config, String> {
        match &self.global.config_data {
            Some(data) => config_for_data(dir, data),
            None => config_for_dir(dir),
        }
        .map_err(|err| err.to_string())
    }
}

fn toolchain_options(global: &GlobalArgs) -> ToolchainOptions {
    ToolchainOptions {
        cache_path: global.cache_path.clone(),
        protoc_url: global.protoc_url.clone(),
        protoc_bin_path: global.protoc_bin_path.clone(),
        protoc_wkt_path: global.protoc_wkt_path.clone(),
        ..ToolchainOptions::default()
    }
}

fn run_build(ctx: &Context, args: BuildArgs, options: PlanOptions) -> Result<Vec<Failure>, String> {
    let snapshot = ctx.snapshot(&args.target.targets)?;
    if args.dry_run {
        let plans = ctx
            .compiler
            .plan(&snapshot, &options)
            .map_err(|err| err.to_string())?;
        for plan in &plans {
            println!("{}", plan.command_line());
        }
        return Ok(Vec::new());
    }
    let result = ctx
        .compiler
        .run(&snapshot, &options)
        .map_err(|err| err.to_string())?;
    Ok(result.failures)
}

fn run_descriptor_set(ctx: &Context, args: DescriptorSetArgs) -> Result<Vec<Failure>, String> {
    let snapshot = ctx.snapshot(&args.target.targets)?;
    let result = ctx
        .compiler
        .descriptor_sets(&snapshot, args.include_imports, args.include_source_info)
        .map_err(|err| err.to_string())?;
    if !result.is_success() {
        return Ok(result.failures);
    }

    let merged = merge_descriptor_sets(result.descriptor_sets);
    let output = absolutize(&args.output).map_err(|err| err.to_string())?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            format!("Failed to create output directory '{}': {err}", parent.display())
        })?;
    }
    fs::write(&output, merged.encode_to_vec())
        .map_err(|err| format!("Failed to write '{}': {err}", output.display()))?;
    debug!(path = %output.display(), files = merged.file.len(), "wrote descriptor set");
    Ok(Vec::new())
}

/// Concatenates sets, keeping the first copy of each file name.
fn merge_descriptor_sets(sets: Vec<FileDescriptorSet>) -> FileDescriptorSet {
    let mut seen = BTreeSet::new();
    let mut merged = FileDescriptorSet::default();
    for file in sets.into_iter().flat_map(|set| set.file) {
        if seen.insert(file.name().to_string()) {
            merged.file.push(file);
        }
    }
    merged
}

fn run_files(ctx: &Context, args: TargetArgs) -> Result<Vec<Failure>, String> {
    let snapshot = ctx.snapshot(&args.targets)?;
    for file in snapshot.files() {
        println!("{}", file.display_path);
    }
    Ok(Vec::new())
}

fn run_break_check(ctx: &Context, args: BreakCheckArgs) -> Result<Vec<Failure>, String> {
    let mut snapshot = ctx.snapshot(&args.target.targets)?;
    snapshot.config.breaking.include_beta |= args.policy.include_beta;
    snapshot.config.breaking.allow_beta_deps |= args.policy.allow_beta_deps;

    let from = match (&args.against, &args.against_descriptor_set) {
        (Some(dir), _) => {
            let against = snapshot_for(&ctx.work_dir, dir, &ctx.discover_options())
                .map_err(|err| err.to_string())?;
            match ctx
                .compiler
                .package_set(&against)
                .map_err(|err| err.to_string())?
            {
                Ok(set) => set,
                Err(failures) => return Ok(failures),
            }
        }
        (None, Some(file)) => {
            package_set_from_files(std::slice::from_ref(file)).map_err(|err| err.to_string())?
        }
        (None, None) => return Err("Specify --against or --against-descriptor-set".to_string()),
    };

    ctx.compiler
        .break_check(&from, &snapshot)
        .map_err(|err| err.to_string())
}

fn run_break_list(args: BreakPolicyArgs) -> Result<Vec<Failure>, String> {
    let checker = BreakingChecker::new(BreakingConfig {
        include_beta: args.include_beta,
        allow_beta_deps: args.allow_beta_deps,
    });
    let width = checker.rules().iter().map(|r| r.id.len()).max().unwrap_or(0);
    for rule in checker.rules() {
        println!("{:<width$}  {}", rule.id, rule.purpose);
    }
    Ok(Vec::new())
}

fn run_cache_update(ctx: &Context, args: TargetArgs) -> Result<Vec<Failure>, String> {
    let dir = match args.targets.as_slice() {
        [] => ctx.work_dir.clone(),
        [dir] => dir.clone(),
        _ => return Err("cache update takes at most one directory".to_string()),
    };
    let config = ctx.config(&dir)?;
    let cache = ToolchainCache::new(ToolchainOptions {
        protoc_version: config.compile.protoc_version.clone(),
        ..toolchain_options(&ctx.global)
    })
    .with_cancel(ctx.compiler.cancel_token().clone());
    let paths = cache.paths().map_err(|err| err.to_string())?;
    println!("{}", paths.protoc.display());
    Ok(Vec::new())
}

fn run_cache_delete(ctx: &Context) -> Result<Vec<Failure>, String> {
    ToolchainCache::new(toolchain_options(&ctx.global))
        .delete()
        .map_err(|err| err.to_string())?;
    Ok(Vec::new())
}

fn run_config_show(ctx: &Context, args: ConfigShowArgs) -> Result<Vec<Failure>, String> {
    let dir = args.dir.unwrap_or_else(|| ctx.work_dir.clone());
    let config = ctx.config(&dir)?;
    let yaml = serde_yaml::to_string(&config.to_external())
        .map_err(|err| format!("Failed to render config: {err}"))?;
    print!("{yaml}");
    Ok(Vec::new())
}
