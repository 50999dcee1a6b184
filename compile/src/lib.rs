//! Discovery, toolchain management and compilation for protoforge.
//!
//! The pipeline is:
//!
//! 1. [`discover`] builds a [`ProjectSnapshot`]: the governing config and
//!    the `.proto` files it covers.
//! 2. [`cache`] resolves a `protoc` binary and its well-known types,
//!    downloading and caching a release when needed.
//! 3. [`planner`] turns the snapshot into one invocation per directory (or
//!    per generator per directory).
//! 4. [`runner`] runs the invocations concurrently and [`parser`] turns
//!    their stderr into [`Failure`]s.
//!
//! [`Compiler`] wires the steps together.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use protoforge_compile::{CancelToken, Compiler, DiscoverOptions, ToolchainOptions, snapshot_for};
//!
//! let work_dir = std::env::current_dir().unwrap();
//! let snapshot = snapshot_for(&work_dir, Path::new("."), &DiscoverOptions::default()).unwrap();
//! let compiler = Compiler::new(ToolchainOptions::default(), CancelToken::new());
//! let failures = compiler.compile(&snapshot).unwrap();
//! for failure in &failures {
//!     println!("{failure}");
//! }
//! ```

pub mod cache;
mod cancel;
pub mod discover;
mod error;
pub mod parser;
pub mod planner;
pub mod runner;

use prost_types::FileDescriptorSet;
use protoforge_core::{BreakingChecker, Failure, PackageSet};
use tracing::debug;

pub use cache::{Installation, ToolchainCache, ToolchainOptions, ToolchainPaths};
pub use cancel::{CancelToken, install_signal_handlers};
pub use discover::{DiscoverOptions, ProjectSnapshot, ProtoFile, snapshot_for, snapshot_for_files};
pub use error::{CacheError, CompileError, DiscoverError, Result};
pub use parser::{DiagnosticParser, LineOutcome};
pub use planner::{InvocationPlan, PlanOptions, plan_invocations, prepare_output_dirs};
pub use runner::{CompileResult, RunContext, run_invocations};

/// Runs `protoc` over project snapshots.
#[derive(Debug, Clone)]
pub struct Compiler {
    toolchain: ToolchainOptions,
    cancel: CancelToken,
}

impl Compiler {
    /// `toolchain.protoc_version` is replaced per snapshot by the version
    /// its config asks for.
    pub fn new(toolchain: ToolchainOptions, cancel: CancelToken) -> Self {
        Self { toolchain, cancel }
    }

    /// The toolchain cache for the compiler version `snapshot` asks for.
    pub fn toolchain_for(&self, snapshot: &ProjectSnapshot) -> ToolchainCache {
        ToolchainCache::new(ToolchainOptions {
            protoc_version: snapshot.config.compile.protoc_version.clone(),
            ..self.toolchain.clone()
        })
        .with_cancel(self.cancel.clone())
    }

    /// The token shared by every cache and run this compiler starts.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Plans the invocations for `snapshot` without running them.
    pub fn plan(&self, snapshot: &ProjectSnapshot, options: &PlanOptions) -> Result<Vec<InvocationPlan>> {
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let paths = self.toolchain_for(snapshot).paths()?;
        plan_invocations(snapshot, &paths, options)
    }

    /// Plans and runs, creating output directories first.
    pub fn run(&self, snapshot: &ProjectSnapshot, options: &PlanOptions) -> Result<CompileResult> {
        let plans = self.plan(snapshot, options)?;
        prepare_output_dirs(&plans)?;
        let ctx = RunContext {
            parser: DiagnosticParser::for_snapshot(snapshot),
            cancel: self.cancel.clone(),
        };
        run_invocations(&plans, &ctx)
    }

    /// Compiles for errors only.
    pub fn compile(&self, snapshot: &ProjectSnapshot) -> Result<Vec<Failure>> {
        Ok(self.run(snapshot, &PlanOptions::default())?.failures)
    }

    /// Runs every configured generator.
    pub fn generate(&self, snapshot: &ProjectSnapshot) -> Result<Vec<Failure>> {
        let options = PlanOptions {
            generate: true,
            ..PlanOptions::default()
        };
        Ok(self.run(snapshot, &options)?.failures)
    }

    /// Produces descriptor sets with exactly the requested include flags.
    pub fn descriptor_sets(
        &self,
        snapshot: &ProjectSnapshot,
        include_imports: bool,
        include_source_info: bool,
    ) -> Result<CompileResult> {
        let options = PlanOptions {
            descriptor_set: true,
            include_imports,
            include_source_info,
            full_control: true,
            generate: false,
        };
        self.run(snapshot, &options)
    }

    /// Builds the package model for `snapshot`.
    ///
    /// Returns the compiler's failures instead when the snapshot does not
    /// compile.
    pub fn package_set(&self, snapshot: &ProjectSnapshot) -> Result<std::result::Result<PackageSet, Vec<Failure>>> {
        let result = self.descriptor_sets(snapshot, true, false)?;
        if !result.is_success() {
            return Ok(Err(result.failures));
        }
        Ok(Ok(PackageSet::from_descriptor_sets(&result.descriptor_sets)?))
    }

    /// Compares `from` against `snapshot` and reports breaking changes.
    pub fn break_check(
        &self,
        from: &PackageSet,
        snapshot: &ProjectSnapshot,
    ) -> Result<Vec<Failure>> {
        let to = match self.package_set(snapshot)? {
            Ok(to) => to,
            Err(failures) => return Ok(failures),
        };
        let checker = BreakingChecker::new(snapshot.config.breaking);
        let failures = checker.check(from, &to);
        debug!(failures = failures.len(), packages = to.len(), "breaking check finished");
        Ok(failures)
    }
}

/// Decodes raw descriptor-set files and builds one package model from them.
pub fn package_set_from_files(paths: &[std::path::PathBuf]) -> Result<PackageSet> {
    let mut sets: Vec<FileDescriptorSet> = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(path)?;
        sets.push(protoforge_core::decode_descriptor_set(&bytes)?);
    }
    Ok(PackageSet::from_descriptor_sets(&sets)?)
}
