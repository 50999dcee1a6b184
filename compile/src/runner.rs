//! Concurrent execution of planned `protoc` invocations.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use prost_types::FileDescriptorSet;
use protoforge_core::{Failure, decode_descriptor_set, sort_failures};
use rayon::prelude::*;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::error::{CompileError, Result};
use crate::parser::DiagnosticParser;
use crate::planner::InvocationPlan;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared state for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub parser: DiagnosticParser,
    pub cancel: CancelToken,
}

/// Outcome of a run that completed.
///
/// When `failures` is non-empty `descriptor_sets` is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileResult {
    pub failures: Vec<Failure>,
    /// One per descriptor-set plan, in plan order.
    pub descriptor_sets: Vec<FileDescriptorSet>,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every plan on a pool of `min(plans, cpus)` workers.
///
/// # Errors
///
/// [`CompileError::Cancelled`] wins over any other error. Otherwise the
/// first error in plan order is returned.
pub fn run_invocations(plans: &[InvocationPlan], ctx: &RunContext) -> Result<CompileResult> {
    if plans.is_empty() {
        return Ok(CompileResult::default());
    }
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(plans.len().min(cpus))
        .build()
        .map_err(|e| CompileError::ThreadPool(e.to_string()))?;
    debug!(plans = plans.len(), threads = pool.current_num_threads(), "running protoc");

    let outcomes: Vec<Result<Vec<Failure>>> =
        pool.install(|| plans.par_iter().map(|plan| run_one(plan, ctx)).collect());

    if outcomes.iter().any(|o| matches!(o, Err(CompileError::Cancelled))) {
        return Err(CompileError::Cancelled);
    }
    let mut failures = Vec::new();
    for outcome in outcomes {
        failures.extend(outcome?);
    }
    if !failures.is_empty() {
        sort_failures(&mut failures);
        failures.dedup();
        return Ok(CompileResult {
            failures,
            descriptor_sets: Vec::new(),
        });
    }

    let mut descriptor_sets = Vec::new();
    for plan in plans {
        if let Some(path) = plan.descriptor_path() {
            let bytes = std::fs::read(path)?;
            descriptor_sets.push(decode_descriptor_set(&bytes)?);
        }
    }
    Ok(CompileResult {
        failures: Vec::new(),
        descriptor_sets,
    })
}

fn run_one(plan: &InvocationPlan, ctx: &RunContext) -> Result<Vec<Failure>> {
    if ctx.cancel.is_cancelled() {
        return Err(CompileError::Cancelled);
    }
    debug!(command = %plan.command_line(), "spawning protoc");
    let mut child = Command::new(&plan.program)
        .args(plan.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CompileError::Spawn {
            program: plan.program.clone(),
            source,
        })?;

    let stderr_thread = child.stderr.take().map(|pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let mut pipe = pipe;
            let result = pipe.read_to_end(&mut buf);
            (buf, result)
        })
    });

    let status = wait_or_cancel(&mut child, &ctx.cancel)?;
    let stderr_buf = stderr_thread
        .and_then(|t| t.join().ok())
        .map(|(buf, _)| buf)
        .unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr_buf);

    let failures = ctx.parser.parse_stderr(&stderr);
    if !status.success() && failures.is_empty() {
        return Err(CompileError::ProtocFailed {
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    debug!(dir = %plan.dir.display(), failures = failures.len(), "protoc finished");
    Ok(failures)
}

fn wait_or_cancel(child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus> {
    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CompileError::Cancelled);
        }
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            return Ok(status);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::ToolchainPaths;
    use crate::discover::{ProjectSnapshot, ProtoFile};
    use crate::planner::{PlanOptions, plan_invocations};
    use protoforge_config::{clean_path, config_for_data};
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn fake_protoc(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("protoc");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn setup(body: &str) -> (tempfile::TempDir, Vec<InvocationPlan>, RunContext) {
        let tmp = tempfile::tempdir().unwrap();
        let root = clean_path(tmp.path());
        let protoc = fake_protoc(&root, body);
        let file = root.join("x.proto");
        std::fs::write(&file, "syntax = \"proto3\";\n").unwrap();
        let mut dir_to_files = BTreeMap::new();
        dir_to_files.insert(root.clone(), vec![ProtoFile::new(&root, file)]);
        let snapshot = ProjectSnapshot {
            work_dir: root.clone(),
            root_dir: root.clone(),
            dir_to_files,
            config: config_for_data(&root, "{}").unwrap(),
        };
        let toolchain = ToolchainPaths {
            protoc,
            wkt_include: root.join("include"),
        };
        let plans = plan_invocations(&snapshot, &toolchain, &PlanOptions::default()).unwrap();
        let ctx = RunContext {
            parser: DiagnosticParser::for_snapshot(&snapshot),
            cancel: CancelToken::new(),
        };
        (tmp, plans, ctx)
    }

    #[test]
    fn test_clean_exit_yields_no_failures() {
        let (_tmp, plans, ctx) = setup("exit 0");
        let result = run_invocations(&plans, &ctx).unwrap();
        assert!(result.is_success());
        assert!(result.descriptor_sets.is_empty());
    }

    #[test]
    fn test_parsed_failures_are_authoritative() {
        let (_tmp, plans, ctx) = setup("echo 'x.proto:3:1: Expected \";\".' >&2\nexit 1");
        let result = run_invocations(&plans, &ctx).unwrap();
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].filename, "x.proto");
        assert_eq!(result.failures[0].message, "Expected \";\".");
    }

    #[test]
    fn test_silent_nonzero_exit_is_an_error() {
        let (_tmp, plans, ctx) = setup("exit 3");
        let err = run_invocations(&plans, &ctx).unwrap_err();
        assert!(matches!(err, CompileError::ProtocFailed { .. }));
    }

    #[test]
    fn test_cancellation_kills_child() {
        let (_tmp, plans, ctx) = setup("exec sleep 30");
        let cancel = ctx.cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_invocations(&plans, &ctx).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, CompileError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
