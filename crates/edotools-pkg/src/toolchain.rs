//! External collaborators: dependency lookup, the build tool and the test
//! runner.
//!
//! Each is a trait so the pipeline can be driven by the real tools
//! ([`LocalCache`], [`CMake`], [`ProcessTestRunner`]) or by test doubles.

use crate::descriptor::DependencySpec;
use crate::options::{BuildType, Settings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors raised while locating dependencies.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("dependency '{reference}' not found (looked in {})", .searched.display())]
    NotFound { reference: String, searched: PathBuf },

    #[error("dependency '{reference}' at {} has no include directory", .root.display())]
    MissingHeaders { reference: String, root: PathBuf },
}

/// Errors raised when an external tool cannot be run at all.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A dependency located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub spec: DependencySpec,
    /// Install prefix handed to the build tool.
    pub root: PathBuf,
    pub include_dir: PathBuf,
    /// `None` for header-only packages.
    pub lib_dir: Option<PathBuf>,
}

/// Locates pinned dependencies.
pub trait DependencyResolver {
    fn resolve(&self, deps: &[DependencySpec]) -> Result<Vec<ResolvedPackage>, ResolveError>;
}

/// Dependencies installed under `<root>/<name>/<version>/`.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where a dependency is expected to live.
    #[must_use]
    pub fn path_for(&self, spec: &DependencySpec) -> PathBuf {
        self.root.join(&spec.name).join(&spec.version)
    }
}

impl DependencyResolver for LocalCache {
    fn resolve(&self, deps: &[DependencySpec]) -> Result<Vec<ResolvedPackage>, ResolveError> {
        deps.iter()
            .map(|spec| {
                let root = self.path_for(spec);
                if !root.is_dir() {
                    return Err(ResolveError::NotFound {
                        reference: spec.reference(),
                        searched: root,
                    });
                }

                let include_dir = root.join("include");
                if !include_dir.is_dir() {
                    return Err(ResolveError::MissingHeaders {
                        reference: spec.reference(),
                        root,
                    });
                }

                let lib_dir = root.join("lib");
                tracing::debug!(dependency = %spec, root = %root.display(), "resolved dependency");
                Ok(ResolvedPackage {
                    spec: spec.clone(),
                    lib_dir: lib_dir.is_dir().then_some(lib_dir),
                    include_dir,
                    root,
                })
            })
            .collect()
    }
}

/// One configure/build/test run of the build tool.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub build_type: BuildType,
    pub variables: BTreeMap<String, String>,
    /// Install prefixes of resolved dependencies.
    pub prefix_paths: Vec<PathBuf>,
}

/// Which phase of the build tool ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Configure,
    Build,
    Test,
}

impl std::fmt::Display for BuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configure => f.write_str("configure"),
            Self::Build => f.write_str("build"),
            Self::Test => f.write_str("test"),
        }
    }
}

/// Exit status and combined output of a tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub log: String,
}

impl ToolOutput {
    #[must_use]
    pub fn succeeded(log: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            log: log.into(),
        }
    }

    #[must_use]
    pub fn failed(code: i32, log: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            log: log.into(),
        }
    }
}

/// Configures, builds and tests a source tree.
pub trait BuildTool {
    fn configure(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError>;
    fn build(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError>;
    fn test(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError>;
}

/// CMake and CTest found on `PATH` (or at explicit locations).
#[derive(Debug, Clone)]
pub struct CMake {
    cmake: PathBuf,
    ctest: PathBuf,
    generator: Option<String>,
}

impl Default for CMake {
    fn default() -> Self {
        Self {
            cmake: PathBuf::from("cmake"),
            ctest: PathBuf::from("ctest"),
            generator: None,
        }
    }
}

impl CMake {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific CMake generator.
    #[must_use]
    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = Some(generator.into());
        self
    }

    /// Use specific `cmake` and `ctest` executables.
    #[must_use]
    pub fn with_programs(mut self, cmake: impl Into<PathBuf>, ctest: impl Into<PathBuf>) -> Self {
        self.cmake = cmake.into();
        self.ctest = ctest.into();
        self
    }

    /// Arguments for the configure step.
    #[must_use]
    pub fn configure_args(&self, invocation: &BuildInvocation) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            invocation.source_dir.display().to_string(),
            "-B".to_string(),
            invocation.build_dir.display().to_string(),
        ];

        if let Some(generator) = &self.generator {
            args.push("-G".to_string());
            args.push(generator.clone());
        }

        args.push(format!("-DCMAKE_BUILD_TYPE={}", invocation.build_type));
        for (key, value) in &invocation.variables {
            args.push(format!("-D{key}={value}"));
        }

        if !invocation.prefix_paths.is_empty() {
            let joined = invocation
                .prefix_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            args.push(format!("-DCMAKE_PREFIX_PATH={joined}"));
        }

        args
    }

    /// Arguments for the build step.
    #[must_use]
    pub fn build_args(&self, invocation: &BuildInvocation) -> Vec<String> {
        vec![
            "--build".to_string(),
            invocation.build_dir.display().to_string(),
            "--config".to_string(),
            invocation.build_type.to_string(),
        ]
    }

    /// Arguments for CTest, run from inside the build directory.
    #[must_use]
    pub fn test_args(&self, invocation: &BuildInvocation) -> Vec<String> {
        vec![
            "--output-on-failure".to_string(),
            "-C".to_string(),
            invocation.build_type.to_string(),
        ]
    }
}

impl BuildTool for CMake {
    fn configure(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError> {
        std::fs::create_dir_all(&invocation.build_dir).map_err(|source| ToolError::Io {
            path: invocation.build_dir.clone(),
            source,
        })?;
        run_tool(&self.cmake, &self.configure_args(invocation), None)
    }

    fn build(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError> {
        run_tool(&self.cmake, &self.build_args(invocation), None)
    }

    fn test(&self, invocation: &BuildInvocation) -> Result<ToolOutput, ToolError> {
        run_tool(
            &self.ctest,
            &self.test_args(invocation),
            Some(&invocation.build_dir),
        )
    }
}

/// Run a program to completion, capturing stdout and stderr.
fn run_tool(program: &Path, args: &[String], cwd: Option<&Path>) -> Result<ToolOutput, ToolError> {
    tracing::debug!(program = %program.display(), ?args, "running");

    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|source| ToolError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
    log.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        log,
    })
}

/// Outcome of running a test binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    pub output: String,
    pub failed_tests: Vec<String>,
}

/// Executes a built test binary.
pub trait TestRunner {
    fn run(&self, binary: &Path) -> Result<TestReport, ToolError>;
}

/// Runs the test binary as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTestRunner;

impl TestRunner for ProcessTestRunner {
    fn run(&self, binary: &Path) -> Result<TestReport, ToolError> {
        let output = run_tool(binary, &[], None)?;
        let failed_tests = if output.success {
            Vec::new()
        } else {
            let name = binary
                .file_stem()
                .map_or_else(|| binary.display().to_string(), |s| s.to_string_lossy().into_owned());
            vec![name]
        };

        Ok(TestReport {
            passed: output.success,
            output: output.log,
            failed_tests,
        })
    }
}

/// Names of the failing tests from CTest's summary.
///
/// ```text
/// The following tests FAILED:
///           1 - UnitTests (Failed)
///           3 - JSONTests (SEGFAULT)
/// ```
#[must_use]
pub fn parse_ctest_failures(log: &str) -> Vec<String> {
    let mut failures = Vec::new();
    let mut in_summary = false;

    for line in log.lines() {
        if line.contains("The following tests FAILED:") {
            in_summary = true;
            continue;
        }
        if !in_summary {
            continue;
        }

        let Some((index, rest)) = line.trim().split_once(" - ") else {
            break;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            break;
        }

        let name = rest.rfind(" (").map_or(rest, |pos| &rest[..pos]);
        failures.push(name.trim().to_string());
    }

    failures
}

/// Whether binaries built for `settings` can execute on this machine.
#[must_use]
pub fn can_run(settings: &Settings) -> bool {
    let host = Settings::host();
    settings.os == host.os && settings.arch == host.arch
}
