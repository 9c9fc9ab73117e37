//! Consumer-side verification of a created package.
//!
//! A small consumer project is configured against the packaged artifacts,
//! built, and its test binary run when the target platform can execute on
//! this machine.
//!
//! The consumer learns how to use the package from configure variables
//! named after the package (`EDOTOOLS_INCLUDE_DIRS`, `EDOTOOLS_LIBRARY_DIRS`,
//! `EDOTOOLS_LIBRARIES`, `EDOTOOLS_DEFINITIONS`), each a CMake list.

use crate::artifacts::{self, BIN_DIR, INCLUDE_DIR, LIB_DIR};
use crate::descriptor::DependencySpec;
use crate::manifest::SchemaVersion;
use crate::options::Settings;
use crate::package_manifest::PackageManifest;
use crate::pipeline::{check_step, PipelineError};
use crate::toolchain::{
    can_run, BuildInvocation, BuildStep, BuildTool, DependencyResolver, ResolvedPackage,
    TestReport, TestRunner,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the consumer's test executable.
pub const TEST_BINARY: &str = "EdoToolsTest";

/// Result of a consumer verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed(TestReport),
    /// The consumer was built but its binary cannot run on this machine.
    Skipped { reason: String },
}

/// A consumer project used to verify a package.
pub struct TestPackage<'a> {
    consumer_dir: PathBuf,
    binary_name: String,
    schema: SchemaVersion,
    test_requires: Vec<DependencySpec>,
    resolver: &'a dyn DependencyResolver,
    tool: &'a dyn BuildTool,
    runner: &'a dyn TestRunner,
}

impl<'a> TestPackage<'a> {
    pub fn new(
        consumer_dir: impl Into<PathBuf>,
        resolver: &'a dyn DependencyResolver,
        tool: &'a dyn BuildTool,
        runner: &'a dyn TestRunner,
    ) -> Self {
        Self {
            consumer_dir: consumer_dir.into(),
            binary_name: TEST_BINARY.to_string(),
            schema: SchemaVersion::Current,
            test_requires: Vec::new(),
            resolver,
            tool,
            runner,
        }
    }

    /// Use a different test executable name.
    #[must_use]
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    /// Recipe schema deciding where the consumer's binaries end up.
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaVersion) -> Self {
        self.schema = schema;
        self
    }

    /// Extra dependencies the consumer needs, such as its test framework.
    #[must_use]
    pub fn with_test_requires(mut self, requires: Vec<DependencySpec>) -> Self {
        self.test_requires = requires;
        self
    }

    /// Build the consumer against the package in `package_dir` and run it.
    pub fn run(
        &self,
        package_dir: &Path,
        settings: &Settings,
        build_dir: &Path,
    ) -> Result<TestOutcome, PipelineError> {
        let tested = PackageManifest::read_from(package_dir)?;
        tracing::info!(package = %tested.reference(), consumer = %self.consumer_dir.display(), "testing package");

        let mut wanted = tested.requires().to_vec();
        wanted.extend(self.test_requires.iter().cloned());
        let resolved = self.resolver.resolve(&wanted)?;

        let mut prefix_paths = vec![package_dir.to_path_buf()];
        prefix_paths.extend(resolved.iter().map(|p| p.root.clone()));

        let invocation = BuildInvocation {
            source_dir: self.consumer_dir.clone(),
            build_dir: build_dir.to_path_buf(),
            build_type: settings.build_type,
            variables: consumer_variables(&tested, package_dir, &resolved),
            prefix_paths,
        };

        check_step(BuildStep::Configure, self.tool.configure(&invocation)?)?;
        check_step(BuildStep::Build, self.tool.build(&invocation)?)?;

        if !can_run(settings) {
            let reason = format!(
                "cannot run {} {} binaries on this machine",
                settings.os, settings.arch
            );
            tracing::warn!("{reason}, skipping test execution");
            return Ok(TestOutcome::Skipped { reason });
        }

        let binary = self.find_binary(build_dir, settings)?;
        if let Some(binary_dir) = binary.parent() {
            import_runtime_libraries(package_dir, &resolved, binary_dir)?;
        }
        let report = self.runner.run(&binary)?;
        if !report.passed {
            return Err(PipelineError::TestFailure {
                failed: report.failed_tests,
                log: report.output,
            });
        }

        tracing::info!(binary = %binary.display(), "consumer tests passed");
        Ok(TestOutcome::Passed(report))
    }

    fn find_binary(&self, build_dir: &Path, settings: &Settings) -> Result<PathBuf, PipelineError> {
        let file_name = format!("{}{}", self.binary_name, std::env::consts::EXE_SUFFIX);
        let searched = self.schema.binary_dirs(build_dir, settings.build_type);

        let found = searched
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file());

        found.ok_or_else(|| PipelineError::TestBinaryNotFound {
            name: file_name,
            searched,
        })
    }
}

/// Configure variables describing how to compile and link against the package.
fn consumer_variables(
    tested: &PackageManifest,
    package_dir: &Path,
    resolved: &[ResolvedPackage],
) -> BTreeMap<String, String> {
    let prefix = tested.name().to_ascii_uppercase().replace('-', "_");

    let mut include_dirs = vec![package_dir.join(INCLUDE_DIR)];
    include_dirs.extend(
        resolved
            .iter()
            .filter(|dep| dep.spec.transitive_headers)
            .map(|dep| dep.include_dir.clone()),
    );

    let mut library_dirs = vec![package_dir.join(LIB_DIR)];
    library_dirs.extend(resolved.iter().filter_map(|dep| dep.lib_dir.clone()));

    BTreeMap::from([
        (format!("{prefix}_INCLUDE_DIRS"), cmake_list(&include_dirs)),
        (format!("{prefix}_LIBRARY_DIRS"), cmake_list(&library_dirs)),
        (format!("{prefix}_LIBRARIES"), tested.libs().join(";")),
        (format!("{prefix}_DEFINITIONS"), tested.defines().join(";")),
    ])
}

fn cmake_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Stage DLLs and dylibs of the package and its dependencies next to the
/// test binary so it can load them.
fn import_runtime_libraries(
    package_dir: &Path,
    resolved: &[ResolvedPackage],
    binary_dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    let mut rules =
        artifacts::runtime_import_rules(&package_dir.join(BIN_DIR), &package_dir.join(LIB_DIR));
    for dep in resolved {
        let lib_dir = dep.lib_dir.clone().unwrap_or_else(|| dep.root.join(LIB_DIR));
        rules.extend(artifacts::runtime_import_rules(&dep.root.join(BIN_DIR), &lib_dir));
    }

    let imported = artifacts::apply_all(&rules, binary_dir)?;
    if !imported.is_empty() {
        tracing::debug!(count = imported.len(), dir = %binary_dir.display(), "imported runtime libraries");
    }
    Ok(imported)
}
