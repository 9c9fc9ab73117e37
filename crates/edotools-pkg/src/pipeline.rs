//! Create a package: resolve, configure, build, test, collect.
//!
//! Every failure is terminal for the invocation. Tests run after the build
//! and before anything is written to the package directory, so a failing
//! test suite never leaves a partial package behind.

use crate::artifacts::{self, ArtifactError};
use crate::descriptor::{DependencySpec, PackageDescriptor};
use crate::options::{BuildMode, BuildOptions, ConfigError, OptionValues, Settings};
use crate::package_manifest::{PackageManifest, PackageManifestError};
use crate::toolchain::{
    parse_ctest_failures, BuildInvocation, BuildStep, BuildTool, DependencyResolver,
    ResolveError, ToolError, ToolOutput,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a package build.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolveError),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("{step} step failed with {}:\n{log}", describe_code(.code))]
    Build {
        step: BuildStep,
        code: Option<i32>,
        log: String,
    },

    #[error("tests failed: {}\n{log}", format_failed(.failed))]
    TestFailure { failed: Vec<String>, log: String },

    #[error("test binary '{name}' not found in {}", format_paths(.searched))]
    TestBinaryNotFound { name: String, searched: Vec<PathBuf> },

    #[error("packaging error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("package manifest error: {0}")]
    PackageManifest(#[from] PackageManifestError),

    #[error("IO error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}"))
}

fn format_failed(failed: &[String]) -> String {
    if failed.is_empty() {
        "(no test names reported)".to_string()
    } else {
        failed.join(", ")
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turn an unsuccessful tool run into a build error.
pub(crate) fn check_step(step: BuildStep, output: ToolOutput) -> Result<ToolOutput, PipelineError> {
    if output.success {
        tracing::debug!(%step, "step succeeded");
        Ok(output)
    } else {
        Err(PipelineError::Build {
            step,
            code: output.code,
            log: output.log,
        })
    }
}

/// Where a package build reads and writes.
#[derive(Debug, Clone)]
pub struct PipelineDirs {
    pub build_dir: PathBuf,
    pub package_dir: PathBuf,
}

impl PipelineDirs {
    /// `<root>/build` and `<root>/package`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            build_dir: root.join("build"),
            package_dir: root.join("package"),
        }
    }
}

/// Drives a descriptor through the external build tool.
pub struct Pipeline<'a> {
    descriptor: &'a PackageDescriptor,
    mode: BuildMode,
    resolver: &'a dyn DependencyResolver,
    tool: &'a dyn BuildTool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        descriptor: &'a PackageDescriptor,
        mode: BuildMode,
        resolver: &'a dyn DependencyResolver,
        tool: &'a dyn BuildTool,
    ) -> Self {
        Self {
            descriptor,
            mode,
            resolver,
            tool,
        }
    }

    /// Build and package one configuration.
    pub fn run(
        &self,
        values: &OptionValues,
        settings: &Settings,
        dirs: &PipelineDirs,
    ) -> Result<PackageManifest, PipelineError> {
        let options = BuildOptions::resolve(values, settings)?;
        let package = &self.descriptor.manifest().package;
        tracing::info!(
            package = %package.name,
            version = %package.version,
            mode = %self.mode,
            os = %settings.os,
            build_type = %settings.build_type,
            "creating package"
        );

        let mut wanted: Vec<DependencySpec> = self
            .descriptor
            .resolve_dependencies(&options)
            .into_iter()
            .collect();
        wanted.extend(self.descriptor.build_requirements(self.mode));
        let resolved = self.resolver.resolve(&wanted)?;

        let invocation = BuildInvocation {
            source_dir: self.descriptor.source_dir().to_path_buf(),
            build_dir: dirs.build_dir.clone(),
            build_type: settings.build_type,
            variables: self.descriptor.configure_variables(&options, self.mode),
            prefix_paths: resolved.iter().map(|p| p.root.clone()).collect(),
        };

        check_step(BuildStep::Configure, self.tool.configure(&invocation)?)?;
        check_step(BuildStep::Build, self.tool.build(&invocation)?)?;

        if self.mode.runs_tests() {
            let output = self.tool.test(&invocation)?;
            if !output.success {
                let failed = parse_ctest_failures(&output.log);
                tracing::error!(failed = failed.len(), "test suite failed");
                return Err(PipelineError::TestFailure {
                    failed,
                    log: output.log,
                });
            }
            tracing::info!("test suite passed");
        }

        self.package(&options, settings, dirs)
    }

    /// Collect artifacts into a fresh package directory.
    fn package(
        &self,
        options: &BuildOptions,
        settings: &Settings,
        dirs: &PipelineDirs,
    ) -> Result<PackageManifest, PipelineError> {
        if dirs.package_dir.exists() {
            std::fs::remove_dir_all(&dirs.package_dir).map_err(|source| PipelineError::Io {
                path: dirs.package_dir.clone(),
                source,
            })?;
        }

        let rules = self
            .descriptor
            .collect_artifacts(&dirs.build_dir, options, settings);
        let files = artifacts::apply_all(&rules, &dirs.package_dir)?;
        if files.is_empty() {
            tracing::warn!("no artifacts matched the copy rules");
        }

        let manifest = self
            .descriptor
            .package_manifest(options, settings)
            .with_files(files);
        let path = manifest.write_to(&dirs.package_dir)?;
        tracing::info!(
            files = manifest.files().len(),
            manifest = %path.display(),
            "package created"
        );
        Ok(manifest)
    }
}
