//! Package description and build orchestration for the EdoTools C++ library.
//!
//! This crate provides:
//! - Parsing and validation of the `edotools.toml` recipe
//! - Validation of build options against the target settings
//! - Pure derivations of dependencies, build variables, exported defines
//!   and artifact copy rules
//! - A create pipeline driving an external build tool, and consumer-side
//!   verification of the produced package

mod artifacts;
mod descriptor;
mod manifest;
mod options;
mod package_manifest;
mod pipeline;
mod test_package;
mod toolchain;

pub use artifacts::{
    apply_all, copy_patterns, copy_rules, runtime_import_rules, ArtifactError, ArtifactKind,
    CopyPattern, CopyRule, BIN_DIR, INCLUDE_DIR, LIB_DIR,
};
pub use descriptor::{DependencySpec, PackageDescriptor};
pub use manifest::{
    Manifest, ManifestError, OptionalDependency, Package, Requirement, SchemaVersion, RECIPE_FILE,
};
pub use options::{
    BuildMode, BuildOptions, BuildType, ConfigError, OptionValues, OptionalFeature, Os, Profile,
    Settings,
};
pub use package_manifest::{
    PackageManifest, PackageManifestError, PACKAGE_FORMAT_VERSION, PACKAGE_MANIFEST_FILE,
};
pub use pipeline::{Pipeline, PipelineDirs, PipelineError};
pub use test_package::{TestOutcome, TestPackage, TEST_BINARY};
pub use toolchain::{
    can_run, parse_ctest_failures, BuildInvocation, BuildStep, BuildTool, CMake,
    DependencyResolver, LocalCache, ProcessTestRunner, ResolveError, ResolvedPackage, TestReport,
    TestRunner, ToolError, ToolOutput,
};
