//! Recipe manifest (`edotools.toml`) parsing and validation.

use crate::options::{BuildType, ConfigError, OptionValues, OptionalFeature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The recipe filename.
pub const RECIPE_FILE: &str = "edotools.toml";

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    #[error("invalid version pin '{version}' for dependency '{name}': {reason}")]
    InvalidDependencyVersion {
        name: String,
        version: String,
        reason: String,
    },

    #[error("feature '{0}' is declared by more than one optional dependency")]
    DuplicateFeature(OptionalFeature),

    #[error("invalid default options: {0}")]
    InvalidOptions(#[from] ConfigError),

    #[error("unsupported recipe schema {0}, expected 1, 2 or 3")]
    UnsupportedSchema(u32),
}

/// Recipe schema revision.
///
/// Three recipe shapes exist: the legacy generator API, the intermediate
/// API, and the current layout-based API. They differ in option spelling
/// and in where the build tool leaves binaries; [`Manifest::migrate`]
/// upgrades older recipes to the current shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SchemaVersion {
    Legacy,
    Mid,
    #[default]
    Current,
}

impl SchemaVersion {
    /// Directories the build tool may leave executables in, most specific first.
    #[must_use]
    pub fn binary_dirs(self, build_dir: &Path, build_type: BuildType) -> Vec<PathBuf> {
        match self {
            Self::Legacy | Self::Mid => vec![build_dir.join("bin"), build_dir.to_path_buf()],
            Self::Current => vec![
                build_dir.join(build_type.as_str()),
                build_dir.to_path_buf(),
            ],
        }
    }
}

impl TryFrom<u32> for SchemaVersion {
    type Error = ManifestError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Mid),
            3 => Ok(Self::Current),
            other => Err(ManifestError::UnsupportedSchema(other)),
        }
    }
}

impl From<SchemaVersion> for u32 {
    fn from(value: SchemaVersion) -> Self {
        match value {
            SchemaVersion::Legacy => 1,
            SchemaVersion::Mid => 2,
            SchemaVersion::Current => 3,
        }
    }
}

/// The complete recipe manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Recipe schema revision.
    #[serde(default)]
    pub schema: SchemaVersion,

    /// Package metadata (required).
    pub package: Package,

    /// Recipe-level option defaults.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,

    /// Dependencies gated by an optional feature.
    #[serde(default, rename = "optional-dependencies")]
    pub optional_dependencies: Vec<OptionalDependency>,

    /// Dependencies needed only to build and run the test suite.
    #[serde(default, rename = "test-dependencies")]
    pub test_dependencies: Vec<Requirement>,
}

/// Package metadata section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    /// Package name (required).
    pub name: String,

    /// Package version (required, semver).
    pub version: String,

    /// SPDX license identifier.
    #[serde(default)]
    pub license: Option<String>,

    /// Upstream URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Short description.
    #[serde(default)]
    pub description: Option<String>,

    /// Libraries consumers link against. Defaults to the package name.
    #[serde(default)]
    pub libs: Vec<String>,

    /// Prefix prepended to every exported define.
    #[serde(default, rename = "define-prefix")]
    pub define_prefix: Option<String>,
}

impl Package {
    /// Libraries consumers link against.
    #[must_use]
    pub fn libs(&self) -> Vec<String> {
        if self.libs.is_empty() {
            vec![self.name.clone()]
        } else {
            self.libs.clone()
        }
    }

    #[must_use]
    pub fn define_prefix(&self) -> &str {
        self.define_prefix.as_deref().unwrap_or_default()
    }
}

/// A third-party library pulled in only when its feature is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionalDependency {
    /// The feature gating this dependency.
    pub feature: OptionalFeature,

    /// Package name.
    pub name: String,

    /// Exact version pin.
    pub version: String,

    /// Whether the dependency's headers are visible to consumers.
    #[serde(default = "default_true", rename = "transitive-headers")]
    pub transitive_headers: bool,
}

/// An unconditional requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirement {
    pub name: String,
    pub version: String,
}

fn default_true() -> bool {
    true
}

impl Manifest {
    /// Load a manifest from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// The EdoTools recipe.
    #[must_use]
    pub fn edotools() -> Self {
        Self {
            schema: SchemaVersion::Current,
            package: Package {
                name: String::from("edotools"),
                version: String::from("1.0.0"),
                license: Some(String::from("MIT")),
                url: Some(String::from("https://github.com/edoren/EdoTools")),
                description: Some(String::from("Personal tools to ease development process")),
                libs: Vec::new(),
                define_prefix: Some(String::from("EDOTOOLS_")),
            },
            options: BTreeMap::new(),
            optional_dependencies: vec![
                OptionalDependency {
                    feature: OptionalFeature::Fmt,
                    name: String::from("fmt"),
                    version: String::from("8.1.1"),
                    transitive_headers: true,
                },
                OptionalDependency {
                    feature: OptionalFeature::NlohmannJson,
                    name: String::from("nlohmann_json"),
                    version: String::from("3.10.4"),
                    transitive_headers: true,
                },
            ],
            test_dependencies: vec![Requirement {
                name: String::from("catch2"),
                version: String::from("2.13.7"),
            }],
        }
    }

    /// Validate the manifest.
    fn validate(&self) -> Result<(), ManifestError> {
        validate_name(&self.package.name)?;

        semver::Version::parse(&self.package.version).map_err(|e| {
            ManifestError::InvalidVersion(self.package.version.clone(), e.to_string())
        })?;

        let mut features = BTreeSet::new();
        for dep in &self.optional_dependencies {
            if !features.insert(dep.feature) {
                return Err(ManifestError::DuplicateFeature(dep.feature));
            }
            validate_pin(&dep.name, &dep.version)?;
        }

        for req in &self.test_dependencies {
            validate_pin(&req.name, &req.version)?;
        }

        self.option_defaults()?;
        Ok(())
    }

    /// The recipe's option defaults as a configuration layer.
    pub fn option_defaults(&self) -> Result<OptionValues, ConfigError> {
        OptionValues::from_table(&self.options)
    }

    /// Upgrade an older recipe to the current schema.
    #[must_use]
    pub fn migrate(mut self) -> Self {
        if self.schema == SchemaVersion::Current {
            return self;
        }

        tracing::info!(
            from = u32::from(self.schema),
            to = u32::from(SchemaVersion::Current),
            "migrating recipe schema"
        );

        if let Some(value) = self.options.remove("fmt_json_support") {
            self.options
                .entry(OptionalFeature::Fmt.option_key().to_string())
                .or_insert(value);
        }
        self.schema = SchemaVersion::Current;
        self
    }

    /// Serialize the manifest to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Validate a package name.
fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot be empty",
        ));
    }

    if name.len() > 64 {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot exceed 64 characters",
        ));
    }

    // Must start with a letter
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name must start with a letter",
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(ManifestError::InvalidName(
                name.to_string(),
                "name can only contain letters, numbers, hyphens, and underscores",
            ));
        }
    }

    Ok(())
}

/// Dependency versions are exact pins, not ranges.
fn validate_pin(name: &str, version: &str) -> Result<(), ManifestError> {
    validate_name(name)?;
    semver::Version::parse(version).map_err(|e| ManifestError::InvalidDependencyVersion {
        name: name.to_string(),
        version: version.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

impl Default for Manifest {
    fn default() -> Self {
        Self::edotools()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_manifest() {
        let toml = r#"
[package]
name = "edotools"
version = "0.1.0"
"#;
        let manifest = Manifest::parse(toml).unwrap();
        assert_eq!(manifest.package.name, "edotools");
        assert_eq!(manifest.schema, SchemaVersion::Current);
        assert_eq!(manifest.package.libs(), vec!["edotools"]);
        assert_eq!(manifest.package.define_prefix(), "");
        assert!(manifest.optional_dependencies.is_empty());
    }

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
schema = 3

[package]
name = "edotools"
version = "1.2.3"
license = "MIT"
url = "https://github.com/edoren/EdoTools"
define-prefix = "EDOTOOLS_"

[options]
shared = true

[[optional-dependencies]]
feature = "fmt"
name = "fmt"
version = "8.1.1"

[[optional-dependencies]]
feature = "nlohmann-json"
name = "nlohmann_json"
version = "3.10.4"
transitive-headers = false

[[test-dependencies]]
name = "catch2"
version = "2.13.7"
"#;
        let manifest = Manifest::parse(toml).unwrap();
        assert_eq!(manifest.optional_dependencies.len(), 2);
        assert!(manifest.optional_dependencies[0].transitive_headers);
        assert!(!manifest.optional_dependencies[1].transitive_headers);
        assert_eq!(manifest.test_dependencies[0].name, "catch2");
        assert_eq!(manifest.option_defaults().unwrap().shared, Some(true));
    }

    #[test]
    fn invalid_name_starts_with_number() {
        let toml = r#"
[package]
name = "123pkg"
version = "0.1.0"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName(..)));
    }

    #[test]
    fn invalid_version() {
        let toml = r#"
[package]
name = "edotools"
version = "not-a-version"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidVersion(..)));
    }

    #[test]
    fn version_ranges_are_not_pins() {
        let toml = r#"
[package]
name = "edotools"
version = "0.1.0"

[[optional-dependencies]]
feature = "fmt"
name = "fmt"
version = "^8.1"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependencyVersion { .. }));
    }

    #[test]
    fn unknown_package_keys_are_rejected() {
        let toml = r#"
[package]
name = "edotools"
version = "0.1.0"
exports-sources = ["include/*"]
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn duplicate_feature() {
        let toml = r#"
[package]
name = "edotools"
version = "0.1.0"

[[optional-dependencies]]
feature = "fmt"
name = "fmt"
version = "8.1.1"

[[optional-dependencies]]
feature = "fmt"
name = "fmtlib"
version = "9.0.0"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::DuplicateFeature(OptionalFeature::Fmt)
        ));
    }

    #[test]
    fn bad_option_default() {
        let toml = r#"
[package]
name = "edotools"
version = "0.1.0"

[options]
header_only = true
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidOptions(_)));
    }

    #[test]
    fn unknown_schema() {
        let toml = r#"
schema = 7

[package]
name = "edotools"
version = "0.1.0"
"#;
        // Surfaces through serde as a parse error
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(..)));
    }

    #[test]
    fn migrate_legacy_recipe() {
        let toml = r#"
schema = 1

[package]
name = "edotools"
version = "0.1.0"

[options]
fmt_json_support = false
"#;
        let manifest = Manifest::parse(toml).unwrap().migrate();
        assert_eq!(manifest.schema, SchemaVersion::Current);
        assert!(!manifest.options.contains_key("fmt_json_support"));
        assert_eq!(manifest.option_defaults().unwrap().fmt_support, Some(false));
    }

    #[test]
    fn builtin_recipe_round_trips() {
        let text = Manifest::edotools().to_toml_string().unwrap();
        let parsed = Manifest::parse(&text).unwrap();
        assert_eq!(parsed.package.name, "edotools");
        assert_eq!(parsed.optional_dependencies.len(), 2);
        assert_eq!(parsed.optional_dependencies[0].feature, OptionalFeature::Fmt);
    }

    #[test]
    fn binary_dirs_follow_schema() {
        let build = Path::new("build");
        assert_eq!(
            SchemaVersion::Legacy.binary_dirs(build, BuildType::Release)[0],
            build.join("bin")
        );
        assert_eq!(
            SchemaVersion::Current.binary_dirs(build, BuildType::Debug)[0],
            build.join("Debug")
        );
    }
}
