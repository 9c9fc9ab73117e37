//! The package descriptor: pure derivations from a recipe and a set of
//! validated build options.

use crate::artifacts::{self, CopyRule};
use crate::manifest::{Manifest, ManifestError, RECIPE_FILE};
use crate::options::{BuildMode, BuildOptions, Settings};
use crate::package_manifest::PackageManifest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A pinned dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub version: String,
    /// Whether the dependency's headers are visible to consumers.
    pub transitive_headers: bool,
}

impl DependencySpec {
    /// The `name/version` reference.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl std::fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// A recipe bound to its source tree.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    manifest: Manifest,
    source_dir: PathBuf,
}

impl PackageDescriptor {
    /// Create a descriptor, upgrading the recipe to the current schema.
    pub fn new(manifest: Manifest, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.migrate(),
            source_dir: source_dir.into(),
        }
    }

    /// Load the recipe file from a source directory.
    pub fn load(source_dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let source_dir = source_dir.as_ref();
        let manifest = Manifest::from_path(source_dir.join(RECIPE_FILE))?;
        Ok(Self::new(manifest, source_dir))
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Dependencies required by the enabled features.
    ///
    /// Empty when every optional feature is disabled.
    #[must_use]
    pub fn resolve_dependencies(&self, options: &BuildOptions) -> BTreeSet<DependencySpec> {
        self.manifest
            .optional_dependencies
            .iter()
            .filter(|dep| options.is_enabled(dep.feature))
            .map(|dep| DependencySpec {
                name: dep.name.clone(),
                version: dep.version.clone(),
                transitive_headers: dep.transitive_headers,
            })
            .collect()
    }

    /// Tools needed only to build the package itself, never visible to consumers.
    #[must_use]
    pub fn build_requirements(&self, mode: BuildMode) -> Vec<DependencySpec> {
        if !mode.runs_tests() {
            return Vec::new();
        }

        self.manifest
            .test_dependencies
            .iter()
            .map(|req| DependencySpec {
                name: req.name.clone(),
                version: req.version.clone(),
                transitive_headers: false,
            })
            .collect()
    }

    /// One `ON`/`OFF` variable per optional feature.
    #[must_use]
    pub fn compute_build_variables(&self, options: &BuildOptions) -> BTreeMap<String, String> {
        options
            .as_feature_flags()
            .map(|(feature, enabled)| (feature.marker().to_string(), on_off(enabled).to_string()))
            .collect()
    }

    /// Every variable handed to the build tool's configure step.
    #[must_use]
    pub fn configure_variables(
        &self,
        options: &BuildOptions,
        mode: BuildMode,
    ) -> BTreeMap<String, String> {
        let mut variables = self.compute_build_variables(options);
        variables.insert(
            "BUILD_SHARED_LIBS".to_string(),
            on_off(options.shared()).to_string(),
        );
        if let Some(pic) = options.position_independent_code() {
            variables.insert(
                "CMAKE_POSITION_INDEPENDENT_CODE".to_string(),
                on_off(pic).to_string(),
            );
        }
        if mode.runs_tests() {
            variables.insert("BUILD_TESTS".to_string(), "ON".to_string());
        }
        variables
    }

    /// Preprocessor defines consumers must compile with.
    ///
    /// The static-linkage marker comes first, then one marker per enabled
    /// feature in declaration order.
    #[must_use]
    pub fn compute_exported_defines(&self, options: &BuildOptions) -> Vec<String> {
        let prefix = self.manifest.package.define_prefix();
        let mut defines = Vec::new();

        if !options.shared() {
            defines.push(format!("{prefix}STATIC"));
        }
        defines.extend(
            options
                .enabled_features()
                .map(|feature| format!("{prefix}{}", feature.marker())),
        );
        defines
    }

    /// Copy rules gathering headers and binaries into the package.
    #[must_use]
    pub fn collect_artifacts(
        &self,
        build_output_dir: &Path,
        options: &BuildOptions,
        settings: &Settings,
    ) -> Vec<CopyRule> {
        artifacts::copy_rules(&self.source_dir, build_output_dir, options, settings)
    }

    /// The package manifest for a configuration, before any files are collected.
    #[must_use]
    pub fn package_manifest(&self, options: &BuildOptions, settings: &Settings) -> PackageManifest {
        let package = &self.manifest.package;
        PackageManifest::new(
            package.name.clone(),
            package.version.clone(),
            settings.clone(),
            options.as_pairs(),
            self.resolve_dependencies(options).into_iter().collect(),
            self.compute_exported_defines(options),
            self.compute_build_variables(options),
            package.libs(),
            artifacts::copy_patterns(options, settings),
        )
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BuildType, OptionValues, OptionalFeature, Os};

    fn linux() -> Settings {
        Settings {
            os: Os::Linux,
            arch: "x86_64".to_string(),
            build_type: BuildType::Release,
            compiler: None,
        }
    }

    fn options(shared: bool, fmt: bool, json: bool) -> BuildOptions {
        let values = OptionValues {
            shared: Some(shared),
            fpic: None,
            fmt_support: Some(fmt),
            nlohmann_json_support: Some(json),
        };
        BuildOptions::resolve(&values, &linux()).unwrap()
    }

    fn all_options() -> Vec<BuildOptions> {
        let mut all = Vec::new();
        for shared in [false, true] {
            for fmt in [false, true] {
                for json in [false, true] {
                    all.push(options(shared, fmt, json));
                }
            }
        }
        all
    }

    fn descriptor() -> PackageDescriptor {
        PackageDescriptor::new(Manifest::edotools(), "/src/edotools")
    }

    /// A descriptor whose defines carry no prefix.
    fn bare_descriptor() -> PackageDescriptor {
        let mut manifest = Manifest::edotools();
        manifest.package.define_prefix = None;
        PackageDescriptor::new(manifest, "/src/edotools")
    }

    fn names(deps: &BTreeSet<DependencySpec>) -> Vec<String> {
        deps.iter().map(DependencySpec::reference).collect()
    }

    #[test]
    fn static_fmt_only() {
        let opts = options(false, true, false);
        assert_eq!(
            bare_descriptor().compute_exported_defines(&opts),
            vec!["STATIC", "FMT_SUPPORT"]
        );
        assert_eq!(names(&descriptor().resolve_dependencies(&opts)), vec!["fmt/8.1.1"]);
    }

    #[test]
    fn shared_without_features() {
        let opts = options(true, false, false);
        assert!(descriptor().compute_exported_defines(&opts).is_empty());
        assert!(descriptor().resolve_dependencies(&opts).is_empty());
    }

    #[test]
    fn static_with_both_features() {
        let opts = options(false, true, true);
        assert_eq!(
            names(&descriptor().resolve_dependencies(&opts)),
            vec!["fmt/8.1.1", "nlohmann_json/3.10.4"]
        );
        assert_eq!(
            descriptor().compute_exported_defines(&opts),
            vec![
                "EDOTOOLS_STATIC",
                "EDOTOOLS_FMT_SUPPORT",
                "EDOTOOLS_NLOHMANN_JSON_SUPPORT"
            ]
        );
    }

    #[test]
    fn shared_never_exports_static_marker() {
        let descriptor = descriptor();
        for opts in all_options().iter().filter(|o| o.shared()) {
            let defines = descriptor.compute_exported_defines(opts);
            assert!(!defines.iter().any(|d| d.ends_with("STATIC")));
        }
    }

    #[test]
    fn fmt_alone_contributes_one_define_and_one_dependency() {
        let descriptor = bare_descriptor();
        for json in [false, true] {
            let with_fmt = options(false, true, json);
            let without_fmt = options(false, false, json);

            let added: Vec<_> = descriptor
                .compute_exported_defines(&with_fmt)
                .into_iter()
                .filter(|d| !descriptor.compute_exported_defines(&without_fmt).contains(d))
                .collect();
            assert_eq!(added, vec!["FMT_SUPPORT"]);

            let deps = descriptor.resolve_dependencies(&with_fmt);
            let base = descriptor.resolve_dependencies(&without_fmt);
            let new: Vec<_> = deps.difference(&base).map(|d| d.name.as_str()).collect();
            assert_eq!(new, vec!["fmt"]);
        }
    }

    #[test]
    fn build_variables_are_deterministic() {
        let descriptor = descriptor();
        for opts in all_options() {
            let first = descriptor.compute_build_variables(&opts);
            let second = descriptor.compute_build_variables(&opts);
            assert_eq!(first, second);
            assert_eq!(first.len(), OptionalFeature::ALL.len());
        }
    }

    #[test]
    fn build_variables_are_on_off() {
        let vars = descriptor().compute_build_variables(&options(false, true, false));
        assert_eq!(vars["FMT_SUPPORT"], "ON");
        assert_eq!(vars["NLOHMANN_JSON_SUPPORT"], "OFF");
    }

    #[test]
    fn configure_variables_depend_on_mode() {
        let descriptor = descriptor();
        let opts = options(false, true, true);

        let dev = descriptor.configure_variables(&opts, BuildMode::LocalDevelopment);
        assert_eq!(dev["BUILD_TESTS"], "ON");
        assert_eq!(dev["BUILD_SHARED_LIBS"], "OFF");
        assert_eq!(dev["CMAKE_POSITION_INDEPENDENT_CODE"], "ON");

        let consume = descriptor.configure_variables(&opts, BuildMode::PackageConsumption);
        assert!(!consume.contains_key("BUILD_TESTS"));
    }

    #[test]
    fn shared_build_has_no_pic_variable() {
        let vars = descriptor()
            .configure_variables(&options(true, true, true), BuildMode::PackageConsumption);
        assert!(!vars.contains_key("CMAKE_POSITION_INDEPENDENT_CODE"));
        assert_eq!(vars["BUILD_SHARED_LIBS"], "ON");
    }

    #[test]
    fn test_framework_only_in_development() {
        let descriptor = descriptor();
        let dev = descriptor.build_requirements(BuildMode::LocalDevelopment);
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].reference(), "catch2/2.13.7");
        assert!(descriptor
            .build_requirements(BuildMode::PackageConsumption)
            .is_empty());
    }

    #[test]
    fn legacy_defaults_are_migrated() {
        let toml = r#"
schema = 1

[package]
name = "edotools"
version = "0.1.0"

[options]
fmt_json_support = false
"#;
        let descriptor = PackageDescriptor::new(Manifest::parse(toml).unwrap(), ".");
        assert!(descriptor.manifest().options.contains_key("fmt_support"));
    }

    #[test]
    fn package_manifest_summarizes_configuration() {
        let opts = options(false, true, false);
        let manifest = descriptor().package_manifest(&opts, &linux());
        assert_eq!(manifest.name(), "edotools");
        assert_eq!(manifest.requires().len(), 1);
        assert_eq!(manifest.requires()[0].reference(), "fmt/8.1.1");
        assert_eq!(manifest.libs(), ["edotools"]);
        assert_eq!(manifest.defines()[0], "EDOTOOLS_STATIC");
        assert!(manifest.files().is_empty());
    }

    #[test]
    fn package_manifest_lists_copy_patterns() {
        let descriptor = descriptor();
        let opts = options(false, true, false);
        let manifest = descriptor.package_manifest(&opts, &linux());

        let collected: Vec<_> = descriptor
            .collect_artifacts(Path::new("/build"), &opts, &linux())
            .into_iter()
            .map(|rule| (rule.pattern, rule.destination))
            .collect();
        let recorded: Vec<_> = manifest
            .copy_rules()
            .iter()
            .map(|rule| (rule.pattern.clone(), rule.destination.clone()))
            .collect();
        assert_eq!(recorded, collected);
        assert!(recorded.contains(&("*.hpp".to_string(), PathBuf::from("include"))));
        assert!(recorded.contains(&("*.a".to_string(), PathBuf::from("lib"))));

        let json = manifest.to_json_string().unwrap();
        assert!(json.contains("\"copy_rules\""));
    }
}
