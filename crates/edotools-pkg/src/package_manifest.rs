//! The package manifest written next to the packaged artifacts.
//!
//! This is the one data contract consumers read, regardless of which recipe
//! schema produced the package. Readers accept any format version up to
//! [`PACKAGE_FORMAT_VERSION`] and refuse newer ones.

use crate::artifacts::CopyPattern;
use crate::descriptor::DependencySpec;
use crate::options::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The package manifest filename.
pub const PACKAGE_MANIFEST_FILE: &str = "edotools-package.json";

/// Newest package manifest format this crate reads and writes.
pub const PACKAGE_FORMAT_VERSION: u32 = 1;

/// Errors that can occur when reading or writing a package manifest.
#[derive(Error, Debug)]
pub enum PackageManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed package manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("package manifest format {found} is newer than supported format {}", PACKAGE_FORMAT_VERSION)]
    UnsupportedFormat { found: u32 },
}

/// Everything a consumer needs to use a built package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    format: u32,
    name: String,
    version: String,
    settings: Settings,
    options: BTreeMap<String, String>,
    requires: Vec<DependencySpec>,
    defines: Vec<String>,
    build_variables: BTreeMap<String, String>,
    libs: Vec<String>,
    copy_rules: Vec<CopyPattern>,
    #[serde(default)]
    files: Vec<PathBuf>,
}

impl PackageManifest {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        version: String,
        settings: Settings,
        options: BTreeMap<String, String>,
        requires: Vec<DependencySpec>,
        defines: Vec<String>,
        build_variables: BTreeMap<String, String>,
        libs: Vec<String>,
        copy_rules: Vec<CopyPattern>,
    ) -> Self {
        Self {
            format: PACKAGE_FORMAT_VERSION,
            name,
            version,
            settings,
            options,
            requires,
            defines,
            build_variables,
            libs,
            copy_rules,
            files: Vec::new(),
        }
    }

    /// The same manifest recording the files collected into the package.
    #[must_use]
    pub fn with_files(self, files: Vec<PathBuf>) -> Self {
        Self { files, ..self }
    }

    #[must_use]
    pub fn format(&self) -> u32 {
        self.format
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The `name/version` reference of the package.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Dependencies consumers inherit, with their header visibility.
    #[must_use]
    pub fn requires(&self) -> &[DependencySpec] {
        &self.requires
    }

    #[must_use]
    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    #[must_use]
    pub fn build_variables(&self) -> &BTreeMap<String, String> {
        &self.build_variables
    }

    #[must_use]
    pub fn libs(&self) -> &[String] {
        &self.libs
    }

    /// What the package collects and where each kind of file lands.
    #[must_use]
    pub fn copy_rules(&self) -> &[CopyPattern] {
        &self.copy_rules
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, PackageManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the manifest into a package directory, returning its path.
    pub fn write_to(&self, package_dir: &Path) -> Result<PathBuf, PackageManifestError> {
        std::fs::create_dir_all(package_dir)?;
        let path = package_dir.join(PACKAGE_MANIFEST_FILE);
        std::fs::write(&path, self.to_json_string()?)?;
        Ok(path)
    }

    /// Read the manifest from a package directory.
    pub fn read_from(package_dir: &Path) -> Result<Self, PackageManifestError> {
        let content = std::fs::read_to_string(package_dir.join(PACKAGE_MANIFEST_FILE))?;
        let manifest: Self = serde_json::from_str(&content)?;
        if manifest.format > PACKAGE_FORMAT_VERSION {
            return Err(PackageManifestError::UnsupportedFormat {
                found: manifest.format,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;
    use crate::options::{BuildType, Os};
    use tempfile::TempDir;

    fn sample() -> PackageManifest {
        PackageManifest::new(
            "edotools".to_string(),
            "1.0.0".to_string(),
            Settings {
                os: Os::Linux,
                arch: "x86_64".to_string(),
                build_type: BuildType::Release,
                compiler: Some("gcc".to_string()),
            },
            BTreeMap::from([("shared".to_string(), "False".to_string())]),
            vec![DependencySpec {
                name: "fmt".to_string(),
                version: "8.1.1".to_string(),
                transitive_headers: true,
            }],
            vec!["EDOTOOLS_STATIC".to_string()],
            BTreeMap::from([("FMT_SUPPORT".to_string(), "ON".to_string())]),
            vec!["edotools".to_string()],
            vec![CopyPattern {
                kind: ArtifactKind::Header,
                pattern: "*.hpp".to_string(),
                destination: PathBuf::from("include"),
                keep_path: true,
            }],
        )
    }

    #[test]
    fn write_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let manifest = sample().with_files(vec![PathBuf::from("lib/libedotools.a")]);

        let path = manifest.write_to(tmp.path()).unwrap();
        assert!(path.ends_with(PACKAGE_MANIFEST_FILE));

        let read = PackageManifest::read_from(tmp.path()).unwrap();
        assert_eq!(read, manifest);
        assert_eq!(read.reference(), "edotools/1.0.0");
    }

    #[test]
    fn newer_format_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&sample().to_json_string().unwrap()).unwrap();
        json["format"] = serde_json::json!(PACKAGE_FORMAT_VERSION + 1);
        std::fs::write(tmp.path().join(PACKAGE_MANIFEST_FILE), json.to_string()).unwrap();

        let err = PackageManifest::read_from(tmp.path()).unwrap_err();
        assert!(matches!(err, PackageManifestError::UnsupportedFormat { found: 2 }));
    }

    #[test]
    fn copy_rules_are_serialized() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_json_string().unwrap()).unwrap();
        let rule = &json["copy_rules"][0];
        assert_eq!(rule["kind"], "header");
        assert_eq!(rule["pattern"], "*.hpp");
        assert_eq!(rule["destination"], "include");
        assert_eq!(rule["keep_path"], true);
    }

    #[test]
    fn files_default_to_empty() {
        let mut json: serde_json::Value =
            serde_json::from_str(&sample().to_json_string().unwrap()).unwrap();
        json.as_object_mut().unwrap().remove("files");
        let manifest: PackageManifest = serde_json::from_value(json).unwrap();
        assert!(manifest.files().is_empty());
    }
}
