//! Artifact collection into the final package layout.
//!
//! A packaged build has the conventional layout:
//! ```text
//! package/
//! ├── edotools-package.json # Package manifest
//! ├── include/              # Headers and inline implementation files
//! ├── lib/                  # Static archives, import libraries, Unix shared objects
//! └── bin/                  # Windows DLLs
//! ```

use crate::options::{BuildOptions, Settings};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Headers directory.
pub const INCLUDE_DIR: &str = "include";

/// Library directory.
pub const LIB_DIR: &str = "lib";

/// Runtime binaries directory.
pub const BIN_DIR: &str = "bin";

/// Errors that can occur while collecting artifacts.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error while copying '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("glob error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("matched file '{}' is not under '{}'", .path.display(), .root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// What a copy rule collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Public headers and inline implementation files.
    Header,
    /// Static archive (`.a`).
    StaticArchive,
    /// MSVC `.lib`: a static library or the import library of a DLL.
    ImportLibrary,
    /// Unix shared object or macOS dylib.
    SharedLibrary,
    /// Windows DLL.
    RuntimeLibrary,
}

/// A copy rule as recorded in the package manifest: what is collected and
/// where it lands, independent of the machine's directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPattern {
    pub kind: ArtifactKind,
    pub pattern: String,
    pub destination: PathBuf,
    pub keep_path: bool,
}

impl CopyPattern {
    fn new(kind: ArtifactKind, pattern: &str, destination: &str, keep_path: bool) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
            destination: PathBuf::from(destination),
            keep_path,
        }
    }

    /// Bind the pattern to the directory it searches.
    #[must_use]
    pub fn rooted_at(self, root: &Path) -> CopyRule {
        CopyRule {
            kind: self.kind,
            root: root.to_path_buf(),
            pattern: self.pattern,
            destination: self.destination,
            keep_path: self.keep_path,
        }
    }
}

/// Copies files matching `pattern` under `root` into `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRule {
    pub kind: ArtifactKind,
    /// Directory searched recursively.
    pub root: PathBuf,
    /// Glob matched against paths relative to `root`.
    pub pattern: String,
    /// Package-relative destination directory.
    pub destination: PathBuf,
    /// Keep the path relative to `root`, or flatten into `destination`.
    pub keep_path: bool,
}

impl CopyRule {
    fn new(kind: ArtifactKind, root: &Path, pattern: &str, destination: &str, keep_path: bool) -> Self {
        CopyPattern::new(kind, pattern, destination, keep_path).rooted_at(root)
    }

    /// Files under `root` this rule would copy, sorted.
    ///
    /// Paths are returned without `.` components, the same way `root` is
    /// compared against them.
    pub fn matches(&self) -> Result<Vec<PathBuf>, ArtifactError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let root = normalize(&self.root);
        let base = if root.as_os_str().is_empty() {
            String::from(".")
        } else {
            glob::Pattern::escape(&root.to_string_lossy())
        };
        let pattern = format!("{base}/**/{}", self.pattern);

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry?;
            if path.is_file() {
                files.push(normalize(&path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Copy every matching file into `package_dir`.
    ///
    /// Returns the package-relative paths written, sorted.
    pub fn apply(&self, package_dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut written = Vec::new();

        let root = normalize(&self.root);
        for source in self.matches()? {
            let relative = if self.keep_path {
                source
                    .strip_prefix(&root)
                    .map_err(|_| ArtifactError::OutsideRoot {
                        path: source.clone(),
                        root: self.root.clone(),
                    })?
                    .to_path_buf()
            } else {
                PathBuf::from(source.file_name().unwrap_or_default())
            };
            let relative = self.destination.join(relative);
            let target = package_dir.join(&relative);

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::copy(&source, &target).map_err(|err| ArtifactError::Io {
                path: source.clone(),
                source: err,
            })?;

            tracing::trace!(from = %source.display(), to = %relative.display(), "copied artifact");
            written.push(relative);
        }

        written.sort();
        Ok(written)
    }
}

/// Drop `.` components, so `./include` and `include` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// The copy patterns for a build.
///
/// A shared build on a non-Windows target does not collect static archives;
/// `.lib` files are always collected because on Windows they are the import
/// library of the DLL.
#[must_use]
pub fn copy_patterns(options: &BuildOptions, settings: &Settings) -> Vec<CopyPattern> {
    let mut patterns = vec![
        CopyPattern::new(ArtifactKind::Header, "*.hpp", INCLUDE_DIR, true),
        CopyPattern::new(ArtifactKind::Header, "*.inl", INCLUDE_DIR, true),
        CopyPattern::new(ArtifactKind::ImportLibrary, "*.lib", LIB_DIR, false),
        CopyPattern::new(ArtifactKind::RuntimeLibrary, "*.dll", BIN_DIR, false),
        CopyPattern::new(ArtifactKind::SharedLibrary, "*.dylib*", LIB_DIR, false),
        CopyPattern::new(ArtifactKind::SharedLibrary, "*.so", LIB_DIR, false),
    ];

    if !options.shared() || settings.os.is_windows() {
        patterns.push(CopyPattern::new(ArtifactKind::StaticArchive, "*.a", LIB_DIR, false));
    }

    patterns
}

/// The copy rules for a build: headers come from `<source_dir>/include`,
/// binaries from anywhere under `build_dir`.
#[must_use]
pub fn copy_rules(
    source_dir: &Path,
    build_dir: &Path,
    options: &BuildOptions,
    settings: &Settings,
) -> Vec<CopyRule> {
    let headers = source_dir.join(INCLUDE_DIR);
    copy_patterns(options, settings)
        .into_iter()
        .map(|pattern| {
            let root = if pattern.kind == ArtifactKind::Header {
                &headers
            } else {
                build_dir
            };
            pattern.rooted_at(root)
        })
        .collect()
}

/// Runtime libraries a test binary needs next to it: DLLs from `bin/` and
/// dylibs from `lib/` of an installed package.
#[must_use]
pub fn runtime_import_rules(bin_dir: &Path, lib_dir: &Path) -> Vec<CopyRule> {
    vec![
        CopyRule::new(ArtifactKind::RuntimeLibrary, bin_dir, "*.dll", "", false),
        CopyRule::new(ArtifactKind::SharedLibrary, lib_dir, "*.dylib*", "", false),
    ]
}

/// Apply all rules, returning every package-relative path written, sorted.
pub fn apply_all(rules: &[CopyRule], package_dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut written = Vec::new();
    for rule in rules {
        written.extend(rule.apply(package_dir)?);
    }
    written.sort();
    written.dedup();
    Ok(written)
}
