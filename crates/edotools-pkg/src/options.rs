//! Build settings, user-supplied options and the build mode.
//!
//! Options arrive in layers (recipe defaults, a profile, `-o key=value`
//! flags) as [`OptionValues`], where an unset switch means "use the
//! default". They are validated against the target [`Settings`] exactly once
//! by [`BuildOptions::resolve`], which rejects contradictory combinations
//! instead of silently dropping them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or validating build configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option '{key}', expected True or False")]
    InvalidBool { key: String, value: String },

    #[error("malformed assignment '{0}', expected key=value")]
    MalformedAssignment(String),

    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("unsupported operating system '{0}'")]
    UnknownOs(String),

    #[error("unknown build type '{0}', expected one of: Debug, Release, RelWithDebInfo, MinSizeRel")]
    UnknownBuildType(String),

    #[error("option 'fpic' is not available when targeting Windows")]
    PicOnWindows,

    #[error("option 'fpic=False' contradicts 'shared=True': shared libraries are always position independent")]
    StaticPicWithShared,

    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Os {
    Windows,
    Linux,
    Macos,
    #[serde(rename = "FreeBSD")]
    FreeBsd,
}

impl Os {
    /// The operating system this binary is running on.
    #[must_use]
    pub fn host() -> Self {
        match std::env::consts::OS {
            "windows" => Self::Windows,
            "macos" => Self::Macos,
            "freebsd" => Self::FreeBsd,
            _ => Self::Linux,
        }
    }

    #[must_use]
    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }

    /// Returns the os as a string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::Macos => "Macos",
            Self::FreeBsd => "FreeBSD",
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Os {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::Macos),
            "freebsd" => Ok(Self::FreeBsd),
            _ => Err(ConfigError::UnknownOs(s.to_string())),
        }
    }
}

/// CMake build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildType {
    Debug,
    #[default]
    Release,
    RelWithDebInfo,
    MinSizeRel,
}

impl BuildType {
    /// Returns the build type as CMake spells it.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
            Self::RelWithDebInfo => "RelWithDebInfo",
            Self::MinSizeRel => "MinSizeRel",
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "relwithdebinfo" => Ok(Self::RelWithDebInfo),
            "minsizerel" => Ok(Self::MinSizeRel),
            _ => Err(ConfigError::UnknownBuildType(s.to_string())),
        }
    }
}

/// Target platform settings for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub os: Os,
    pub arch: String,
    pub build_type: BuildType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
}

impl Settings {
    /// Settings describing the machine this binary is running on.
    #[must_use]
    pub fn host() -> Self {
        Self {
            os: Os::host(),
            arch: host_arch().to_string(),
            build_type: BuildType::default(),
            compiler: None,
        }
    }

    /// Set a single setting by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "os" => self.os = value.parse()?,
            "arch" => self.arch = value.to_string(),
            "build_type" => self.build_type = value.parse()?,
            "compiler" => self.compiler = Some(value.to_string()),
            _ => return Err(ConfigError::UnknownSetting(key.to_string())),
        }
        Ok(())
    }

    /// Apply a `key=value` assignment as given to `-s`.
    pub fn parse_assignment(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, value) = split_assignment(assignment)?;
        self.set(key, value)
    }
}

/// Host architecture using the package manager's naming.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "armv8",
        "arm" => "armv7",
        other => other,
    }
}

/// An optional third-party integration gated by a build option.
///
/// Declaration order is significant: defines and variables are always
/// emitted in the order of [`OptionalFeature::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionalFeature {
    Fmt,
    NlohmannJson,
}

impl OptionalFeature {
    /// Every optional feature, in declaration order.
    pub const ALL: [Self; 2] = [Self::Fmt, Self::NlohmannJson];

    /// The option key that toggles this feature.
    #[must_use]
    pub fn option_key(self) -> &'static str {
        match self {
            Self::Fmt => "fmt_support",
            Self::NlohmannJson => "nlohmann_json_support",
        }
    }

    /// Build variable name, also used as the suffix of the exported define.
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Fmt => "FMT_SUPPORT",
            Self::NlohmannJson => "NLOHMANN_JSON_SUPPORT",
        }
    }
}

impl std::fmt::Display for OptionalFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fmt => f.write_str("fmt"),
            Self::NlohmannJson => f.write_str("nlohmann-json"),
        }
    }
}

/// Whether the build runs inside the developer's checkout or is being
/// produced for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildMode {
    /// Building from a working copy: tests are built and run.
    LocalDevelopment,
    /// Building the package for consumers: no tests, no test dependencies.
    PackageConsumption,
}

impl BuildMode {
    #[must_use]
    pub fn runs_tests(self) -> bool {
        self == Self::LocalDevelopment
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalDevelopment => f.write_str("local development"),
            Self::PackageConsumption => f.write_str("package consumption"),
        }
    }
}

/// Raw option values as supplied by one configuration layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionValues {
    pub shared: Option<bool>,
    pub fpic: Option<bool>,
    pub fmt_support: Option<bool>,
    pub nlohmann_json_support: Option<bool>,
}

impl OptionValues {
    /// Set an option by key. Keys are case-insensitive and accept `-` for `_`.
    pub fn set(&mut self, key: &str, value: bool) -> Result<(), ConfigError> {
        let slot = match normalize_key(key).as_str() {
            "shared" => &mut self.shared,
            "fpic" | "position_independent_code" => &mut self.fpic,
            // Legacy spelling.
            "fmt_support" | "fmt_json_support" => &mut self.fmt_support,
            "nlohmann_json_support" => &mut self.nlohmann_json_support,
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        };
        *slot = Some(value);
        Ok(())
    }

    /// Set an option from its textual value.
    pub fn set_str(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = parse_bool(key, value)?;
        self.set(key, value)
    }

    /// Apply a `key=value` assignment as given to `-o`.
    pub fn parse_assignment(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, value) = split_assignment(assignment)?;
        self.set_str(key, value)
    }

    /// Build a layer from a TOML `[options]` table.
    pub fn from_table(table: &BTreeMap<String, toml::Value>) -> Result<Self, ConfigError> {
        let mut values = Self::default();
        for (key, value) in table {
            match value {
                toml::Value::Boolean(b) => values.set(key, *b)?,
                toml::Value::String(s) => values.set_str(key, s)?,
                other => {
                    return Err(ConfigError::InvalidBool {
                        key: key.clone(),
                        value: other.to_string(),
                    })
                }
            }
        }
        Ok(values)
    }

    /// Layer `other` on top of `self`; values set in `other` win.
    #[must_use]
    pub fn overlay(self, other: Self) -> Self {
        Self {
            shared: other.shared.or(self.shared),
            fpic: other.fpic.or(self.fpic),
            fmt_support: other.fmt_support.or(self.fmt_support),
            nlohmann_json_support: other.nlohmann_json_support.or(self.nlohmann_json_support),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

fn split_assignment(assignment: &str) -> Result<(&str, &str), ConfigError> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(ConfigError::MalformedAssignment(assignment.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Validated build options for one build invocation.
///
/// Only obtainable through [`BuildOptions::resolve`], so every value of this
/// type is a consistent combination for its target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildOptions {
    shared: bool,
    position_independent_code: Option<bool>,
    fmt_support: bool,
    nlohmann_json_support: bool,
}

impl BuildOptions {
    /// Validate raw option values against the target settings, filling in
    /// defaults for anything left unset.
    pub fn resolve(values: &OptionValues, settings: &Settings) -> Result<Self, ConfigError> {
        let shared = values.shared.unwrap_or(false);

        let position_independent_code = if settings.os.is_windows() {
            if values.fpic.is_some() {
                return Err(ConfigError::PicOnWindows);
            }
            None
        } else if shared {
            match values.fpic {
                Some(false) => return Err(ConfigError::StaticPicWithShared),
                Some(true) => {
                    tracing::debug!("fpic is implied by shared=True, dropping it");
                    None
                }
                None => None,
            }
        } else {
            Some(values.fpic.unwrap_or(true))
        };

        Ok(Self {
            shared,
            position_independent_code,
            fmt_support: values.fmt_support.unwrap_or(true),
            nlohmann_json_support: values.nlohmann_json_support.unwrap_or(true),
        })
    }

    #[must_use]
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// `None` when the switch does not apply (shared builds, Windows).
    #[must_use]
    pub fn position_independent_code(&self) -> Option<bool> {
        self.position_independent_code
    }

    #[must_use]
    pub fn is_enabled(&self, feature: OptionalFeature) -> bool {
        match feature {
            OptionalFeature::Fmt => self.fmt_support,
            OptionalFeature::NlohmannJson => self.nlohmann_json_support,
        }
    }

    /// Enabled optional features, in declaration order.
    pub fn enabled_features(&self) -> impl Iterator<Item = OptionalFeature> + '_ {
        OptionalFeature::ALL
            .into_iter()
            .filter(|feature| self.is_enabled(*feature))
    }

    /// Every optional feature with its state, in declaration order.
    pub fn as_feature_flags(&self) -> impl Iterator<Item = (OptionalFeature, bool)> + '_ {
        OptionalFeature::ALL
            .into_iter()
            .map(|feature| (feature, self.is_enabled(feature)))
    }

    /// The options as `key -> True/False` pairs; inapplicable options are omitted.
    #[must_use]
    pub fn as_pairs(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        pairs.insert("shared".to_string(), bool_str(self.shared).to_string());
        if let Some(fpic) = self.position_independent_code {
            pairs.insert("fpic".to_string(), bool_str(fpic).to_string());
        }
        for feature in OptionalFeature::ALL {
            pairs.insert(
                feature.option_key().to_string(),
                bool_str(self.is_enabled(feature)).to_string(),
            );
        }
        pairs
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// A profile file: target settings plus an options layer.
///
/// ```toml
/// [settings]
/// os = "Linux"
/// build_type = "Debug"
///
/// [options]
/// shared = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

impl Profile {
    /// Load a profile from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a profile from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the profile's settings on top of `settings`.
    pub fn apply_settings(&self, settings: &mut Settings) -> Result<(), ConfigError> {
        for (key, value) in &self.settings {
            settings.set(key, value)?;
        }
        Ok(())
    }

    /// The profile's options layer.
    pub fn option_values(&self) -> Result<OptionValues, ConfigError> {
        OptionValues::from_table(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> Settings {
        Settings {
            os: Os::Linux,
            arch: "x86_64".to_string(),
            build_type: BuildType::Release,
            compiler: None,
        }
    }

    fn windows() -> Settings {
        Settings {
            os: Os::Windows,
            ..linux()
        }
    }

    #[test]
    fn defaults() {
        let options = BuildOptions::resolve(&OptionValues::default(), &linux()).unwrap();
        assert!(!options.shared());
        assert_eq!(options.position_independent_code(), Some(true));
        assert!(options.is_enabled(OptionalFeature::Fmt));
        assert!(options.is_enabled(OptionalFeature::NlohmannJson));
    }

    #[test]
    fn pic_not_applicable_on_windows() {
        let options = BuildOptions::resolve(&OptionValues::default(), &windows()).unwrap();
        assert_eq!(options.position_independent_code(), None);
    }

    #[test]
    fn explicit_pic_on_windows_is_rejected() {
        for fpic in [true, false] {
            let values = OptionValues {
                fpic: Some(fpic),
                ..OptionValues::default()
            };
            let err = BuildOptions::resolve(&values, &windows()).unwrap_err();
            assert!(matches!(err, ConfigError::PicOnWindows));
        }
    }

    #[test]
    fn shared_drops_pic() {
        let values = OptionValues {
            shared: Some(true),
            fpic: Some(true),
            ..OptionValues::default()
        };
        let options = BuildOptions::resolve(&values, &linux()).unwrap();
        assert!(options.shared());
        assert_eq!(options.position_independent_code(), None);
    }

    #[test]
    fn shared_without_pic_is_rejected() {
        let values = OptionValues {
            shared: Some(true),
            fpic: Some(false),
            ..OptionValues::default()
        };
        let err = BuildOptions::resolve(&values, &linux()).unwrap_err();
        assert!(matches!(err, ConfigError::StaticPicWithShared));
    }

    #[test]
    fn legacy_fmt_option_key() {
        let mut values = OptionValues::default();
        values.parse_assignment("fmt_json_support=False").unwrap();
        assert_eq!(values.fmt_support, Some(false));
    }

    #[test]
    fn assignment_keys_are_normalized() {
        let mut values = OptionValues::default();
        values.parse_assignment("fPIC=OFF").unwrap();
        values.parse_assignment("nlohmann-json-support = no").unwrap();
        assert_eq!(values.fpic, Some(false));
        assert_eq!(values.nlohmann_json_support, Some(false));
    }

    #[test]
    fn invalid_assignments() {
        let mut values = OptionValues::default();
        assert!(matches!(
            values.parse_assignment("shared"),
            Err(ConfigError::MalformedAssignment(_))
        ));
        assert!(matches!(
            values.parse_assignment("shared=maybe"),
            Err(ConfigError::InvalidBool { .. })
        ));
        assert!(matches!(
            values.parse_assignment("header_only=True"),
            Err(ConfigError::UnknownOption(_))
        ));
    }

    #[test]
    fn overlay_prefers_later_layer() {
        let recipe = OptionValues {
            shared: Some(false),
            fmt_support: Some(false),
            ..OptionValues::default()
        };
        let cli = OptionValues {
            shared: Some(true),
            ..OptionValues::default()
        };
        let merged = recipe.overlay(cli);
        assert_eq!(merged.shared, Some(true));
        assert_eq!(merged.fmt_support, Some(false));
        assert_eq!(merged.fpic, None);
    }

    #[test]
    fn parse_profile() {
        let profile = Profile::parse(
            r#"
[settings]
os = "Windows"
build_type = "Debug"
compiler = "msvc"

[options]
shared = true
fmt_support = "False"
"#,
        )
        .unwrap();

        let mut settings = linux();
        profile.apply_settings(&mut settings).unwrap();
        assert_eq!(settings.os, Os::Windows);
        assert_eq!(settings.build_type, BuildType::Debug);
        assert_eq!(settings.compiler.as_deref(), Some("msvc"));

        let values = profile.option_values().unwrap();
        assert_eq!(values.shared, Some(true));
        assert_eq!(values.fmt_support, Some(false));
    }

    #[test]
    fn profile_rejects_non_boolean_option() {
        let profile = Profile::parse("[options]\nshared = 3\n").unwrap();
        assert!(matches!(
            profile.option_values(),
            Err(ConfigError::InvalidBool { .. })
        ));
    }

    #[test]
    fn settings_assignment() {
        let mut settings = linux();
        settings.parse_assignment("os=Darwin").unwrap();
        settings.parse_assignment("build_type=relwithdebinfo").unwrap();
        assert_eq!(settings.os, Os::Macos);
        assert_eq!(settings.build_type, BuildType::RelWithDebInfo);
        assert!(matches!(
            settings.parse_assignment("os=Plan9"),
            Err(ConfigError::UnknownOs(_))
        ));
        assert!(matches!(
            settings.parse_assignment("libcxx=libstdc++11"),
            Err(ConfigError::UnknownSetting(_))
        ));
    }

    #[test]
    fn pairs_omit_inapplicable_pic() {
        let options = BuildOptions::resolve(&OptionValues::default(), &windows()).unwrap();
        let pairs = options.as_pairs();
        assert!(!pairs.contains_key("fpic"));
        assert_eq!(pairs["shared"], "False");
        assert_eq!(pairs["fmt_support"], "True");
    }
}
