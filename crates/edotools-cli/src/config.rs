//! Layered build configuration: recipe defaults, then a profile, then flags.

use anyhow::{Context, Result};
use clap::Args;
use edotools_pkg::{BuildOptions, OptionValues, PackageDescriptor, Profile, Settings};
use std::path::PathBuf;

/// Flags shared by every command that reads the recipe.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Directory containing edotools.toml and the library sources
    #[arg(long, visible_alias = "recipe", default_value = ".")]
    pub source: PathBuf,

    /// Profile file with [settings] and [options] tables
    #[arg(long, env = "EDOTOOLS_PROFILE")]
    pub profile: Option<PathBuf>,

    /// Option override, e.g. `-o shared=True` (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Setting override, e.g. `-s build_type=Debug` (repeatable)
    #[arg(short = 's', long = "setting", value_name = "KEY=VALUE")]
    pub settings: Vec<String>,
}

/// Everything needed to derive a package for one invocation.
#[derive(Debug)]
pub struct Configuration {
    pub descriptor: PackageDescriptor,
    pub settings: Settings,
    pub values: OptionValues,
}

impl Configuration {
    /// Validate the option values against the settings.
    pub fn build_options(&self) -> Result<BuildOptions> {
        BuildOptions::resolve(&self.values, &self.settings).context("Invalid build configuration")
    }
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Configuration> {
        let descriptor = PackageDescriptor::load(&self.source).with_context(|| {
            format!(
                "Failed to load recipe from {} (run `edotools init` to create one)",
                self.source.display()
            )
        })?;

        let mut settings = Settings::host();
        let mut values = descriptor
            .manifest()
            .option_defaults()
            .context("Invalid option defaults in recipe")?;

        if let Some(path) = &self.profile {
            let profile = Profile::from_path(path)
                .with_context(|| format!("Failed to load profile {}", path.display()))?;
            profile.apply_settings(&mut settings)?;
            values = values.overlay(profile.option_values()?);
        }

        let mut overrides = OptionValues::default();
        for assignment in &self.options {
            overrides.parse_assignment(assignment)?;
        }
        values = values.overlay(overrides);

        for assignment in &self.settings {
            settings.parse_assignment(assignment)?;
        }

        tracing::debug!(?settings, ?values, "configuration loaded");
        Ok(Configuration {
            descriptor,
            settings,
            values,
        })
    }
}
