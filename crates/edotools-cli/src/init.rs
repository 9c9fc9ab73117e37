//! Recipe initialization for `edotools init`.

use anyhow::{bail, Context, Result};
use edotools_pkg::{Manifest, RECIPE_FILE};
use std::fs;
use std::path::{Path, PathBuf};

/// Options for recipe initialization.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Directory to write the recipe into.
    pub dir: PathBuf,

    /// Package name (defaults to the built-in recipe's name).
    pub name: Option<String>,

    /// Overwrite an existing recipe.
    pub force: bool,
}

/// Write a recipe into `options.dir`, returning its path.
pub fn init_recipe(options: &InitOptions) -> Result<PathBuf> {
    let recipe_path = options.dir.join(RECIPE_FILE);
    if recipe_path.exists() && !options.force {
        bail!(
            "Cannot initialize: `{}` already exists in {} (use --force to overwrite)",
            RECIPE_FILE,
            options.dir.display()
        );
    }

    let manifest = create_manifest(options.name.as_deref());
    let content = manifest
        .to_toml_string()
        .context("Failed to serialize recipe")?;

    // Round-trip through the parser so a bad --name is caught before writing
    Manifest::parse(&content).context("Generated recipe is invalid")?;

    fs::create_dir_all(&options.dir)
        .with_context(|| format!("Failed to create {}", options.dir.display()))?;
    fs::write(&recipe_path, content)
        .with_context(|| format!("Failed to write {}", recipe_path.display()))?;

    create_directory_structure(&options.dir)?;

    println!("Created recipe `{}`", recipe_path.display());
    Ok(recipe_path)
}

/// The built-in recipe, optionally renamed.
fn create_manifest(name: Option<&str>) -> Manifest {
    let mut manifest = Manifest::edotools();
    if let Some(name) = name {
        manifest.package.name = name.to_string();
        manifest.package.define_prefix = Some(define_prefix(name));
    }
    manifest
}

/// `my-lib` becomes `MY_LIB_`.
fn define_prefix(name: &str) -> String {
    let mut prefix: String = name
        .chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect();
    prefix.push('_');
    prefix
}

/// Create the header directory copy rules collect from.
fn create_directory_structure(root: &Path) -> Result<()> {
    let include_dir = root.join(edotools_pkg::INCLUDE_DIR);
    fs::create_dir_all(&include_dir).context("Failed to create include directory")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &Path) -> InitOptions {
        InitOptions {
            dir: dir.to_path_buf(),
            name: None,
            force: false,
        }
    }

    #[test]
    fn writes_builtin_recipe() {
        let tmp = TempDir::new().unwrap();
        let path = init_recipe(&options(tmp.path())).unwrap();

        let manifest = Manifest::from_path(&path).unwrap();
        assert_eq!(manifest.package.name, "edotools");
        assert_eq!(manifest.optional_dependencies.len(), 2);
        assert!(tmp.path().join("include").is_dir());
    }

    #[test]
    fn refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        init_recipe(&options(tmp.path())).unwrap();
        assert!(init_recipe(&options(tmp.path())).is_err());

        let forced = InitOptions {
            force: true,
            ..options(tmp.path())
        };
        assert!(init_recipe(&forced).is_ok());
    }

    #[test]
    fn custom_name_sets_define_prefix() {
        let tmp = TempDir::new().unwrap();
        let renamed = InitOptions {
            name: Some("my-tools".to_string()),
            ..options(tmp.path())
        };
        let path = init_recipe(&renamed).unwrap();

        let manifest = Manifest::from_path(path).unwrap();
        assert_eq!(manifest.package.name, "my-tools");
        assert_eq!(manifest.package.define_prefix(), "MY_TOOLS_");
    }

    #[test]
    fn invalid_name_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let renamed = InitOptions {
            name: Some("123tools".to_string()),
            ..options(tmp.path())
        };
        assert!(init_recipe(&renamed).is_err());
        assert!(!tmp.path().join(RECIPE_FILE).exists());
    }
}
