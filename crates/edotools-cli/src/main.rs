//! EdoTools CLI - describe, build and package the EdoTools C++ library

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edotools_pkg::{
    BuildMode, CMake, LocalCache, Pipeline, PipelineDirs, ProcessTestRunner, SchemaVersion,
    TestOutcome, TestPackage,
};
use std::path::PathBuf;

mod config;
mod init;
mod logging;

use config::ConfigArgs;

#[derive(Parser)]
#[command(name = "edotools")]
#[command(version)]
#[command(about = "Package description and build orchestration for EdoTools", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the EdoTools recipe (edotools.toml)
    Init {
        /// Directory to write the recipe into
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Rename the package (also changes the define prefix)
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing recipe
        #[arg(long)]
        force: bool,
    },

    /// Print the package manifest for a configuration as JSON
    Inspect {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the dependencies a configuration pulls in
    Deps {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also list build requirements used during local development
        #[arg(long)]
        dev: bool,
    },

    /// List the preprocessor defines exported to consumers
    Defines {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the build tool variables
    Variables {
        #[command(flatten)]
        config: ConfigArgs,

        /// Show every configure variable, not only feature switches
        #[arg(long)]
        all: bool,

        /// Derive variables for a consumption build (no tests)
        #[arg(long)]
        consume: bool,
    },

    /// Resolve, build, test and package
    Create {
        #[command(flatten)]
        config: ConfigArgs,

        /// Build for consumers: skip tests and test-only dependencies
        #[arg(long)]
        consume: bool,

        /// Root of the installed dependency cache (<cache>/<name>/<version>)
        #[arg(long, env = "EDOTOOLS_CACHE", default_value = ".edotools/cache")]
        cache: PathBuf,

        /// Output root; build/ and package/ are created inside
        #[arg(long, default_value = ".edotools/out")]
        out: PathBuf,

        /// CMake generator
        #[arg(short = 'G', long)]
        generator: Option<String>,
    },

    /// Build a consumer project against a created package and run its tests
    TestPackage {
        #[command(flatten)]
        config: ConfigArgs,

        /// Consumer project directory
        #[arg(default_value = "test_package")]
        consumer: PathBuf,

        /// Created package directory
        #[arg(long, default_value = ".edotools/out/package")]
        package: PathBuf,

        /// Build directory for the consumer
        #[arg(long, default_value = ".edotools/out/test_package")]
        build_dir: PathBuf,

        /// Root of the installed dependency cache
        #[arg(long, env = "EDOTOOLS_CACHE", default_value = ".edotools/cache")]
        cache: PathBuf,

        /// Recipe schema of the consumer project (1, 2 or 3)
        #[arg(long, default_value_t = 3)]
        schema: u32,

        /// CMake generator
        #[arg(short = 'G', long)]
        generator: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { dir, name, force } => {
            init::init_recipe(&init::InitOptions { dir, name, force })?;
        }

        Commands::Inspect { config } => {
            let config = config.load()?;
            let options = config.build_options()?;
            let manifest = config
                .descriptor
                .package_manifest(&options, &config.settings);
            println!("{}", manifest.to_json_string()?);
        }

        Commands::Deps { config, dev } => {
            let config = config.load()?;
            let options = config.build_options()?;
            for dep in config.descriptor.resolve_dependencies(&options) {
                let visibility = if dep.transitive_headers {
                    "transitive headers"
                } else {
                    "private"
                };
                println!("{dep} ({visibility})");
            }
            if dev {
                for dep in config
                    .descriptor
                    .build_requirements(BuildMode::LocalDevelopment)
                {
                    println!("{dep} (build)");
                }
            }
        }

        Commands::Defines { config } => {
            let config = config.load()?;
            let options = config.build_options()?;
            for define in config.descriptor.compute_exported_defines(&options) {
                println!("{define}");
            }
        }

        Commands::Variables {
            config,
            all,
            consume,
        } => {
            let config = config.load()?;
            let options = config.build_options()?;
            let variables = if all {
                config
                    .descriptor
                    .configure_variables(&options, build_mode(consume))
            } else {
                config.descriptor.compute_build_variables(&options)
            };
            for (key, value) in variables {
                println!("{key}={value}");
            }
        }

        Commands::Create {
            config,
            consume,
            cache,
            out,
            generator,
        } => {
            let config = config.load()?;
            let resolver = LocalCache::new(cache);
            let tool = cmake(generator);
            let dirs = PipelineDirs::under(out);

            let manifest = Pipeline::new(&config.descriptor, build_mode(consume), &resolver, &tool)
                .run(&config.values, &config.settings, &dirs)?;

            println!(
                "Created `{}` with {} files in {}",
                manifest.reference(),
                manifest.files().len(),
                dirs.package_dir.display()
            );
        }

        Commands::TestPackage {
            config,
            consumer,
            package,
            build_dir,
            cache,
            schema,
            generator,
        } => {
            let config = config.load()?;
            let schema = SchemaVersion::try_from(schema).context("Invalid --schema")?;
            let resolver = LocalCache::new(cache);
            let tool = cmake(generator);
            let runner = ProcessTestRunner;

            let outcome = TestPackage::new(consumer, &resolver, &tool, &runner)
                .with_schema(schema)
                .with_test_requires(
                    config
                        .descriptor
                        .build_requirements(BuildMode::LocalDevelopment),
                )
                .run(&package, &config.settings, &build_dir)?;

            match outcome {
                TestOutcome::Passed(_) => println!("Package tests passed"),
                TestOutcome::Skipped { reason } => println!("Package tests skipped: {reason}"),
            }
        }
    }

    Ok(())
}

fn build_mode(consume: bool) -> BuildMode {
    if consume {
        BuildMode::PackageConsumption
    } else {
        BuildMode::LocalDevelopment
    }
}

fn cmake(generator: Option<String>) -> CMake {
    match generator {
        Some(generator) => CMake::new().with_generator(generator),
        None => CMake::new(),
    }
}
