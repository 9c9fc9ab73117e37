use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flag.
pub(crate) fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
