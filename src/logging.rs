use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn setup_tracing(verbosity_level: u8) {
    setup_tracing_with_format(verbosity_level, false)
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flag when set.
pub fn setup_tracing_with_format(verbosity_level: u8, json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_to_level(verbosity_level).into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn verbosity_to_level(verbosity_level: u8) -> LevelFilter {
    match verbosity_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
