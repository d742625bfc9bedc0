use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a stderr subscriber.
///
/// `RUST_LOG` takes precedence; otherwise only warnings are shown, or debug
/// output from this crate when `verbose` is set.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "pipeline_shell=debug,warn"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}
