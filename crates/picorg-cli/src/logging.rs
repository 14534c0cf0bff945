use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber and routes `log` records into it.
///
/// `RUST_LOG` wins over `verbose`; without either the level is `info`.
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter_layer)
        .with(text_layer)
        .with(json_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    // The library logs through the `log` facade.
    tracing_log::LogTracer::init()?;

    Ok(())
}
