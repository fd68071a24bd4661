use indicatif::ProgressStyle;

/// Progress bar style of the row processing span.
pub(crate) fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] {pos} rows ({per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`) that
/// renders span progress bars through `tracing-indicatif`.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> bool {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()
        .is_ok()
}
