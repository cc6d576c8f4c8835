//! Log setup shared by every robot binary.

use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::options::LogFormat;

/// Installs the global subscriber and returns a span naming the component.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Enter the
/// returned span in `main` so every line carries `component`.
pub fn init(component: &'static str, format: LogFormat) -> Span {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => builder.with_target(false).try_init(),
    };

    if let Err(e) = installed {
        eprintln!("logging already initialised: {e}");
    }

    tracing::info_span!("robot", component)
}
