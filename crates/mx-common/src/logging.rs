use std::panic;
use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialise the process-wide tracing subscriber (`RUST_LOG`, default
/// `info`). Export workers run detached from any request, so panics are also
/// routed into the log stream before the default hook takes over. Safe to
/// call more than once; everything is installed exactly once per process.
pub fn init_tracing(service: &'static str) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .with(tracing_subscriber::fmt::layer())
            .init();

        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let reason = info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .map(str::to_owned)
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".into());
            let origin = info.location().map(|location| location.to_string());

            tracing::error!(
                service,
                origin = origin.as_deref().unwrap_or("unknown"),
                reason = %reason,
                "unrecovered panic"
            );

            previous(info);
        }));
    });
}
