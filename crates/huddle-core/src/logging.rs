use std::sync::Once;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "huddle_core=debug";

/// Initialize tracing/logging. Call once from the host before creating a
/// session; later calls are ignored.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        if let Err(e) = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init()
        {
            eprintln!("huddle-core: tracing already initialized: {e}");
        }
    });
}
