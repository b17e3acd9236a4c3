//! Logging configuration for the rayzor macro engine
//!
//! Initializes the `log` facade through `env_logger`. The engine logs at these
//! levels:
//!
//! - `error!` - messages reported as errors, forwarded by the default sink
//! - `warn!` - poisoned runtimes, unwritable failure reports
//! - `info!` - macro context creation, runtime reuse, flush summaries
//! - `debug!` - binding cache hits, dependency edges, flush timing
//!
//! ```rust,ignore
//! rayzor_macro::logging::init_from_env();
//! ```
//!
//! `RUST_LOG=rayzor_macro::macro_system=debug` narrows output to the engine.
//! Spans around macro calls and flushes are emitted through `tracing` and are
//! only visible when a subscriber is installed by the host.

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging at Warn level. Later calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level.
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize logging from the RUST_LOG environment variable.
///
/// If RUST_LOG is not set, defaults to Warn level.
/// This only initializes once; subsequent calls are no-ops.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests; safe to call from every test.
pub fn init_test() {
    // try_init() doesn't panic if already initialized
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Whether `init`, `init_with_level` or `init_from_env` has run.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
