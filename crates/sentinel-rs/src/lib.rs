//! Public SDK surface for Sentinel.
//!
//! Re-exports the guard building blocks and a logging helper so embedders
//! and the `sentinel` binary are wired up the same way.

/// Re-export for convenience.
pub use sentinel_rs_config as config;
pub use sentinel_rs_core as core;
/// Re-export for convenience.
pub use sentinel_rs_protocol as protocol;
pub use sentinel_rs_store as store;

pub use sentinel_rs_core::{Guard, GuardBuilder, GuardError, GuardRun, GuardVerdict};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Safe to call more than once. `RUST_LOG` controls the filter.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .parse_default_env()
            .try_init();
    }
}
