//! # Plugbus
//!
//! An in-process event bus for plugin hosts:
//! - Hierarchical `/`-separated topics with `*` and `**` wildcards
//! - Priority-ordered delivery with optional self-exclusion
//! - Fire-and-forget and blocking publish modes
//! - Single-responder request/response calls
//!
//! ## Architecture
//!
//! Plugbus is organized as a workspace:
//!
//! 1. **plugbus-core** - Topic matcher, subscription table, dispatcher, request registry
//! 2. **plugbus** - Re-exports, logging setup and the demo binary

pub use plugbus_core::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
