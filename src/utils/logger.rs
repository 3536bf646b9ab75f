//! Logging setup for the pbx-backup CLI.
//!
//! One subscriber for the lifetime of the single-shot process. The level
//! comes from the command line; `RUST_LOG` overrides it for debugging.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Module targets add nothing in a single-crate tool; the operator reads
    // these logs on a console or out of the journal.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}
