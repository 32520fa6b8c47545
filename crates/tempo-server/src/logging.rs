//! Process-wide `tracing` init, the same `tracing-subscriber` registry
//! shape the teacher stack's `dekaf::logging::install` builds, stripped of
//! the per-session task-forwarding layer that exists there only to relay
//! logs into a Gazette journal — these binaries just write to stderr.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn install() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
