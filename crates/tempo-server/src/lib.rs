//! Binaries, HTTP routes, and CLI configs wiring the rest of the workspace
//! into four runnable processes (SPEC_FULL.md §12): `tempo-ingress`,
//! `tempo-ingester`, `tempo-query`, `tempo-compactor`.

pub mod api;
pub mod error;
pub mod internal_live;
pub mod live_client;
pub mod logging;
pub mod metrics_server;
pub mod ring_bootstrap;
pub mod ring_debug;
pub mod tenant;

/// Binary-relevant process exit codes (spec.md §6): `0` success, `1` a
/// runtime failure after startup, `2` bad configuration. `clap` itself
/// already exits `2` on an unparseable command line, so only the `1` case
/// needs an explicit call site in each `main`.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_BAD_CONFIG: i32 = 2;
