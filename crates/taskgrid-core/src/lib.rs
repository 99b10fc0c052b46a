pub mod config;
pub mod datacontract;
pub mod domain;
pub mod error;
pub mod external;
pub mod ids;
pub mod program;
pub mod queue;
pub mod runner;
pub mod sandbox;
pub mod scheduler;
pub mod security;
pub mod streaming;
pub mod supervisor;
pub mod ui_session;
pub mod validator;

pub use error::{Result, TaskGridError};

use tracing::info;

/// Initialise a default tracing subscriber for the library consumer.
///
/// Call this once at program start. Uses `RUST_LOG` env var for filtering,
/// defaulting to `info` level.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).init();

    info!("taskgrid tracing initialised");
}
