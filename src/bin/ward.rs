//! Ward CLI
//!
//! Drives Lua scripts through the sandbox supervisor from the command line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ward_core::cli;

// Supervisors are !Send, so everything runs on one thread
#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ward=info,ward_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
