//! CLI-side logging setup: human-readable output on stderr, level controlled
//! by `RUST_LOG` (defaulting to `info`).

use tracing_subscriber::EnvFilter;

pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with_writer(std::io::stderr)
    .init();
}
