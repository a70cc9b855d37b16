use clap::Parser;
use reload_host::{Cli, ReloadHost};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_config();
    let result = ReloadHost::native(config).and_then(ReloadHost::run);
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "fatal");
            std::process::abort();
        }
    }
}
