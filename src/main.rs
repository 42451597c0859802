use machwire::cli::run_cli;
use machwire::logging::{self, LogConfig};

fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init(&LogConfig::from_env()) {
        eprintln!("Warning: {e:#}");
    }
    run_cli()
}
