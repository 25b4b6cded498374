use anyhow::{Context, Result};
use log::{error, info};

use meter_gateway::cli::{build_cli, execute, log_level, CliAction};

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    // RUST_LOG wins over --log-level.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(&matches)))
        .init();

    info!("⚡ meter-gateway v{}", meter_gateway::VERSION);

    let action = CliAction::from_matches(&matches);
    let success = execute(&action).context("meter-gateway failed")?;
    if !success {
        error!("❌ One or more tasks ended with an error");
        std::process::exit(1);
    }
    Ok(())
}
