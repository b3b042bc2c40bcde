use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use whatsblitz::args::{Cli, Command, GatewayAction};
use whatsblitz::commands;
use whatsblitz::config::Config;
use whatsblitz::daemon;
use whatsblitz::gateway::{self, GatewayOptions};
use whatsblitz::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_from_env();
    if cli.common.no_color {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.common.config_path())?;
    cli.common.apply_overrides(&mut config);

    match cli.command {
        Command::Gateway { action } => run_gateway_command(config, action).await,
        Command::Send { file } => commands::cmd_send(&config, &file).await,
        Command::Push { file, inline } => commands::cmd_push(&config, &file, inline).await,
        Command::Validate { file } => commands::cmd_validate(&file),
        Command::History { limit } => commands::cmd_history(&config, limit),
        Command::Status => commands::cmd_status(&config).await,
    }
}

async fn run_gateway_command(mut config: Config, action: GatewayAction) -> Result<()> {
    match action {
        GatewayAction::Run { listen, headless } => {
            if headless {
                config.browser.headless = true;
            }
            let listen = listen.unwrap_or_else(|| config.gateway_url.clone());

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    signal_cancel.cancel();
                }
            });

            gateway::run_gateway(config, GatewayOptions { listen }, cancel).await
        }
        GatewayAction::Start => {
            let pid = daemon::start(&config.state_dir, Some(&config.gateway_url))?;
            println!("Gateway started (PID {pid})");
            println!("Logs: {}", daemon::log_path(&config.state_dir).display());
            Ok(())
        }
        GatewayAction::Stop => {
            match daemon::stop(&config.state_dir)? {
                daemon::StopResult::Stopped { pid } => println!("Gateway stopped (PID {pid})"),
                daemon::StopResult::WasStale { pid } => {
                    println!("Removed stale PID file (PID {pid} was not running)");
                }
                daemon::StopResult::WasNotRunning => println!("Gateway is not running"),
            }
            Ok(())
        }
        GatewayAction::Status => {
            match daemon::status(&config.state_dir) {
                daemon::DaemonStatus::Running { pid } => println!("Gateway running (PID {pid})"),
                daemon::DaemonStatus::Stale { pid } => {
                    println!("Gateway not running (stale PID file for {pid})");
                }
                daemon::DaemonStatus::Stopped => println!("Gateway not running"),
            }
            Ok(())
        }
    }
}
