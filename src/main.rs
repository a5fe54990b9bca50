use clap::Parser;
use someip_session::cli::{self, Cli, Commands, DemoOptions};
use someip_session::config::SessionSettings;
use someip_session::error::Result;
use std::time::Duration;
use tracing::warn;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = SessionSettings::load_from(&cli.config_dir)?;

    match cli.command {
        Commands::Config {
            applications,
            services,
            clients,
            routing,
        } => {
            init_logging_simple();
            let overrides =
                cli::overrides_from_args(&applications, &services, &clients, routing.as_deref());
            println!("{}", cli::render_config(&overrides)?);
        }
        Commands::Purge { pattern, dir } => {
            init_logging(&settings.logging);
            let report = cli::run_purge(&settings, pattern, dir)?;
            cli::print_purge_report(&report);
        }
        Commands::Demo {
            clients,
            rounds,
            interval_ms,
        } => {
            init_logging(&settings.logging);
            if let Err(problems) = settings.validate() {
                for problem in &problems {
                    warn!("Settings: {}", problem);
                }
            }
            let options = DemoOptions {
                clients,
                rounds,
                interval: Duration::from_millis(interval_ms),
            };
            let summary = cli::demo_with_settings(&settings, options).await?;
            println!("{summary}");
        }
    }

    Ok(())
}
