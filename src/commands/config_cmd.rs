use clap::{Args, Subcommand};

use super::OutputFormat;
use erp_bridge::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        let remote = &config.remote;
                        println!("remote:");
                        println!(
                            "  base_url: {}",
                            remote.base_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  organization_id: {}",
                            remote.organization_id.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  access_token: {}",
                            if remote.access_token.is_some() { "set" } else { "(not set)" }
                        );
                        println!(
                            "  token refresh: {}",
                            if remote.can_refresh() { "enabled" } else { "disabled" }
                        );
                        println!(
                            "  page_size: {}, max_retries: {}, backoff: {}-{} ms",
                            remote.page_size,
                            remote.max_retries,
                            remote.base_backoff_ms,
                            remote.max_backoff_ms
                        );
                        println!();

                        println!("server:");
                        println!("  port: {}", config.server.port);
                        println!("  api_keys: {}", config.server.api_keys.len());
                        println!(
                            "  scheduler_tick_secs: {}",
                            config.server.scheduler_tick_secs
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
