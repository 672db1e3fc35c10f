use clap::{Args, Subcommand};

use replisync::config::Config;

use super::OutputFormat;

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
                        println!("{}", serde_json::to_string_pretty(&redacted(config))?);
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

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("actor: {}", config.actor.value);
                        println!("  source: {}", config.actor.source);
                        println!();

                        println!(
                            "sync.server_url: {}",
                            config.sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "sync.api_key: {}",
                            if config.sync.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!("sync.items_per_request: {}", config.sync.items_per_request);
                        println!("sync.correction_retries: {}", config.sync.correction_retries);
                        match config.sync.timeout_secs {
                            Some(secs) => println!("sync.timeout_secs: {}", secs),
                            None => println!("sync.timeout_secs: (none)"),
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Copy of the config safe to print: the API key is masked.
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    if shown.sync.api_key.is_some() {
        shown.sync.api_key = Some("********".to_string());
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;
    use replisync::config::{ConfigSource, ConfigValue, SyncConfig};
    use std::path::PathBuf;

    #[test]
    fn test_redacted_masks_api_key() {
        let config = Config {
            database_path: ConfigValue::new(PathBuf::from("/tmp/r.db"), ConfigSource::Default),
            actor: ConfigValue::new("john".to_string(), ConfigSource::File),
            config_file: None,
            sync: SyncConfig {
                api_key: Some("very-secret".to_string()),
                ..SyncConfig::default()
            },
        };

        let json = serde_json::to_string(&redacted(&config)).unwrap();
        assert!(!json.contains("very-secret"));
        assert!(json.contains("\"source\":\"file\""));
    }
}
