//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and routes commands to the appropriate handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use secret_coalescer::config::{CredentialConfig, EndpointConfig};
use secret_coalescer::providers::{ProviderRouter, DEFAULT_CREDENTIAL};
use secret_coalescer::{BatchResult, Config, MultiSecretFetcher, SecretDescriptor};

#[derive(Parser)]
#[command(name = "scf")]
#[command(about = "Fetch secrets from Vault and AWS Secrets Manager, each distinct source once", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SCF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Vault address for the `vault` endpoint (overrides config file)
    #[arg(long, env = "VAULT_ADDR")]
    pub vault_addr: Option<String>,

    /// Vault token for the `default` credential (overrides config file)
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "scf-config.toml")]
        output: PathBuf,
    },

    /// Fetch a batch of secrets (endpoint:name[@credential] ...)
    Fetch {
        /// Secrets to fetch, e.g. prod-vault:myapp/db#password@app
        #[arg(required = true)]
        descriptors: Vec<SecretDescriptor>,

        /// Print secret values instead of redacting them
        #[arg(long)]
        reveal: bool,

        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured endpoints
    Endpoints,
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    // Handle init command separately as it doesn't need providers
    if let Commands::Init { output } = cli.command {
        Config::create_sample(&output)
            .with_context(|| format!("Failed to create sample config at {:?}", output))?;
        info!("Sample configuration created at {:?}", output);
        return Ok(());
    }

    let config = load_config(cli.config, cli.vault_addr, cli.vault_token)?;
    let router = ProviderRouter::from_config(&config).context("Failed to create providers")?;

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Endpoints => {
            if config.endpoints.is_empty() {
                println!("No endpoints configured");
            } else {
                println!("Configured endpoints:");
                for (key, provider_type) in router.endpoints() {
                    println!("  - {} ({})", key, provider_type);
                }
            }
        }

        Commands::Fetch {
            descriptors,
            reveal,
            json,
        } => {
            let fetcher = MultiSecretFetcher::new(Arc::new(router), config.fetcher_options());
            let result = fetcher.fetch_all(&descriptors).await;

            if reveal && !json {
                eprintln!("WARNING: Secret values will be displayed. Ensure this output is secured.");
            }
            if json {
                println!("{}", render_json(&result, reveal));
            } else {
                for line in render_lines(&result, reveal) {
                    println!("{}", line);
                }
            }

            if !result.is_all_ok() {
                anyhow::bail!(
                    "{} of {} secret(s) could not be fetched",
                    result.failures(),
                    result.len()
                );
            }
        }
    }

    Ok(())
}

/// Load config from file or environment, then apply CLI overrides
fn load_config(
    path: Option<PathBuf>,
    vault_addr: Option<String>,
    vault_token: Option<String>,
) -> Result<Config> {
    let mut config = match path {
        Some(ref config_path) => Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?,
        None if vault_addr.is_some() => Config::default(),
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    if let Some(address) = vault_addr {
        let mount = match config.endpoints.get("vault") {
            Some(EndpointConfig::Vault { mount, .. }) => mount.clone(),
            _ => std::env::var("VAULT_MOUNT").unwrap_or_else(|_| "secret".to_string()),
        };
        config
            .endpoints
            .insert("vault".to_string(), EndpointConfig::Vault { address, mount });
    }
    if let Some(token) = vault_token {
        config
            .credentials
            .entry(DEFAULT_CREDENTIAL.to_string())
            .or_insert_with(CredentialConfig::default)
            .token = Some(token);
    }

    config.validate()?;
    Ok(config)
}

fn render_lines(result: &BatchResult, reveal: bool) -> Vec<String> {
    result
        .iter()
        .map(|(descriptor, outcome)| match outcome {
            Ok(value) if reveal => format!(
                "OK    {} = {}",
                descriptor,
                value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("<{} bytes of binary data>", value.len()))
            ),
            Ok(value) => format!("OK    {} ({} bytes)", descriptor, value.len()),
            Err(err) => format!("ERROR {} [{}] {}", descriptor, err.kind(), err),
        })
        .collect()
}

fn render_json(result: &BatchResult, reveal: bool) -> serde_json::Value {
    let entries: Vec<_> = result
        .iter()
        .map(|(descriptor, outcome)| match outcome {
            Ok(value) => {
                let mut entry = json!({
                    "descriptor": descriptor.to_string(),
                    "ok": true,
                    "bytes": value.len(),
                });
                if reveal {
                    // Binary values have no faithful JSON string form
                    match value.as_str() {
                        Some(text) => entry["value"] = json!(text),
                        None => {
                            entry["value"] = serde_json::Value::Null;
                            entry["binary"] = json!(true);
                        }
                    }
                }
                entry
            }
            Err(err) => json!({
                "descriptor": descriptor.to_string(),
                "ok": false,
                "kind": err.kind().to_string(),
                "error": err.to_string(),
            }),
        })
        .collect();

    json!(entries)
}
