
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{Config, ConfigError, EncoderConfig, RetrievalConfig, StorageMode};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Doc Chat Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Encoder Configuration").bold().yellow());
    eprintln!("Configure the page encoder service used for indexing and queries.");
    eprintln!();

    configure_encoder(&mut config.encoder)?;

    eprintln!();
    eprintln!("{}", style("Retrieval Configuration").bold().yellow());
    configure_retrieval(&mut config.retrieval)?;

    eprintln!();
    config.converter.enabled = Confirm::new()
        .with_prompt("Convert office documents to PDF before indexing?")
        .default(config.converter.enabled)
        .interact()?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_encoder_connection(&config.encoder) {
        eprintln!("{}", style("✓ Encoder connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to the encoder").yellow()
        );
        eprintln!("You can continue, but make sure the encoder is running before indexing.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Encoder Settings:").bold().yellow());
    eprintln!("  Protocol: {}", style(&config.encoder.protocol).cyan());
    eprintln!("  Host: {}", style(&config.encoder.host).cyan());
    eprintln!("  Port: {}", style(config.encoder.port).cyan());
    eprintln!("  Model: {}", style(&config.encoder.model).cyan());
    eprintln!(
        "  Timeout: {}s",
        style(config.encoder.timeout_seconds).cyan()
    );
    eprintln!(
        "  Retry Attempts: {}",
        style(config.encoder.retry_attempts).cyan()
    );

    eprintln!();
    match config.encoder_url() {
        Ok(url) => eprintln!("  Encoder URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Encoder URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Storage: {}",
        style(storage_label(config.retrieval.storage)).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Converter Settings:").bold().yellow());
    eprintln!("  Enabled: {}", style(config.converter.enabled).cyan());
    eprintln!("  Command: {}", style(&config.converter.command).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Data directory: {}", style(config_dir.display()).dim());

    Ok(())
}

fn storage_label(mode: StorageMode) -> &'static str {
    match mode {
        StorageMode::Disk => "disk (local embedding cache)",
        StorageMode::Native => "native (encoder index)",
    }
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config::with_base_dir(config_dir)
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_encoder(encoder: &mut EncoderConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == encoder.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Encoder protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Encoder host")
        .default(encoder.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = EncoderConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..EncoderConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Encoder port")
        .default(encoder.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Encoder model")
        .default(encoder.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let timeout_seconds: u64 = Input::new()
        .with_prompt("Request timeout in seconds")
        .default(encoder.timeout_seconds)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=3600).contains(input) {
                Ok(())
            } else {
                Err("Timeout must be between 1 and 3600 seconds")
            }
        })
        .interact_text()?;

    encoder.set_protocol(protocol)?;
    encoder.set_host(host)?;
    encoder.set_port(port)?;
    encoder.set_model(model)?;
    encoder.set_timeout_seconds(timeout_seconds)?;

    Ok(())
}

fn configure_retrieval(retrieval: &mut RetrievalConfig) -> Result<()> {
    let top_k: usize = Input::new()
        .with_prompt("Pages to retrieve per query")
        .default(retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=50).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 50")
            }
        })
        .interact_text()?;

    let modes = [StorageMode::Disk, StorageMode::Native];
    let labels: Vec<&str> = modes.iter().map(|m| storage_label(*m)).collect();
    let default_index = modes
        .iter()
        .position(|m| *m == retrieval.storage)
        .unwrap_or(0);

    let storage_index = Select::new()
        .with_prompt("Index storage")
        .default(default_index)
        .items(&labels)
        .interact()?;

    retrieval.set_top_k(top_k)?;
    retrieval.storage = modes[storage_index];

    Ok(())
}

fn test_encoder_connection(encoder: &EncoderConfig) -> bool {
    let url = format!(
        "{}://{}:{}/health",
        encoder.protocol, encoder.host, encoder.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
