//! distsession CLI - operator tooling for the distributable session store
//!
//! Generates session identifiers, encodes and decodes attribute payloads in the
//! tagged wire format, and validates store configuration files.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use distsession_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success,
    AttributeValue, IdentifierFactory, LoggingConfig, SessionStoreConfig,
    DEFAULT_SESSION_ID_MIN_LENGTH,
};
use distsession_marshal::TagRegistry;
use distsession_store::SessionIdentifierFactory;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "distsession")]
#[command(about = "Operator tooling for the distributable session store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate session identifiers
    GenerateIds {
        /// Number of identifiers
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Identifier length in hex characters
        #[arg(short, long, default_value_t = DEFAULT_SESSION_ID_MIN_LENGTH + 2)]
        length: usize,
    },

    /// Encode an attribute value, printing the payload as hex
    Encode {
        /// Value as JSON, e.g. '{"Int": 3}' or '{"String": "alice"}'
        #[arg(long)]
        json: String,
    },

    /// Decode a hex payload, printing the value as JSON
    Decode {
        #[arg(long)]
        hex: String,
    },

    /// Load and validate a store configuration file
    CheckConfig {
        /// Defaults to distsession/config.toml in the user config directory
        path: Option<PathBuf>,

        /// Write a default configuration to the path first
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Starting distsession CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::GenerateIds { count, length } => handle_generate_ids(count, length),
        Commands::Encode { json } => handle_encode(&json),
        Commands::Decode { hex } => handle_decode(&hex),
        Commands::CheckConfig { path, init } => handle_check_config(path, init).await,
    }
}

fn handle_generate_ids(count: usize, length: usize) -> anyhow::Result<()> {
    if length <= DEFAULT_SESSION_ID_MIN_LENGTH {
        bail!(
            "Identifier length {} must exceed {}",
            length,
            DEFAULT_SESSION_ID_MIN_LENGTH
        );
    }

    let factory = SessionIdentifierFactory::new(length);
    for _ in 0..count {
        println!("{}", factory.create_identifier());
    }
    debug!(count, length = factory.identifier_length(), "Generated identifiers");
    Ok(())
}

fn handle_encode(json: &str) -> anyhow::Result<()> {
    let value: AttributeValue =
        serde_json::from_str(json).context("Value is not a valid attribute value")?;
    let registry = TagRegistry::standard()?;
    let bytes = registry.encode(&value)?;
    println!("{}", hex::encode(bytes));
    Ok(())
}

fn handle_decode(payload: &str) -> anyhow::Result<()> {
    let bytes = hex::decode(payload.trim()).context("Payload is not valid hex")?;
    let registry = TagRegistry::standard()?;
    let value = registry.decode(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .context("Could not determine a configuration directory")?;
    Ok(dir.join("distsession").join("config.toml"))
}

async fn handle_check_config(path: Option<PathBuf>, init: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    log_operation_start!("check_config", path = %path.display());

    if init {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        SessionStoreConfig::default().save_to_file(&path)?;
        info!("Wrote default configuration to {}", path.display());
    }

    let config = SessionStoreConfig::from_file(&path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log_operation_error!("check_config", e);
            return Err(e.into());
        }
    };

    println!("Configuration {} is valid", path.display());
    println!("  deployment name:     {}", config.deployment_name);
    println!("  granularity:         {:?}", config.granularity);
    println!("  marshaller:          {:?}", config.marshaller);
    println!(
        "  max active sessions: {}",
        config
            .max_active_sessions
            .map_or_else(|| "unlimited".to_string(), |max| max.to_string())
    );
    println!(
        "  idle timeout:        {}",
        config
            .idle_timeout_ms
            .map_or_else(|| "none".to_string(), |ms| format!("{}ms", ms))
    );
    println!("  identifier length:   {}", config.session_id_length);
    println!("  session timeout:     {}ms", config.default_session_timeout_ms);
    println!("  close timeout:       {}ms", config.close_timeout_ms);

    log_operation_success!("check_config");
    Ok(())
}
