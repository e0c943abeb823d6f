use std::{path::Path, sync::Arc};

use bff_signer::{
    adapters::{HttpClientAdapter, HttpHandler, identity_provider_from_config, router},
    config::{ServerConfig, ServerConfigValidator, loader::load_config},
    core::{SigningProxy, VersionResolver},
    ports::http_client::HttpClient,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{Result, eyre::Context};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the signing proxy (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: ServerConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json)
        .context("Failed to initialize tracing")?;
    tracing::info!("Loaded configuration from {config_path}");

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::debug!("aws-lc-rs crypto provider already installed: {:?}", e);
    }

    let versions = Arc::new(VersionResolver::new(&config.versions));
    tracing::info!(
        "Supported versions: {:?}, default: {}",
        versions.supported_versions(),
        versions.default_version()
    );

    let identity = identity_provider_from_config(&config.identity)
        .context("Failed to create identity provider")?;
    tracing::info!("Identity provider: {}", identity.name());

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let proxy = Arc::new(
        SigningProxy::new(&config, versions, identity, http_client)
            .context("Failed to create signing proxy")?,
    );
    let app = router(Arc::new(HttpHandler::new(proxy)));

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    tracing::info!(
        "Signing proxy listening on {}, forwarding to {}",
        listener.local_addr().context("Failed to get local addr")?,
        config.upstream.base_url
    );

    let on_signal = graceful_shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        on_signal.wait_for_shutdown_signal().await;
    });

    let drain_timeout = graceful_shutdown.drain_timeout();
    tokio::select! {
        result = server => {
            result.context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = async {
            graceful_shutdown.wait_for_shutdown_signal().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                "In-flight requests did not finish within {:?}, exiting",
                drain_timeout
            );
        }
    }

    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Upstream: {}", config.upstream.base_url);
            println!("   • Supported Versions: {}", config.versions.supported.join(", "));
            println!("   • Default Version: {}", config.versions.default);
            println!("   • Identity: {:?}", config.identity.kind);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure upstream.base_url starts with http:// or https://");
            println!("   • Set upstream.api_key and upstream.api_secret (or BFF_UPSTREAM__API_SECRET)");
            println!("   • Version tokens look like 'v1', 'v2', ...");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# bff-signer configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

[upstream]
base_url = "https://gateway.example.com"
api_key = "partner-api-key"
# Prefer BFF_UPSTREAM__API_SECRET in the environment over a secret on disk
api_secret = "change-me"
timeout_secs = 30

[versions]
supported = ["v1"]
default = "v1"

# Map a partner-facing version to the gateway version it is served by
# [versions.gateway_map]
# v2 = "v3"

# Outbound header names
[headers]
api_key = "x-api-key"
signature = "x-signature"
timestamp = "x-timestamp"
recv_window = "x-recv-window"
user_id = "x-user-id"

# Caller identity: anonymous | header | bearer | session
[identity]
kind = "anonymous"
failure_status = 500
# header = "x-partner-user"
# required = true

[logging]
level = "info"
json = true
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'bff-signer serve --config {config_path}' to start the proxy");
    Ok(())
}
