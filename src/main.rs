use claude_gateway::config::{config_search_paths, EnvOverrides, FileConfig};
use claude_gateway::logging::redact_secret;
use claude_gateway::providers::ProviderPreset;
use claude_gateway::{build_router, AppState, GatewayConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-gateway",
    about = "Serve Anthropic Messages and OpenAI Responses clients from an OpenAI-compatible upstream",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config and LISTEN_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and LISTEN_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream preset name, used when the config names none
    #[arg(long)]
    provider: Option<String>,

    /// Journal file path
    #[arg(long, default_value = "claude-gateway.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Print the built-in upstream presets and exit
    #[arg(long)]
    list_providers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    if cli.list_providers {
        for preset in ProviderPreset::all() {
            println!(
                "  {:<12} {:<40} ${}",
                preset.name, preset.base_url, preset.default_api_key_env
            );
        }
        return Ok(());
    }

    let mut file = FileConfig::find_and_load(cli.config.as_deref())?;
    if file.upstream.provider.is_none() {
        if let Some(ref provider) = cli.provider {
            if ProviderPreset::from_name(provider).is_none() {
                anyhow::bail!("Unknown provider: {provider}");
            }
            file.upstream.provider = Some(provider.clone());
        }
    }

    let mut config = GatewayConfig::resolve(&file, &EnvOverrides::from_env());
    if let Some(host) = cli.host {
        config.listen_host = host;
    }
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    if let Err(e) = logger.compact() {
        warn!(error = %e, "could not compact journal");
    }

    info!("claude-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.upstream_base_url);
    info!("  API key:   {}", redact_secret(&config.upstream_api_key));
    info!(
        "  Local keys: {}",
        if config.local_api_keys.is_empty() {
            "none (open access)".to_string()
        } else {
            format!("{} configured", config.local_api_keys.len())
        }
    );
    info!("  Models:    {} allowed", config.allowed_models.len());
    info!("  Timeout:   {} ms", config.request_timeout_ms);
    info!(
        "  Streaming: {}",
        if config.disable_streaming {
            format!("disabled ({:?})", config.streaming_policy)
        } else {
            "enabled".to_string()
        }
    );
    info!("  Log file:  {}", cli.log_file.display());

    if !config.is_configured() {
        warn!("Upstream base URL or API key is missing; proxy routes will answer 503");
    }

    logger.info(
        "startup",
        format!(
            "Starting claude-gateway upstream={} listen={}:{}",
            config.upstream_base_url, config.listen_host, config.listen_port
        ),
    );

    // Per-request deadlines come from request_timeout_ms, streams stay open.
    let client = reqwest::Client::builder().build()?;

    let bind_addr = format!("{}:{}", config.listen_host, config.listen_port);
    let state = Arc::new(AppState {
        config,
        client,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://{} claude", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
