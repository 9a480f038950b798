use clap::Parser;
use dingtalk_core::{HostKind, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./dingtalk.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    debug: bool,

    /// App dev server to forward to, e.g. http://localhost:5173
    #[arg(short, long)]
    upstream: Option<String>,

    /// vite, webpack, rspack or nuxt
    #[arg(long)]
    host: Option<HostKind>,

    /// Page DingTalk should open
    #[arg(long)]
    target_url: Option<String>,

    #[arg(long)]
    corp_id: Option<String>,

    /// Cookie to echo back as a script-readable cookie (repeatable)
    #[arg(long = "debug-cookie")]
    debug_cookies: Vec<String>,

    /// Disable the chii remote-debugging bridge
    #[arg(long)]
    no_chii: bool,

    /// Load the chii target script in embedded mode
    #[arg(long)]
    embedded: bool,

    /// Command used to launch chii
    #[arg(long)]
    chii_command: Option<String>,

    #[arg(long)]
    allow_remote_access: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    // Logging is not up yet, so configuration errors go straight to stderr
    let mut config = match dingtalk_core::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream = Some(upstream);
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(target_url) = cli.target_url {
        config.target_url = Some(target_url);
    }
    if let Some(corp_id) = cli.corp_id {
        config.corp_id = Some(corp_id);
    }
    if !cli.debug_cookies.is_empty() {
        config.debug_cookies = cli.debug_cookies;
    }
    if let Some(command) = cli.chii_command {
        config.chii.command = command;
    }
    config.debug |= cli.debug;
    config.chii.embedded |= cli.embedded;
    config.allow_remote_access |= cli.allow_remote_access;
    if cli.no_chii {
        config.chii.enable = false;
    }

    let filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if config.debug {
        debug!("Debug logging enabled");
        debug!("Config: {:?}", config);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let listener = match dingtalk_core::bind_http_server(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) =
        dingtalk_core::serve_http_server_with_shutdown(config, listener, shutdown).await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
