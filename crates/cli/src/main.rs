use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "line-bridge")]
#[command(about = "OpenClaw LINE bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the bridge: HTTP ingress on one side, OpenClaw Gateway WebSocket on the other.
    Run {
        /// Config file path (default: LINE_BRIDGE_CONFIG_PATH or ~/.line-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP listen port (default from config/BRIDGE_PORT or 5001)
        #[arg(long, short)]
        port: Option<u16>,

        /// Gateway WebSocket URL (default from config/OPENCLAW_GATEWAY_URL or ws://127.0.0.1:18789)
        #[arg(long, short)]
        gateway: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("line-bridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run {
            config,
            port,
            gateway,
        }) => {
            if let Err(e) = run_bridge(config, port, gateway).await {
                log::error!("bridge failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_bridge(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    gateway: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.http.port = p;
    }
    if let Some(url) = gateway {
        config.gateway.url = url;
    }

    // default filter follows the admin UI's log_level; RUST_LOG still wins
    let default_filter = lib::config::log_level_filter(&config.webhook.log_level);
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    )
    .init();

    log::info!("OpenClaw LINE bridge starting");
    log::info!("gateway: {}", lib::config::resolve_gateway_url(&config));
    log::info!(
        "listen: {}:{}",
        lib::config::resolve_bridge_host(&config),
        lib::config::resolve_bridge_port(&config)
    );

    lib::server::run_bridge(config).await
}
