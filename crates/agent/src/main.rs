use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use sharenet_agent::{AgentConfig, PeerAgent};
use sharenet_notify::NotificationHub;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("sharenet-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sharenet peer agent")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("HTTP port (also PEER_PORT)"),
        )
        .arg(
            Arg::new("directory")
                .long("directory")
                .value_name("HOST:PORT")
                .help("Directory service address"),
        )
        .arg(
            Arg::new("shared-dir")
                .short('d')
                .long("shared-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory whose files are shared"),
        )
        .arg(
            Arg::new("advertise")
                .long("advertise")
                .value_name("ADDRESS")
                .help("Address other peers use to reach this agent"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Override the log format"),
        )
        .get_matches();

    let config = load_config_with_overrides(&matches)?;
    init_logging(&config);

    info!("Starting Sharenet agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Shared directory: {}", config.shared_directory.display());
    info!("Directory service: {}", config.directory_url());

    let bind_addr = config.bind_addr();
    let hub = Arc::new(NotificationHub::new(config.observer_buffer));
    let agent = Arc::new(PeerAgent::new(config, hub).context("failed to build agent")?);
    agent
        .initialize()
        .await
        .context("failed to index shared directory")?;

    let _tasks = agent.spawn_background();
    sharenet_agent::start_server(agent, &bind_addr).await
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AgentConfig> {
    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = AgentConfig::load(config_path.map(PathBuf::as_path))?;

    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(directory) = matches.get_one::<String>("directory") {
        config.directory_address = directory.clone();
    }
    if let Some(shared_dir) = matches.get_one::<PathBuf>("shared-dir") {
        config.shared_directory = shared_dir.clone();
    }
    if let Some(advertise) = matches.get_one::<String>("advertise") {
        config.advertise_address = advertise.clone();
    }
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &AgentConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
