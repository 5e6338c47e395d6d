use anyhow::Result;
use clap::{value_parser, Arg, Command};
use sharenet_directory::{tasks, DirectoryConfig, DirectoryService};
use sharenet_notify::NotificationHub;
use sharenet_registry::{FileRegistry, PeerRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("sharenet-directory")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sharenet directory (super-peer) service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Interface to listen on"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("HTTP port"),
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

    let hub = Arc::new(NotificationHub::new(config.observer_buffer));
    let service = Arc::new(DirectoryService::new(
        PeerRegistry::new(),
        FileRegistry::new(),
        hub,
        config.search_limit,
    ));

    info!("Starting Sharenet directory v{}", env!("CARGO_PKG_VERSION"));
    let _tasks = tasks::spawn_all(service.clone(), &config);

    sharenet_directory::start_server(service, &config.bind_addr()).await
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<DirectoryConfig> {
    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = DirectoryConfig::load(config_path.map(PathBuf::as_path))?;

    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
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

fn init_logging(config: &DirectoryConfig) {
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
