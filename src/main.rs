use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use storypals::configuration::Config;
use storypals::storage::Database;
use storypals::web_interface::{AppState, WebServer};

#[derive(Parser)]
#[command(name = "storypals")]
#[command(version)]
#[command(about = "Storytelling companion backend for children")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(env = "STORYPALS_CONFIG")]
    config_file: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let config = match Config::from_file(Path::new(args.config_file.as_str())) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {:?}", e);
            std::process::exit(1);
        }
    };

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Unable to open database: {:?}", e);
            std::process::exit(1);
        }
    };
    info!("Database ready at {}", config.database_path.display());

    match db.purge_expired_tokens().await {
        Ok(purged) if purged > 0 => info!("Purged {} expired auth tokens", purged),
        Ok(_) => {}
        Err(e) => error!("Token purge failed: {:?}", e),
    }

    let addr: SocketAddr = match format!("{}:{}", config.bind_address, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {:?}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(&config, db));
    let server = WebServer::new(state);
    server.start(addr).await;
}
