use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use mxo_server::{GameServer, ServerConfig};

/// The Matrix Online dedicated game server.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the JSON configuration file; defaults apply without one.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("note: set RUST_LOG=info to see server logs");
    }

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("cannot load config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };

    info!(
        "starting game server for world {:?} on {}",
        config.world.world_name, config.listen.game
    );
    let mut server = match GameServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    server.run();
    ExitCode::SUCCESS
}
