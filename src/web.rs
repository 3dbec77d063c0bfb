#![cfg(not(tarpaulin_include))]

use log::info;
use sheetmerge::Config;
use sheetmerge::app;
use std::env;

/// Main entry point for the web application
///
/// The configuration file is taken from the first command line argument,
/// then from `SHEETMERGE_CONFIG`; without either the defaults are used.
/// Log output is controlled by `RUST_LOG` (default `info`).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args().nth(1).or_else(|| env::var("SHEETMERGE_CONFIG").ok());

    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Config::load(&path)?
        }
        None => Config::default(),
    };

    app::run(config).await
}
