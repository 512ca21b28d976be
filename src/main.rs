mod api_client;
mod auth;
mod config;
mod data;
mod deadline;
mod error;
#[cfg(test)]
mod fakes;
mod http;
mod report;
mod runner;
mod server;
mod storage;
mod table_cleaner;
mod warehouse;
mod warehouse_loader;

use clap::Parser;
use config::Config;
use error::Error;
use log::{error, info};
use runner::Pipeline;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,
}

async fn serve(config: Config) -> Result<(), Error> {
    config.validate()?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|_| Error::InvalidConfig {
            message: format!("invalid listen address '{}'", config.listen_addr),
        })?;

    let pipeline = Arc::new(Pipeline::connect(&config).await?);

    info!("listening on {}", addr);
    warp::serve(server::routes(pipeline)).run(addr).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    if let Err(err) = serve(args.config).await {
        error!("failed to start report loader: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
