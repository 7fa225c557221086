use clap::Parser;
use quieteye_relay::application::{
    config::{Cli, Mode},
    startup,
};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.mode {
        Mode::Gateway(args) => startup::run_gateway(args).await,
        Mode::Edge(args) => startup::run_edge(args).await,
    };

    if let Err(error) = result {
        error!("quieteye-relay failed: {error}");
        std::process::exit(1);
    }
}
