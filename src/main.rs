use clap::Parser;
use socks5rs::config::{Cli, Config};
use socks5rs::server::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbosity = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| verbosity.into()))
        .init();

    let config = Config::from_cli(cli);
    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
