//! Minimal standalone SOCKS5 proxy using the library directly, without the
//! `socks5rs` binary's CLI/env-var configuration layer.

use socks5rs::config::{Config, StaticAuthenticator};
use socks5rs::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config {
        port: 1080,
        authenticator: Box::new(StaticAuthenticator::single("admin", "admin")),
    };

    let server = Server::bind(config).await?;
    println!("SOCKS5 proxy listening on {}", server.local_addr()?);
    server.run().await?;

    Ok(())
}
