//! Device relay server demo
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                 # binds to 0.0.0.0:8080
//!   cargo run --example relay_server 127.0.0.1:9000  # binds to 127.0.0.1:9000
//!
//! Endpoints (websocket upgrades):
//!   /provider/ws?id=<provider>&user=<name>   provider control channel
//!   /provider/imgStream?udid=<udid>          provider video frames
//!   /device/imgStream?udid=<udid>&rid=<rid>  viewer video
//!   /device/notices?udid=<udid>              viewer notices

use std::net::SocketAddr;

use devrelay::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let bind_addr: SocketAddr = match args.get(1) {
        Some(addr) => addr.parse()?,
        None => "0.0.0.0:8080".parse().unwrap(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devrelay=debug".parse()?),
        )
        .init();

    let config = ServerConfig::default().bind(bind_addr);
    let server = RelayServer::new(config);

    println!("Starting device relay server on {}", server.bind_addr());
    println!();
    println!("Providers connect their control socket to ws://<host>/provider/ws?id=1");
    println!("Viewers open ws://<host>/device/imgStream?udid=<udid>&rid=<rid>");
    println!();

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Server stopped");
    Ok(())
}
