use std::error::Error;

use stream_relay::{Config, ProxyServer, WebRelay};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let target = std::env::args()
        .nth(1)
        .ok_or("usage: relay <upstream-url>")?;
    let config = Config::default();
    let relay = ProxyServer::bind(config.clone(), WebRelay::new(&config, None)?).await?;
    relay.start();
    match relay.private_address(&target) {
        Some(address) => println!("{}", address),
        None => eprintln!("unable to build a relay address for {}", target),
    }
    tokio::signal::ctrl_c().await?;
    relay.stop();
    Ok(())
}
