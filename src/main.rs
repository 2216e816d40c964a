use std::sync::Arc;

use log::{error, info};

use campus_chat::config::Config;
use campus_chat::registry::ConnectionRegistry;
use campus_chat::server::{self, Server};
use campus_chat::store::{InMemoryDirectory, InMemoryStore};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let users = if config.users.is_empty() {
        info!("No user list configured, accepting any recipient id");
        InMemoryDirectory::open()
    } else {
        info!("Loaded {} user(s)", config.users.len());
        InMemoryDirectory::new(config.users.clone())
    };

    let registry = ConnectionRegistry::new(config.keep_alive);
    let server = Server::new(registry, Arc::new(InMemoryStore::new()), Arc::new(users));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server::serve(server, &config, shutdown).await;
    info!("Server stopped");
}
