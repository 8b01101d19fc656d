use log::info;
use threadline_board::{BoardServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    info!(
        "Starting Threadline on {} (max {} messages, {} words)",
        config.bind_addr, config.board.max_messages, config.board.max_words
    );

    let server = BoardServer::new(config)?;
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
