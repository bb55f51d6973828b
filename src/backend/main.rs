/**
 * chatshard Server Entry Point
 *
 * Loads `.env`, installs tracing, loads the configuration and serves the
 * router until Ctrl-C, then stops the shard pool.
 */

#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::net::SocketAddr;

    use chatshard::backend::server::{create_app, load_config};
    use tracing_subscriber::EnvFilter;

    dotenv::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatshard=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!("[Server] Starting chatshard");
    let config = load_config()?;
    let bind_addr = config.server.bind_addr.clone();

    let (app, state) = create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("[Server] Listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("[Server] Failed to listen for Ctrl-C: {}", err);
            }
            tracing::info!("[Server] Shutdown requested");
        })
        .await?;

    state.pool.shutdown();
    tracing::info!("[Server] Stopped");
    Ok(())
}

#[cfg(not(feature = "ssr"))]
fn main() {
    eprintln!("Server requires the 'ssr' feature to be enabled.");
    eprintln!("Run with: cargo run --bin chatshard-server --features ssr");
    std::process::exit(1);
}
