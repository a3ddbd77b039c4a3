use axum::routing::get;
use axum::Router;
use lootrush_server::config::ServerConfig;
use lootrush_server::game_loop::{run_game_loop, GameBroadcast, GameCommand};
use lootrush_server::ws::{ws_handler, AppState};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid server configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }
    let game_config = match config.load_game_config() {
        Ok(game_config) => game_config,
        Err(e) => {
            eprintln!("Invalid game configuration: {}", e);
            std::process::exit(1);
        }
    };

    let listen_addr = config.listen_addr.clone();

    let (game_tx, game_rx) = mpsc::channel::<GameCommand>(256);
    let (broadcast_tx, _) = broadcast::channel::<GameBroadcast>(1024);

    // Spawn game loop
    let bc_tx = broadcast_tx.clone();
    tokio::spawn(async move {
        run_game_loop(game_rx, bc_tx, config, game_config).await;
    });

    // Axum app
    let app_state = AppState {
        game_tx,
        broadcast_tx,
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    tracing::info!("Starting loot rush server on {}", listen_addr);
    println!("Loot rush server listening on {}", listen_addr);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
