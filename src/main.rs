use tokio::net::TcpListener;
use tracing::info;
use tracker::config::AppConfig;
use tracker::db::{init_pool, run_migrations};
use tracker::error::AppError;
use tracker::logging::init_logging;
use tracker::routes::create_router;
use tracker::services::{routing::router_from_config, storage::StorageService, store::TreeStore};
use tracker::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    let store = TreeStore::open(StorageService::new(db.clone())).await?;
    let router = router_from_config(&config);
    match &config.routing_url {
        Some(url) => info!("ETA via router at {url}"),
        None => info!(
            "ETA via straight-line estimate at {} km/h",
            config.eta_average_speed_kmh
        ),
    }

    let state = AppState::new(config.clone(), store, router);
    state.dispatcher.spawn();

    let app = create_router(state.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
