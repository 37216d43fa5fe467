mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, HeaderValue, Method};
use config::Config;
use dotenv::dotenv;
use routes::create_router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    db::{db::DBClient, memorydb::MemoryDB, store::ReferralExt},
    middleware::USER_ID_HEADER,
    service::{lifecycle_service::LifecycleService, link_service::LinkService},
    utils::clock::{Clock, SystemClock},
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub lifecycle_service: Arc<LifecycleService>,
    pub link_service: Arc<LinkService>,
}

impl AppState {
    pub fn new(store: Arc<dyn ReferralExt>, clock: Arc<dyn Clock>, config: Config) -> Self {
        let lifecycle_service = Arc::new(LifecycleService::new(store.clone(), clock.clone()));
        let link_service = Arc::new(LinkService::new(
            store,
            clock,
            lifecycle_service.clone(),
            config.link_base_url.clone(),
            config.campaign_id.clone(),
        ));

        Self {
            env: config,
            lifecycle_service,
            link_service,
        }
    }
}

async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn ReferralExt>> {
    let Some(database_url) = config.database_url.as_deref() else {
        println!("ℹ️  DATABASE_URL not set - using the in-memory store");
        return Ok(Arc::new(MemoryDB::new()));
    };

    let db_client = DBClient::connect(database_url, config).await?;
    println!("📊 Connection Pool: max {} connections", config.db_max_connections);

    if config.apply_migrations {
        db_client.migrate().await?;
    }

    Ok(Arc::new(db_client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::init();

    tracing_subscriber::fmt()
        .with_max_level(config.level_filter())
        .init();

    let store = match connect_store(&config).await {
        Ok(store) => store,
        Err(err) => {
            println!("🔥 Failed to initialise the store: {:?}", err);
            std::process::exit(1);
        }
    };

    let app_state = Arc::new(AppState::new(store, Arc::new(SystemClock), config.clone()));

    if config.seed_on_startup && app_state.lifecycle_service.seed().await? {
        println!("🌱 Seed data loaded");
    }

    let allowed_origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([ACCEPT, CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH]);

    let app = create_router(app_state).layer(cors);

    println!("🚀 Server is running on http://localhost:{}", config.port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
