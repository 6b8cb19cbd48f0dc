use actix_web::{middleware as actix_middleware, App, HttpServer};
use mongodb::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use auth_server::config::{AuthConfig, StoreBackend, UsersBackend};
use auth_server::store::{connect_redis_pool, InMemoryTokenStore, RedisTokenStore, TokenStore};
use auth_server::users::{InMemoryUserService, MongoUserService, UserService};
use auth_server::AppServices;

fn exit_with(message: String) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

async fn build_token_store(config: &AuthConfig) -> Arc<dyn TokenStore> {
    match config.store.backend {
        StoreBackend::Redis => {
            log::info!("Connecting to Redis at {}...", config.store.redis_url);
            let pool = connect_redis_pool(
                &config.store.redis_url,
                config.store.pool_size,
                Duration::from_millis(config.store.timeout_ms),
            )
            .await
            .unwrap_or_else(|e| exit_with(format!("Failed to connect to Redis: {}", e)));
            Arc::new(RedisTokenStore::new(pool))
        }
        StoreBackend::Memory => {
            log::warn!("Using in-memory token store; records are lost on restart");
            let store = InMemoryTokenStore::new();

            let store_clone = store.clone();
            let every = Duration::from_secs(config.store.cleanup_interval_secs.max(1));
            tokio::spawn(async move {
                let mut interval = time::interval(every);
                loop {
                    interval.tick().await;
                    let removed = store_clone.cleanup_expired();
                    if removed > 0 {
                        log::info!("Background cleanup: removed {} expired token records", removed);
                    }
                }
            });

            Arc::new(store)
        }
    }
}

async fn build_user_service(config: &AuthConfig) -> Arc<dyn UserService> {
    match config.users.backend {
        UsersBackend::Mongodb => {
            log::info!("Connecting to MongoDB at {}...", config.users.mongodb_uri);
            let client = Client::with_uri_str(&config.users.mongodb_uri)
                .await
                .unwrap_or_else(|e| exit_with(format!("Failed to connect to MongoDB: {}", e)));

            let users = MongoUserService::new(client, &config.users.database);
            log::info!("Initializing database indexes...");
            users
                .init_indexes()
                .await
                .unwrap_or_else(|e| exit_with(format!("Failed to initialize indexes: {}", e)));
            Arc::new(users)
        }
        UsersBackend::Memory => {
            log::warn!("Using in-memory user service");
            Arc::new(InMemoryUserService::new())
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env from the working directory, falling back to server/
    if dotenvy::dotenv().is_err() {
        dotenvy::from_filename("server/.env").ok();
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting auth server...");

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "server/config/auth.toml".to_string());

    let config = AuthConfig::load_from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from '{}': {}", config_path, e);
        eprintln!("Hint: Set CONFIG_PATH environment variable or run from the repository root");
        std::process::exit(1);
    });

    let store = build_token_store(&config).await;
    let users = build_user_service(&config).await;

    let services = AppServices::new(&config, store, users)
        .unwrap_or_else(|e| exit_with(format!("Failed to build services: {}", e)));

    log::info!(
        "Token lifetimes: access {}s, refresh {}s, authorization code {}s",
        config.tokens.access_ttl_secs,
        config.tokens.refresh_ttl_secs,
        config.tokens.auth_code_ttl_secs
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    log::info!("Starting HTTP server at {}:{}...", host, port);

    // actix installs SIGINT/SIGTERM handlers and drains workers for the grace period
    HttpServer::new(move || {
        let services = services.clone();
        App::new()
            .wrap(actix_middleware::Logger::default())
            .configure(move |cfg| services.register(cfg))
    })
    .shutdown_timeout(config.shutdown_grace().as_secs())
    .bind((host, port))?
    .run()
    .await?;

    log::info!("Auth server stopped");
    Ok(())
}
