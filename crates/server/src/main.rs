mod authority;
mod config;
mod error;
mod persistence;
mod websocket;

use std::sync::Arc;

use actix_web::{web, App, HttpServer, Responder};
use config::Config;
use persistence::{InMemorySessionStore, PostgresSessionStore, SessionStore};

async fn health() -> impl Responder {
    web::Json(serde_json::json!({
        "status": "healthy",
        "service": "keyboardia-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health));
    cfg.configure(websocket::config);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();
    log::info!("starting keyboardia-server on {}", config.bind_addr);

    let store: Arc<dyn SessionStore> = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            log::info!("connected to database");
            Arc::new(PostgresSessionStore::new(pool))
        }
        Err(e) => {
            log::warn!("database unavailable ({e}); falling back to an in-memory session store");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let registry = Arc::new(authority::SessionRegistry::with_save_policy(
        store,
        config.save_debounce,
        config.save_max_delay,
    ));
    let _background_tick = registry.clone().spawn_background_tick(config.snapshot_interval);
    let bind_addr = config.bind_addr.clone();

    HttpServer::new(move || App::new().app_data(web::Data::new(registry.clone())).configure(config_routes))
        .bind(&bind_addr)?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().route("/health", web::get().to(health))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
