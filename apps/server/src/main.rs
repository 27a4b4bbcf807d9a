#![warn(clippy::all, clippy::pedantic)]

use actix_web::middleware::{NormalizePath, TrailingSlash};
use actix_web::{App, HttpServer, web};
use storage::Storage;
use tracing::info;

mod auth;
mod config;
mod error;
mod routes;
mod state;

use config::ServerConfig;
use error::AppError;
use logger::init_tracing;
use state::AppState;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    let storage = Storage::open(&config.database_path).await?;
    run_server(&config, storage).await
}

async fn run_server(config: &ServerConfig, storage: Storage) -> Result<(), AppError> {
    let state = web::Data::new(AppState::new(storage, config));

    info!(addr = %config.bind, "listening");
    HttpServer::new(move || {
        App::new()
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .app_data(state.clone())
            .configure(routes::routes)
    })
    .bind(config.bind)?
    .run()
    .await?;

    Ok(())
}
