mod auth;
mod config;
mod db;
mod entity;
mod error;
mod events;
mod registration;
mod response;
mod routes;
mod student;

use actix_web::{middleware, web, App, HttpServer};
use config::AppConfig;
use db::{bootstrap_admin, connect_db};
use log::{error, info};
use response::json_error_handler;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = AppConfig::from_env();
    let db = connect_db(&config).await.map_err(|e| {
        error!("database connection failed: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;
    if let Some(admin) = &config.admin_bootstrap {
        if let Err(e) = bootstrap_admin(&db, admin).await {
            error!("admin bootstrap failed: {}", e);
        }
    }
    let server_port = config.server_port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .configure(routes::config)
    })
    .bind(("0.0.0.0", server_port))?;
    info!("server started at http://0.0.0.0:{}", server_port);
    server.run().await
}
