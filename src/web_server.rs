use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::ServerConfig;
use crate::routes::{self, ApiOptions};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_BIND_PORT: u16 = 9092;

pub fn build_server(
    server_config: ServerConfig,
    db_pool: SqlitePool,
    options: ApiOptions,
) -> std::io::Result<Server> {
    let db_pool = web::Data::new(db_pool);
    let options = web::Data::new(options);

    let address = server_config
        .bind_address
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let port = server_config.bind_port.unwrap_or(DEFAULT_BIND_PORT);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(options.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((address.as_str(), port))?
    .run();

    log::info!("Listening on {address}:{port}");
    Ok(server)
}
