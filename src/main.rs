mod config;
mod detect;
mod models;
mod routes;
mod state;
mod upload;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use candle_core::Device;

use config::AppConfig;
use routes::configure_routes;
use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = AppConfig::from_env();

    for modality in ["text", "audio", "image", "video"] {
        std::fs::create_dir_all(config.upload_root.join(modality))?;
    }

    if let Err(e) = ffmpeg_next::init() {
        log::error!("Failed to initialize FFmpeg: {}", e);
        return Err(std::io::Error::other(format!("FFmpeg init failed: {}", e)));
    }

    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    log::info!("Using device: {:?}", device);

    let state = web::Data::new(AppState::new(device, config.clone()));

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
