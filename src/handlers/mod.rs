pub mod artifacts;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod stages;

pub use artifacts::*;
pub use config::*;
pub use models::*;
pub use pipeline::*;
pub use stages::*;

use crate::health;
use actix_web::web;

/// Register every API route. Mounted under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .route("/config", web::get().to(get_config))
        .route("/config", web::put().to(update_config))
        .route("/translate-audio", web::post().to(translate_audio))
        .route("/translate-audio/upload", web::post().to(translate_audio_upload))
        .route("/transcribe", web::post().to(transcribe))
        .route("/translate", web::post().to(translate))
        .route("/tts", web::post().to(synthesize))
        .route("/artifacts/{id}", web::get().to(get_artifact))
        .route("/models", web::get().to(list_models))
        .route("/models/preload", web::post().to(preload_models))
        .route("/models/{capability}/reload", web::post().to(reload_model))
        .route("/models/{capability}/{key:.*}", web::delete().to(invalidate_model));
}
