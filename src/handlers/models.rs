//! # Model Management REST API Handlers
//!
//! HTTP endpoints over the three capability registries: status, preload,
//! forced reloads and invalidation.
//!
//! ## Available Endpoints:
//! - `GET /models` - registry snapshot plus the configured defaults
//! - `POST /models/preload` - force-load every configured model
//! - `POST /models/{capability}/reload` - force-reload one model
//! - `DELETE /models/{capability}/{key}` - drop a cached handle

use crate::backends::ModelKey;
use crate::error::{AppError, Capability};
use crate::state::AppState;
use crate::synthesis::VoiceProfile;
use crate::transcription::ModelSize;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Query for a reload. Without `key` the capability's configured model is used.
#[derive(Debug, Deserialize)]
pub struct ReloadQuery {
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WhisperSizeInfo {
    pub size: String,
    pub description: String,
    pub size_mb: u32,
}

#[derive(Debug, Serialize)]
pub struct VoiceProfileInfo {
    pub profile: String,
    pub model: String,
}

/// List every registry entry with its status.
///
/// ## Endpoint: `GET /api/v1/models`
///
/// ## Response:
/// ```json
/// {
///   "models": [
///     { "capability": "synthesis", "key": "spanish",
///       "status": { "state": "loaded", "loaded_at": 1700000000, "load_seconds": 1.2 },
///       "description": "Ready for inference", "load_attempts": 1, "last_error": null }
///   ],
///   "configured": { "transcription": "turbo", "translation": "jbochi/madlad400-3b-mt" },
///   "available": { "whisper_sizes": [...], "voice_profiles": [...] }
/// }
/// ```
pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let models = state.orchestrator.registries().snapshot().await;

    let whisper_sizes: Vec<WhisperSizeInfo> = ModelSize::ALL
        .iter()
        .map(|size| WhisperSizeInfo {
            size: size.to_string(),
            description: size.description().to_string(),
            size_mb: size.size_mb(),
        })
        .collect();
    let voice_profiles: Vec<VoiceProfileInfo> = VoiceProfile::ALL
        .iter()
        .map(|profile| VoiceProfileInfo {
            profile: profile.to_string(),
            model: profile.model_name().to_string(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": models,
        "configured": {
            "transcription": config.models.whisper_model,
            "translation": config.models.translation_model,
            "device": config.models.device
        },
        "available": {
            "whisper_sizes": whisper_sizes,
            "voice_profiles": voice_profiles
        }
    })))
}

/// Force-load every configured model.
///
/// ## Endpoint: `POST /api/v1/models/preload`
///
/// Answers 200 when everything loaded, 500 with the same report otherwise.
pub async fn preload_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let report = state.orchestrator.preload_all().await;

    let body = json!({
        "success": report.all_loaded(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": report.models,
    });

    if report.all_loaded() {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::InternalServerError().json(body))
    }
}

/// Force-reload one model, replacing the cached handle on success.
///
/// ## Endpoint: `POST /api/v1/models/{capability}/reload?key=small`
pub async fn reload_model(
    state: web::Data<AppState>,
    capability: web::Path<String>,
    query: web::Query<ReloadQuery>,
) -> Result<HttpResponse, AppError> {
    let capability = parse_capability(&capability)?;
    let key = match query.key.as_deref() {
        Some(key) => ModelKey::parse(capability, key).map_err(AppError::ValidationError)?,
        None => state.orchestrator.default_key(capability),
    };

    let outcome = state.orchestrator.reload(&key).await;
    if outcome.loaded {
        Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("{} model '{}' loaded", capability, key),
            "model": outcome,
        })))
    } else {
        Ok(HttpResponse::InternalServerError().json(json!({
            "success": false,
            "message": format!("Failed to load {} model '{}'", capability, key),
            "model": outcome,
        })))
    }
}

/// Drop a cached handle. The next request that needs it loads it again.
///
/// ## Endpoint: `DELETE /api/v1/models/{capability}/{key}`
pub async fn invalidate_model(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (capability, key) = path.into_inner();
    let capability = parse_capability(&capability)?;
    let key = ModelKey::parse(capability, &key).map_err(AppError::ValidationError)?;

    let invalidated = state.orchestrator.registries().invalidate(&key).await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "capability": capability,
        "key": key.to_string(),
        "invalidated": invalidated,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

fn parse_capability(raw: &str) -> Result<Capability, AppError> {
    raw.parse().map_err(AppError::ValidationError)
}
