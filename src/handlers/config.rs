use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// ## Endpoint: `GET /api/v1/config`
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Partial runtime update. Only the reference-text policy, placeholder text
/// and upload limit can change; see `AppConfig::update_from_json`.
///
/// ## Endpoint: `PUT /api/v1/config`
///
/// ## Request Body:
/// ```json
/// { "pipeline": { "upload_reference_mode": "transcribe" }, "performance": { "max_upload_mb": 50 } }
/// ```
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(updated.clone())
        .map_err(AppError::ValidationError)?;

    tracing::info!(
        reference_mode = %updated.pipeline.reference_mode,
        upload_reference_mode = %updated.pipeline.upload_reference_mode,
        max_upload_mb = updated.performance.max_upload_mb,
        "Runtime configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "pipeline": {
                "reference_mode": updated.pipeline.reference_mode,
                "upload_reference_mode": updated.pipeline.upload_reference_mode,
                "placeholder_reference_text": updated.pipeline.placeholder_reference_text
            },
            "performance": {
                "max_upload_mb": updated.performance.max_upload_mb
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceMode;
    use crate::state::test_support::mock_state;
    use crate::testing::{MockSynthesizer, MockTranscriber, MockTranslator};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_and_update_config() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::new(),
            MockSynthesizer::new(),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["pipeline"]["upload_reference_mode"], "placeholder");

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({ "pipeline": { "upload_reference_mode": "transcribe" } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            state.orchestrator.reference_settings().upload_reference_mode,
            ReferenceMode::Transcribe
        );

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({ "performance": { "max_upload_mb": 0 } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().performance.max_upload_mb, 100);
    }
}
