use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// Download a generated file.
///
/// ## Endpoint: `GET /api/v1/artifacts/{id}`
pub async fn get_artifact(state: web::Data<AppState>, id: web::Path<String>) -> Result<HttpResponse, AppError> {
    let id = id.into_inner();
    let path = state
        .orchestrator
        .artifacts()
        .resolve(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No generated audio with id '{}'", id)))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Reading {}: {}", path.display(), e)))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "translated_audio.wav".to_string());

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header((
            "content-disposition",
            format!("attachment; filename=\"{}\"", file_name),
        ))
        .body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use crate::testing::{touch, MockSynthesizer, MockTranscriber, MockTranslator};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_download_generated_audio() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::new(),
            MockSynthesizer::new(),
        );
        let reference = touch(dir.path(), "voice.wav");
        let output = state
            .orchestrator
            .synthesize(&reference, "mi voz", "hello there", "en")
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/artifacts/{id}", web::get().to(get_artifact)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/artifacts/{}", output.artifact_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "audio/wav");
        assert_eq!(test::read_body(resp).await, "hello there".as_bytes());

        let req = test::TestRequest::get().uri("/artifacts/not-a-uuid").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
