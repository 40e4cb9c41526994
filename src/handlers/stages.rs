//! Single-stage endpoints: run one capability without the rest of the pipeline.

use crate::error::AppError;
use crate::handlers::pipeline::validate_languages;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub audio_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub ref_audio_path: PathBuf,
    pub ref_text: String,
    pub gen_text: String,
    pub target_lang: String,
}

/// ## Endpoint: `POST /api/v1/transcribe`
pub async fn transcribe(
    state: web::Data<AppState>,
    request: web::Json<TranscribeRequest>,
) -> Result<HttpResponse, AppError> {
    let transcript = state.orchestrator.transcribe(&request.audio_path).await?;

    Ok(HttpResponse::Ok().json(json!({
        "text": transcript.text,
        "transcription_time": transcript.duration.as_secs_f64(),
        "audio_path": request.audio_path,
    })))
}

/// ## Endpoint: `POST /api/v1/translate`
pub async fn translate(
    state: web::Data<AppState>,
    request: web::Json<TranslateRequest>,
) -> Result<HttpResponse, AppError> {
    validate_languages(&request.source_lang, &request.target_lang)?;

    let translation = state
        .orchestrator
        .translate(&request.text, &request.source_lang, &request.target_lang)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "translated_text": translation.translated_text,
        "translation_time": translation.duration.as_secs_f64(),
        "source_lang": request.source_lang,
        "target_lang": request.target_lang,
    })))
}

/// ## Endpoint: `POST /api/v1/tts`
///
/// Unlike the full pipeline, a synthesis failure is an error response.
pub async fn synthesize(
    state: web::Data<AppState>,
    request: web::Json<SynthesizeRequest>,
) -> Result<HttpResponse, AppError> {
    if request.gen_text.trim().is_empty() {
        return Err(AppError::ValidationError("gen_text cannot be empty".to_string()));
    }

    let output = state
        .orchestrator
        .synthesize(
            &request.ref_audio_path,
            &request.ref_text,
            &request.gen_text,
            &request.target_lang,
        )
        .await?;

    Ok(HttpResponse::Ok().json(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use crate::testing::{touch, MockSynthesizer, MockTranscriber, MockTranslator};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    macro_rules! stages_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/transcribe", web::post().to(transcribe))
                    .route("/translate", web::post().to(translate))
                    .route("/tts", web::post().to(synthesize)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_transcribe_and_translate() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default("hola mundo"),
            MockTranslator::new(),
            MockSynthesizer::new(),
        );
        let app = stages_app!(state);

        let req = test::TestRequest::post()
            .uri("/transcribe")
            .set_json(json!({ "audio_path": touch(dir.path(), "speech.wav") }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["text"], "hola mundo");

        let req = test::TestRequest::post()
            .uri("/translate")
            .set_json(json!({ "text": "hola mundo", "source_lang": "es", "target_lang": "en" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["translated_text"], "hello world");
    }

    #[actix_web::test]
    async fn test_translation_failure_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::failing("unsupported language 'xx'"),
            MockSynthesizer::new(),
        );
        let app = stages_app!(state);

        let req = test::TestRequest::post()
            .uri("/translate")
            .set_json(json!({ "text": "hola", "source_lang": "es", "target_lang": "xx" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "translation_error");
    }

    #[actix_web::test]
    async fn test_tts_routes_by_language() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::new(),
            MockSynthesizer::new(),
        );
        let app = stages_app!(state);

        let req = test::TestRequest::post()
            .uri("/tts")
            .set_json(json!({
                "ref_audio_path": touch(dir.path(), "voice.wav"),
                "ref_text": "mi voz",
                "gen_text": "hola a todos",
                "target_lang": "es"
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["synthesis_profile"], "F5TTS_Spanish");
        let path = PathBuf::from(body["output_audio_path"].as_str().unwrap());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hola a todos");
    }
}
