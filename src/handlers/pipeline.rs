//! # Pipeline REST API Handlers
//!
//! ## Available Endpoints:
//! - `POST /translate-audio` - run the pipeline on audio already on the server
//! - `POST /translate-audio/upload` - run the pipeline on uploaded audio
//!
//! A run that failed during synthesis answers 400 with the partial result as
//! the body, so clients still get the transcript and translation.

use crate::error::{AppError, InputRole};
use crate::pipeline::{PipelineRequest, PipelineResult, UploadForm};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;

/// Text form fields are short; anything bigger is a client mistake.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// Run the full pipeline on server-side files.
///
/// ## Endpoint: `POST /api/v1/translate-audio`
///
/// ## Request Body:
/// ```json
/// {
///   "source_audio": "/data/in/speech.wav",
///   "reference_audio": "/data/in/voice.wav",
///   "source_lang": "es",
///   "target_lang": "en",
///   "synthesis_model_hint": "F5TTS_v1_Base",
///   "reference_text": null
/// }
/// ```
pub async fn translate_audio(
    state: web::Data<AppState>,
    request: web::Json<PipelineRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    validate_languages(&request.source_lang, &request.target_lang)?;

    let outcome = state.orchestrator.run(request).await;
    respond(&state, outcome)
}

/// Run the full pipeline on uploaded audio.
///
/// ## Endpoint: `POST /api/v1/translate-audio/upload`
///
/// ## Multipart Fields:
/// - `audio_file`: speech to translate
/// - `voice_reference_file`: voice sample to clone
/// - `source_lang`, `target_lang`: ISO 639-1 codes
/// - `model` (optional): synthesis model hint
/// - `reference_text` (optional): transcript of the voice sample
///
/// Files are streamed to a request-scoped staging directory that is removed
/// when the request finishes.
pub async fn translate_audio_upload(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let mut staged = state.orchestrator.new_staging(Some(state.max_upload_bytes())).await?;
    let mut form = UploadForm::default();
    let mut source_lang = None;
    let mut target_lang = None;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field.name().unwrap_or_default().to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        match name.as_str() {
            "audio_file" => {
                staged
                    .stage(InputRole::SourceAudio, filename.as_deref(), field)
                    .await?;
            }
            "voice_reference_file" => {
                staged
                    .stage(InputRole::ReferenceAudio, filename.as_deref(), field)
                    .await?;
            }
            "source_lang" => source_lang = Some(read_text(&mut field, &name).await?),
            "target_lang" => target_lang = Some(read_text(&mut field, &name).await?),
            "model" => form.synthesis_model_hint = Some(read_text(&mut field, &name).await?),
            "reference_text" => form.reference_text = Some(read_text(&mut field, &name).await?),
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    if staged.source_audio().is_none() {
        return Err(AppError::BadRequest("Missing multipart field 'audio_file'".to_string()));
    }
    if staged.reference_audio().is_none() {
        return Err(AppError::BadRequest(
            "Missing multipart field 'voice_reference_file'".to_string(),
        ));
    }
    form.source_lang = required(source_lang, "source_lang")?;
    form.target_lang = required(target_lang, "target_lang")?;
    form.synthesis_model_hint = form.synthesis_model_hint.filter(|hint| !hint.trim().is_empty());
    validate_languages(&form.source_lang, &form.target_lang)?;

    let outcome = state.orchestrator.run_staged(staged, form).await;
    respond(&state, outcome)
}

fn respond(
    state: &AppState,
    outcome: Result<PipelineResult, crate::error::PipelineError>,
) -> Result<HttpResponse, AppError> {
    match outcome {
        Ok(result) => {
            state.pipeline_counters.record(&result);
            if result.is_partial() {
                Ok(HttpResponse::BadRequest().json(result))
            } else {
                Ok(HttpResponse::Ok().json(result))
            }
        }
        Err(err) => {
            state.pipeline_counters.record_failure();
            Err(err.into())
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing multipart field '{}'", name)))
}

pub(crate) fn validate_languages(source_lang: &str, target_lang: &str) -> Result<(), AppError> {
    for (name, value) in [("source_lang", source_lang), ("target_lang", target_lang)] {
        if value.trim().is_empty() {
            return Err(AppError::ValidationError(format!("{} cannot be empty", name)));
        }
    }
    Ok(())
}

async fn read_text(field: &mut actix_multipart::Field, name: &str) -> Result<String, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::BadRequest(format!("Field '{}' is too long", name)));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes).map_err(|_| AppError::BadRequest(format!("Field '{}' is not valid UTF-8", name)))
}
