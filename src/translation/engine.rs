//! # Translation Engine
//!
//! Registry-backed adapter around the shared [`Translator`] handle.

use crate::error::PipelineError;
use crate::registry::ModelRegistry;
use crate::translation::Translator;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry of translation handles keyed by model repository id.
pub type TranslatorRegistry = ModelRegistry<String, dyn Translator>;

#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub translated_text: String,
    #[serde(skip)]
    pub duration: Duration,
}

pub struct TranslationEngine {
    registry: Arc<TranslatorRegistry>,
    model_key: String,
}

impl TranslationEngine {
    pub fn new(registry: Arc<TranslatorRegistry>, model_key: impl Into<String>) -> Self {
        Self {
            registry,
            model_key: model_key.into(),
        }
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    pub fn registry(&self) -> &Arc<TranslatorRegistry> {
        &self.registry
    }

    /// Translate `text` between the given languages.
    ///
    /// Language codes are passed through untouched; an unsupported code
    /// surfaces as a `Translation` error from the model.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translation, PipelineError> {
        let start_time = Instant::now();
        let model = self.registry.get(&self.model_key).await?;

        let (text_owned, src, tgt) = (text.to_string(), source_lang.to_string(), target_lang.to_string());
        let translated_text = tokio::task::spawn_blocking(move || model.translate(&text_owned, &src, &tgt))
            .await
            .map_err(PipelineError::worker)?
            .map_err(PipelineError::Translation)?;

        let duration = start_time.elapsed();
        tracing::info!(
            source_lang,
            target_lang,
            seconds = duration.as_secs_f64(),
            "Translation complete"
        );

        Ok(Translation {
            translated_text,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTranslator;

    #[tokio::test]
    async fn test_languages_are_per_call() {
        let mock = Arc::new(MockTranslator::new());
        let engine = Arc::new(TranslationEngine::new(Arc::new(mock.registry()), "m2m"));

        let (to_en, to_fr) = tokio::join!(
            engine.translate("hola mundo", "es", "en"),
            engine.translate("hola mundo", "es", "fr"),
        );

        assert_eq!(to_en.unwrap().translated_text, "hello world");
        assert_eq!(to_fr.unwrap().translated_text, "[es->fr] hola mundo");
        assert_eq!(mock.loads(), 1);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_model_failure_is_translation_error() {
        let mock = Arc::new(MockTranslator::failing("unsupported language 'xx'"));
        let engine = TranslationEngine::new(Arc::new(mock.registry()), "m2m");

        let err = engine.translate("hola", "es", "xx").await.unwrap_err();
        assert!(matches!(err, PipelineError::Translation(_)));
        assert_eq!(err.kind(), "translation_error");
    }

    #[tokio::test]
    async fn test_load_failure_is_capability_error() {
        let mock = Arc::new(MockTranslator::new().failing_loads());
        let engine = TranslationEngine::new(Arc::new(mock.registry()), "m2m");

        let err = engine.translate("hola", "es", "en").await.unwrap_err();
        assert!(matches!(err, PipelineError::CapabilityLoad { .. }));
    }
}
