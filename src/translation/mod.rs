//! # Translation Module
//!
//! Text-to-text translation for the pipeline's second stage.
//!
//! One translation model serves every language pair, so the registry has a
//! single key (the model repository). Source and target languages travel with
//! each call instead of being stored on the shared handle.

pub mod engine;
pub mod model;

pub use engine::{Translation, TranslationEngine};
pub use model::MadladTranslator;

/// A loaded translation model.
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang` (ISO 639-1 codes).
    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> anyhow::Result<String>;
}
