//! # Voice Dub Backend
//!
//! Speech-to-speech translation in the speaker's own voice:
//! Whisper transcription → MADLAD-400 translation → F5-TTS voice cloning.
//!
//! ## Module Layout:
//! - **registry** / **backends**: lazily-loaded, shared model handles per capability
//! - **transcription**, **translation**, **synthesis**: the three capabilities
//! - **pipeline**: orchestration, artifacts and upload staging
//! - **config**, **state**, **health**, **middleware**, **handlers**: the HTTP service

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod health;
pub mod hub;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod synthesis;
pub mod transcription;
pub mod translation;

#[cfg(test)]
pub(crate) mod testing;
