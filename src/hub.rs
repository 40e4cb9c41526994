//! # HuggingFace Hub Access
//!
//! Shared client construction for the candle backends. Model loads already run
//! on the blocking pool, so the synchronous hub API is used.
//!
//! ## Environment:
//! - `HF_TOKEN`: optional access token
//! - `HF_HUB_CACHE` / `HF_HOME`: cache location overrides

use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};
use std::path::PathBuf;

/// Build a hub client, falling back to `Api::new()` if the configured builder fails.
pub fn hub_api() -> Result<Api> {
    tracing::debug!(
        hf_home = ?std::env::var("HF_HOME").ok(),
        hf_hub_cache = ?std::env::var("HF_HUB_CACHE").ok(),
        hf_token_set = std::env::var("HF_TOKEN").is_ok(),
        "Initializing HuggingFace API"
    );

    let mut builder = ApiBuilder::new()
        .with_progress(false)
        .with_token(std::env::var("HF_TOKEN").ok());

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(PathBuf::from(cache_dir));
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
    }

    match builder.build() {
        Ok(api) => Ok(api),
        Err(e) => {
            tracing::error!("ApiBuilder failed: {}, trying fallback to Api::new()", e);
            Api::new().map_err(|e2| {
                anyhow!(
                    "HuggingFace API unavailable. ApiBuilder error: {}. Api::new() error: {}",
                    e,
                    e2
                )
            })
        }
    }
}

/// Download (or resolve from cache) one file of a repository.
pub fn fetch(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let path = repo
        .get(filename)
        .with_context(|| format!("downloading {} from {}", filename, repo_id))?;
    tracing::debug!(repo = repo_id, file = filename, path = ?path, "Resolved model file");
    Ok(path)
}
