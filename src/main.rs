//! # Voice Dub Backend - Main Application Entry Point
//!
//! Sets up the Actix-web HTTP server:
//!
//! 1. Loads `.env`, initializes tracing, loads and validates configuration
//! 2. Builds the model registries and the pipeline orchestrator
//! 3. Optionally preloads every model before accepting requests
//! 4. Serves the API under `/api/v1` (and `/health` at the root)
//! 5. Stops gracefully on SIGINT / SIGTERM

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_dub_backend::backends::ModelRegistries;
use voice_dub_backend::config::AppConfig;
use voice_dub_backend::device::DeviceManager;
use voice_dub_backend::pipeline::{PipelineOrchestrator, PipelineSettings};
use voice_dub_backend::state::AppState;
use voice_dub_backend::{handlers, health, middleware};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-dub-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    let devices = DeviceManager::get_device_summary();
    info!(
        cuda = devices.cuda_available,
        metal = devices.metal_available,
        best = %devices.current_device,
        preference = %config.models.device,
        "Compute devices"
    );

    let registries = ModelRegistries::from_config(&config)?;
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        registries,
        PipelineSettings::from_config(&config)?,
    ));

    if config.models.preload_on_startup {
        info!("Preloading models before accepting requests");
        let report = orchestrator.preload_all().await;
        for model in report.models.iter().filter(|m| !m.loaded) {
            warn!(
                capability = %model.capability,
                key = %model.key,
                error = model.error.as_deref().unwrap_or("unknown"),
                "Model failed to preload; it will be retried on first use"
            );
        }
    }

    let app_state = AppState::new(config.clone(), orchestrator);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    // Multipart uploads are streamed and size-checked per file, so only JSON needs a cap
    let json_limit = 1024 * 1024;

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(web::scope("/api/v1").configure(handlers::configure))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_dub_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
