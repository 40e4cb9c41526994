use crate::device::DeviceManager;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let models = state.orchestrator.registries().snapshot().await;
    let failed_models = models.iter().filter(|m| m.last_error.is_some() && !m.status.is_loaded()).count();

    let status = if failed_models > 0 { "degraded" } else { "healthy" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-dub-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "pipelines": state.pipeline_counters.snapshot()
        },
        "memory": get_memory_info(),
        "models": models,
        "device": DeviceManager::get_device_summary(),
        "system": get_system_status(&state)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "pipelines": state.pipeline_counters.snapshot(),
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_pipelines": config.performance.max_concurrent_pipelines,
            "available_pipeline_slots": state.orchestrator.available_slots(),
            "max_upload_mb": config.performance.max_upload_mb
        }
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let kilobytes = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": kilobytes("VmRSS:") * 1024,
                "virtual_memory_bytes": kilobytes("VmSize:") * 1024,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Load is judged by how many pipeline slots are in use.
fn get_system_status(state: &AppState) -> serde_json::Value {
    let max = state.get_config().performance.max_concurrent_pipelines;
    let in_use = max.saturating_sub(state.orchestrator.available_slots());
    let usage = if max > 0 { in_use as f64 / max as f64 } else { 0.0 };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "pipeline_usage_percent": (usage * 100.0).round(),
        "max_pipelines": max,
        "running_pipelines": in_use,
        "load_warnings": if usage > 0.8 {
            vec!["High pipeline usage - consider increasing max_concurrent_pipelines"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use crate::testing::{MockSynthesizer, MockTranscriber, MockTranslator};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_models_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::new(),
            MockSynthesizer::new(),
        );
        state.orchestrator.preload_all().await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "voice-dub-backend");
        assert_eq!(body["models"].as_array().unwrap().len(), 4);
        assert_eq!(body["system"]["running_pipelines"], 0);
    }

    #[actix_web::test]
    async fn test_health_degraded_after_failed_load() {
        let dir = tempfile::tempdir().unwrap();
        let state = mock_state(
            dir.path(),
            MockTranscriber::with_default(""),
            MockTranslator::new().failing_loads(),
            MockSynthesizer::new(),
        );
        state.orchestrator.preload_all().await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "degraded");
    }
}
