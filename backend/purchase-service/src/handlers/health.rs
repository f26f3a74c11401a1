//! Health endpoint
use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::health::{ComponentStatus, HealthReport};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<&'static str>,
    pub components: HealthReport,
}

impl HealthResponse {
    pub fn from_report(service: &'static str, report: HealthReport) -> Self {
        let status = match report.overall {
            ComponentStatus::Ok => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Down => "unhealthy",
        };

        Self {
            status,
            service,
            store: report.store.as_ref().map(|c| match c.status {
                ComponentStatus::Ok => "connected",
                _ => "error",
            }),
            consumer: report.consumer.as_ref().map(|c| match c.status {
                ComponentStatus::Down => "not running",
                _ => "consuming",
            }),
            publisher: report.publisher.as_ref().map(|c| match c.status {
                ComponentStatus::Down => "error",
                _ => "connected",
            }),
            components: report,
        }
    }
}

/// 200 when every enabled signal is OK, 503 otherwise
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let report = state.health.report().await;
    let healthy = report.overall == ComponentStatus::Ok;
    let body = HealthResponse::from_report(state.service_name(), report);

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
