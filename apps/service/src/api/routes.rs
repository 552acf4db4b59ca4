use actix_web::{HttpResponse, Responder, get, post, web};
use serde_json::json;

use super::error::ApiError;
use crate::orchestrator::Orchestrator;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_route)
        .service(run_check_route)
        .service(next_check_time_route)
        .service(scheduler_status_route);
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Kick off a batch run immediately. The response waits for the run to
/// finish; a 409 means another run already holds the slot.
#[post("/api/run-check")]
pub async fn run_check_route(
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ApiError> {
    let run_id = orchestrator.trigger_batch_run().await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Check run started", "run_id": run_id })))
}

#[get("/api/next-check-time")]
pub async fn next_check_time_route(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    let next = orchestrator.next_fire_time().map(|when| when.to_rfc3339());
    HttpResponse::Ok().json(json!({ "next_check_time": next }))
}

#[get("/api/scheduler-status")]
pub async fn scheduler_status_route(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    HttpResponse::Ok().json(orchestrator.scheduler_status())
}
