/// Operator API
///
/// Small HTTP surface over the orchestrator: liveness, manual trigger,
/// and scheduler introspection. Binds the address from the loaded config
/// and serves until the process is told to stop.
pub mod error;
pub mod routes;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use tracing::info;

use crate::orchestrator::Orchestrator;

pub async fn serve(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let host = orchestrator.config().api.bind.clone();
    let port = orchestrator.config().api.port;
    let data = web::Data::from(orchestrator);

    info!(%host, port, "starting operator API");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(routes::routes))
        .bind((host.as_str(), port))
        .with_context(|| format!("failed to bind {host}:{port}"))?
        .run()
        .await?;

    Ok(())
}
