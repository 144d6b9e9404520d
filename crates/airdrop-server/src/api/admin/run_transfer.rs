use super::super::prelude::*;
use crate::job_worker::{JobWorker, StartTransfer};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Serialize)]
pub struct Output {
    pub job_id: Uuid,
    pub payouts: usize,
    pub total: u64,
    /// Where the allocation table the plan was built from was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported: Option<PathBuf>,
}

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/run")
        .wrap(config.cors())
        .route(web::post().to(run_transfer))
}

async fn run_transfer(
    _: Admin,
    coordinator: web::Data<ClaimCoordinator>,
    jobs: web::Data<actix::Addr<JobWorker>>,
) -> Result<web::Json<Output>, Error> {
    let claims = coordinator.ledger().records().await?;
    let snapshot = coordinator.allocations().snapshot();

    let job = jobs
        .send(StartTransfer {
            claims,
            allocations: snapshot.clone(),
        })
        .await??;
    tracing::info!("started transfer job {}: {} payouts", job.id, job.payouts);

    // the job is already running, a failed export does not fail the request
    let cache = coordinator.allocations().clone();
    let exported = match web::block(move || cache.source().export(&snapshot)).await {
        Ok(Ok(path)) => path,
        Ok(Err(error)) => {
            tracing::error!("failed to export allocations: {}", error);
            None
        }
        Err(error) => {
            tracing::error!("failed to export allocations: {}", error);
            None
        }
    };

    Ok(web::Json(Output {
        job_id: job.id,
        payouts: job.payouts,
        total: job.total,
        exported,
    }))
}
