use super::super::prelude::*;
use crate::job_worker::{GetJob, Job, JobWorker};
use uuid::Uuid;

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/jobs/{id}")
        .wrap(config.cors())
        .route(web::get().to(get_job))
}

async fn get_job(
    _: Admin,
    id: web::Path<Uuid>,
    jobs: web::Data<actix::Addr<JobWorker>>,
) -> Result<web::Json<Job>, Error> {
    let job = jobs
        .send(GetJob {
            id: id.into_inner(),
        })
        .await?
        .ok_or(Error::NotFound)?;
    Ok(web::Json(job))
}
