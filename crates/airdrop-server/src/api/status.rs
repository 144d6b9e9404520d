use super::prelude::*;
use crate::coordinator::Status;

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/status")
        .wrap(config.cors())
        .route(web::get().to(status))
}

async fn status(coordinator: web::Data<ClaimCoordinator>) -> Result<web::Json<Status>, ClaimError> {
    Ok(web::Json(coordinator.status().await?))
}
