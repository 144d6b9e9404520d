use super::super::prelude::*;

#[derive(Serialize)]
pub struct Output {
    pub recipients: usize,
    pub total_allocated: u64,
    pub residual: u64,
}

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/refresh")
        .wrap(config.cors())
        .route(web::post().to(refresh))
}

async fn refresh(
    _: Admin,
    coordinator: web::Data<ClaimCoordinator>,
) -> Result<web::Json<Output>, Error> {
    let cache = coordinator.allocations().clone();
    let set = web::block(move || cache.refresh())
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
    tracing::info!("reloaded {} allocations", set.len());
    Ok(web::Json(Output {
        recipients: set.len(),
        total_allocated: set.total_gross(),
        residual: set.residual(),
    }))
}
