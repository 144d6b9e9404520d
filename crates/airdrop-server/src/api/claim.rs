use super::prelude::*;
use crate::coordinator::ClaimRequest;
use airdrop_lib::ClaimRecord;

#[derive(Serialize)]
pub struct Output {
    pub message: &'static str,
    pub record: ClaimRecord,
}

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/claim")
        .wrap(config.cors())
        .route(web::post().to(claim))
}

async fn claim(
    params: web::Json<ClaimRequest>,
    coordinator: web::Data<ClaimCoordinator>,
) -> Result<web::Json<Output>, ClaimError> {
    let params = params.into_inner();
    let wallet = params.wallet.clone();
    let record = coordinator.claim(params).await.inspect_err(|error| {
        tracing::info!("claim by {} rejected: {}", wallet, error);
    })?;
    Ok(web::Json(Output {
        message: "Claim recorded",
        record,
    }))
}
