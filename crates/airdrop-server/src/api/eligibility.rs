use super::prelude::*;
use crate::coordinator::Eligibility;

#[derive(Deserialize)]
pub struct Query {
    pub wallet: String,
}

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/eligibility")
        .wrap(config.cors())
        .route(web::get().to(eligibility))
}

async fn eligibility(
    query: web::Query<Query>,
    coordinator: web::Data<ClaimCoordinator>,
) -> Result<web::Json<Eligibility>, ClaimError> {
    let res = coordinator.eligibility(&query.wallet).await?;
    tracing::debug!("eligibility of {}: {}", res.wallet, res.eligible);
    Ok(web::Json(res))
}
