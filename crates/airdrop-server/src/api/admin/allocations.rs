use super::super::prelude::*;
use airdrop_lib::Allocation;
use indexmap::IndexMap;

#[derive(Serialize)]
pub struct Output {
    pub pool: u64,
    pub recipients: usize,
    pub total_allocated: u64,
    pub total_net: u64,
    pub total_referrals: u64,
    pub residual: u64,
    /// Referral payouts per referrer, uncapped.
    pub referral_totals: IndexMap<String, u64>,
    pub allocations: Vec<Allocation>,
}

pub fn service(config: &Config) -> impl HttpServiceFactory + 'static {
    web::resource("/allocations")
        .wrap(config.cors())
        .route(web::get().to(allocations))
}

async fn allocations(
    _: Admin,
    coordinator: web::Data<ClaimCoordinator>,
) -> Result<web::Json<Output>, Error> {
    let set = coordinator.allocations().snapshot();
    Ok(web::Json(Output {
        pool: set.pool(),
        recipients: set.len(),
        total_allocated: set.total_gross(),
        total_net: set.total_net(),
        total_referrals: set.total_referrals(),
        residual: set.residual(),
        referral_totals: set.referral_totals(),
        allocations: set.iter().cloned().collect(),
    }))
}
