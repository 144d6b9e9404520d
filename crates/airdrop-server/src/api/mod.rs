use crate::{
    Config,
    coordinator::ClaimCoordinator,
    error::{json_config, query_config},
    job_worker::JobWorker,
    middleware::admin::AdminToken,
};
use actix_web::web;

pub mod claim;
pub mod eligibility;
pub mod status;

pub mod admin;

pub mod prelude {
    pub use crate::{
        Config,
        coordinator::ClaimCoordinator,
        error::{ClaimError, Error},
        middleware::admin::Admin,
    };
    pub use actix_web::{dev::HttpServiceFactory, http::StatusCode, web};
    pub use serde::{Deserialize, Serialize};

    pub struct Success;

    impl Serialize for Success {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            use serde::ser::SerializeStruct;
            let mut s = s.serialize_struct("Success", 1)?;
            s.serialize_field("success", &true)?;
            s.end()
        }
    }
}

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: web::Data<ClaimCoordinator>,
    pub jobs: web::Data<actix::Addr<JobWorker>>,
    pub admin_token: web::Data<AdminToken>,
}

impl AppState {
    pub fn new(
        coordinator: ClaimCoordinator,
        jobs: actix::Addr<JobWorker>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            coordinator: web::Data::new(coordinator),
            jobs: web::Data::new(jobs),
            admin_token: web::Data::new(AdminToken::new(admin_token)),
        }
    }
}

/// Mount the `/api` scope.
pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, state: &AppState) {
    let admin = web::scope("/admin")
        .service(admin::allocations::service(config))
        .service(admin::refresh::service(config))
        .service(admin::run_transfer::service(config))
        .service(admin::get_job::service(config));

    cfg.service(
        web::scope("/api")
            .app_data(json_config())
            .app_data(query_config())
            .app_data(state.coordinator.clone())
            .app_data(state.jobs.clone())
            .app_data(state.admin_token.clone())
            .service(eligibility::service(config))
            .service(claim::service(config))
            .service(status::service(config))
            .service(admin),
    );
}
