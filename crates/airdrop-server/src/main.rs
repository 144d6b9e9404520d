use actix::Actor;
use actix_web::{App, HttpServer, middleware::Logger, web};
use airdrop_lib::{EligibilityOracle, ProofService};
use airdrop_server::{
    AppState, Config,
    allocation_cache::{AllocationCache, AllocationRefresher},
    api::{self, prelude::Success},
    coordinator::{ClaimCoordinator, OnchainEligibility},
    job_worker::JobWorker,
    ledger_worker::LedgerHandle,
};
use chain_oracle::RpcOracle;
use db::{AllocationSource, ClaimLedger};
use futures_util::future::ok;
use std::{convert::Infallible, sync::Arc};
use tracing_subscriber::EnvFilter;

#[actix::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::get_config() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("{}", error);
            return;
        }
    };

    tracing::info!("allow CORS origins: {:?}", config.cors_origins);

    let ledger = match ClaimLedger::open(&config.storage.claims) {
        Ok(ledger) => ledger,
        Err(error) => {
            tracing::error!(
                "failed to open claim ledger {:?}: {}",
                config.storage.claims.display(),
                error
            );
            return;
        }
    };
    let ledger = LedgerHandle::start(ledger, config.ledger_timeout());

    let source = AllocationSource::new(&config.storage, config.pool);
    let allocations = match AllocationCache::load(source) {
        Ok(cache) => Arc::new(cache),
        Err(error) => {
            tracing::error!("failed to load allocations: {}", error);
            return;
        }
    };
    let snapshot = allocations.snapshot();
    tracing::info!(
        "{} recipients, {} of {} allocated, residual {}",
        snapshot.len(),
        snapshot.total_gross(),
        snapshot.pool(),
        snapshot.residual()
    );
    let _refresher = config
        .allocation_refresh_interval()
        .map(|interval| AllocationRefresher::start(allocations.clone(), interval));

    let onchain = match &config.oracle {
        Some(cfg) => match RpcOracle::new(cfg) {
            Ok(oracle) => {
                tracing::info!(
                    "on-chain eligibility via {}, grant {}",
                    cfg.rpc_url,
                    cfg.onchain_grant
                );
                let oracle: Arc<dyn EligibilityOracle> = Arc::new(oracle);
                Some(OnchainEligibility::from_config(oracle, cfg))
            }
            Err(error) => {
                tracing::error!("failed to build oracle client: {}", error);
                return;
            }
        },
        None => None,
    };

    let executor = match config.transfer.executor() {
        Ok(executor) => executor,
        Err(error) => {
            tracing::error!("invalid transfer config: {}", error);
            return;
        }
    };
    let jobs = JobWorker::new(
        executor,
        config.transfer.timeout(),
        config.transfer.retention(),
    )
    .start();

    let admin_token = config.admin_token();
    if admin_token.is_none() {
        tracing::warn!("no admin token configured, admin routes are disabled");
    }

    let proofs = ProofService::new(&config.proof_secret());
    let coordinator = ClaimCoordinator::new(proofs, allocations, ledger, onchain);
    let state = AppState::new(coordinator, jobs, admin_token);

    let host = config.host.clone();
    let port = config.port;

    tracing::info!("listening on {:?} port {:?}", host, port);

    let server = HttpServer::new(move || {
        let healthcheck = web::resource("/healthcheck")
            .route(web::get().to(|()| ok::<_, Infallible>(web::Json(Success))));

        App::new()
            .wrap(Logger::new(r#""%r" %s %b %Dms"#).exclude("/healthcheck"))
            .configure(|cfg| api::configure(cfg, &config, &state))
            .service(healthcheck)
    })
    .bind((host, port));

    let server = match server {
        Ok(server) => server,
        Err(error) => {
            tracing::error!("failed to bind: {}", error);
            return;
        }
    };

    if let Err(error) = server.run().await {
        tracing::error!("server error: {}", error);
    }
}
