//! Transfer runs as tracked background jobs.

use crate::transfer::{TransferExecutor, TransferPlan};
use actix::{Actor, ActorFutureExt, AsyncContext, ResponseFuture, WrapFuture};
use airdrop_lib::{AllocationSet, ClaimRecord};
use chrono::{DateTime, Utc};
use futures_channel::oneshot;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded { output: String },
    Failed { error: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    #[serde(flatten)]
    pub state: JobState,
    pub payouts: usize,
    pub total: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(id: Uuid, plan: &TransferPlan) -> Self {
        Self {
            id,
            state: JobState::Pending,
            payouts: plan.payouts.len(),
            total: plan.total,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

struct Entry {
    job: Job,
    /// Claims paid by this job, settled once it succeeds.
    wallets: Vec<String>,
    waiters: Vec<oneshot::Sender<Job>>,
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("transfer job {0} is still running")]
    Busy(Uuid),
    #[error("no unsettled claims to pay")]
    NothingToPay,
}

/// Runs one transfer job at a time. Claims paid by a succeeded job are
/// left out of later plans.
pub struct JobWorker {
    executor: Arc<dyn TransferExecutor>,
    timeout: Duration,
    retention: Duration,
    jobs: HashMap<Uuid, Entry>,
    active: Option<Uuid>,
    settled: HashSet<String>,
}

impl JobWorker {
    pub fn new(executor: Arc<dyn TransferExecutor>, timeout: Duration, retention: Duration) -> Self {
        Self {
            executor,
            timeout,
            retention,
            jobs: HashMap::new(),
            active: None,
            settled: HashSet::new(),
        }
    }

    fn finish(&mut self, id: Uuid, state: JobState) {
        if self.active == Some(id) {
            self.active = None;
        }
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };
        match &state {
            JobState::Failed { error } => tracing::error!("transfer job {} failed: {}", id, error),
            _ => {
                tracing::info!("transfer job {} finished", id);
                self.settled.extend(entry.wallets.drain(..));
            }
        }
        entry.job.state = state;
        entry.job.finished_at = Some(Utc::now());
        for tx in entry.waiters.drain(..) {
            tx.send(entry.job.clone()).ok();
        }
    }

    /// Drop finished jobs older than the retention window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let retention = self.retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| match entry.job.finished_at {
            None => true,
            Some(finished) => now
                .signed_duration_since(finished)
                .to_std()
                .map_or(true, |age| age < retention),
        });
        let pruned = before - self.jobs.len();
        if pruned > 0 {
            tracing::debug!("pruned {} finished transfer jobs", pruned);
        }
    }
}

impl Actor for JobWorker {
    type Context = actix::Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("started JobWorker");
        let every = self.retention.max(Duration::from_secs(60));
        ctx.run_interval(every, |act, _| act.prune(Utc::now()));
    }
}

/// Plan and start a transfer over `claims`.
pub struct StartTransfer {
    pub claims: Vec<ClaimRecord>,
    pub allocations: Arc<AllocationSet>,
}

impl actix::Message for StartTransfer {
    type Result = Result<Job, StartError>;
}

impl actix::Handler<StartTransfer> for JobWorker {
    type Result = Result<Job, StartError>;
    fn handle(&mut self, msg: StartTransfer, ctx: &mut Self::Context) -> Self::Result {
        self.prune(Utc::now());
        if let Some(id) = self.active {
            return Err(StartError::Busy(id));
        }

        let claims = msg
            .claims
            .into_iter()
            .filter(|c| !self.settled.contains(&c.wallet))
            .collect::<Vec<_>>();
        let plan = TransferPlan::build(&claims, &msg.allocations);
        if plan.is_empty() {
            return Err(StartError::NothingToPay);
        }

        let id = Uuid::new_v4();
        let job = Job::new(id, &plan);
        self.jobs.insert(
            id,
            Entry {
                job: job.clone(),
                wallets: claims.into_iter().map(|c| c.wallet).collect(),
                waiters: Vec::new(),
            },
        );
        self.active = Some(id);
        ctx.notify(RunJob { id, plan });
        Ok(job)
    }
}

struct RunJob {
    id: Uuid,
    plan: TransferPlan,
}

impl actix::Message for RunJob {
    type Result = ();
}

impl actix::Handler<RunJob> for JobWorker {
    type Result = ();
    fn handle(&mut self, RunJob { id, plan }: RunJob, ctx: &mut Self::Context) -> Self::Result {
        if let Some(entry) = self.jobs.get_mut(&id) {
            entry.job.state = JobState::Running;
        }
        tracing::info!(
            "running transfer job {}: {} payouts, {} tokens",
            id,
            plan.payouts.len(),
            plan.total
        );
        let executor = self.executor.clone();
        let timeout = self.timeout;
        ctx.spawn(
            async move {
                match tokio::time::timeout(timeout, executor.execute(&plan)).await {
                    Ok(Ok(output)) => JobState::Succeeded { output },
                    Ok(Err(error)) => JobState::Failed {
                        error: format!("{error:#}"),
                    },
                    Err(_) => JobState::Failed {
                        error: format!("timed out after {timeout:?}"),
                    },
                }
            }
            .into_actor(&*self)
            .map(move |state, act, _| act.finish(id, state)),
        );
    }
}

pub struct GetJob {
    pub id: Uuid,
}

impl actix::Message for GetJob {
    type Result = Option<Job>;
}

impl actix::Handler<GetJob> for JobWorker {
    type Result = Option<Job>;
    fn handle(&mut self, msg: GetJob, _: &mut Self::Context) -> Self::Result {
        self.jobs.get(&msg.id).map(|e| e.job.clone())
    }
}

/// Resolves once the job has finished.
pub struct AwaitJob {
    pub id: Uuid,
}

impl actix::Message for AwaitJob {
    type Result = Option<Job>;
}

impl actix::Handler<AwaitJob> for JobWorker {
    type Result = ResponseFuture<Option<Job>>;
    fn handle(&mut self, msg: AwaitJob, _: &mut Self::Context) -> Self::Result {
        match self.jobs.get_mut(&msg.id) {
            None => Box::pin(async { None }),
            Some(entry) if entry.job.state.is_finished() => {
                let job = entry.job.clone();
                Box::pin(async move { Some(job) })
            }
            Some(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                Box::pin(async move { rx.await.ok() })
            }
        }
    }
}
