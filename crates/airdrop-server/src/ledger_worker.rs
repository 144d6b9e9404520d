//! The claim ledger, owned by a single actor.
//!
//! Every ledger operation is a message to [`LedgerWorker`], so the duplicate
//! check and the durable write of an append happen inside one handler and
//! appends are processed one at a time. A caller that gives up waiting does
//! not cancel a message the actor already received.

use actix::{Actor, Addr, Arbiter, MailboxError};
use airdrop_lib::ClaimRecord;
use db::{AppendError, ClaimLedger};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum LedgerError {
    #[error("already claimed")]
    AlreadyClaimed,
    #[error(transparent)]
    Storage(#[from] db::Error),
    #[error("claim ledger unavailable: {0}")]
    Unavailable(#[from] MailboxError),
}

impl From<AppendError> for LedgerError {
    fn from(e: AppendError) -> Self {
        match e {
            AppendError::AlreadyClaimed => LedgerError::AlreadyClaimed,
            AppendError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

pub struct LedgerWorker {
    ledger: ClaimLedger,
}

impl LedgerWorker {
    pub fn new(ledger: ClaimLedger) -> Self {
        Self { ledger }
    }
}

impl Actor for LedgerWorker {
    type Context = actix::Context<Self>;

    fn started(&mut self, _: &mut Self::Context) {
        tracing::info!(
            "started LedgerWorker, {} claims in {}",
            self.ledger.len(),
            self.ledger.path().display()
        );
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::warn!("stopped LedgerWorker");
    }
}

pub struct HasClaimed {
    pub wallet: String,
}

impl actix::Message for HasClaimed {
    type Result = bool;
}

impl actix::Handler<HasClaimed> for LedgerWorker {
    type Result = bool;
    fn handle(&mut self, msg: HasClaimed, _: &mut Self::Context) -> Self::Result {
        self.ledger.has_claimed(&msg.wallet)
    }
}

pub struct AppendClaim {
    pub record: ClaimRecord,
}

impl actix::Message for AppendClaim {
    type Result = Result<ClaimRecord, AppendError>;
}

impl actix::Handler<AppendClaim> for LedgerWorker {
    type Result = Result<ClaimRecord, AppendError>;
    fn handle(&mut self, msg: AppendClaim, _: &mut Self::Context) -> Self::Result {
        let wallet = msg.record.wallet.clone();
        self.ledger.append(msg.record).inspect_err(|error| match error {
            AppendError::AlreadyClaimed => {
                tracing::info!("rejected duplicated claim for {}", wallet)
            }
            AppendError::Storage(error) => {
                tracing::error!("failed to persist claim for {}: {}", wallet, error)
            }
        })
    }
}

pub struct ListClaims;

impl actix::Message for ListClaims {
    type Result = Vec<ClaimRecord>;
}

impl actix::Handler<ListClaims> for LedgerWorker {
    type Result = Vec<ClaimRecord>;
    fn handle(&mut self, _: ListClaims, _: &mut Self::Context) -> Self::Result {
        self.ledger.records().to_vec()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSummary {
    pub claims: usize,
    pub total_claimed: u64,
}

pub struct GetSummary;

impl actix::Message for GetSummary {
    type Result = LedgerSummary;
}

impl actix::Handler<GetSummary> for LedgerWorker {
    type Result = actix::MessageResult<GetSummary>;
    fn handle(&mut self, _: GetSummary, _: &mut Self::Context) -> Self::Result {
        actix::MessageResult(LedgerSummary {
            claims: self.ledger.len(),
            total_claimed: self.ledger.total_claimed(),
        })
    }
}

/// Address of the ledger actor with a bound on every request.
#[derive(Clone)]
pub struct LedgerHandle {
    addr: Addr<LedgerWorker>,
    timeout: Duration,
}

impl LedgerHandle {
    pub fn new(addr: Addr<LedgerWorker>, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Start the worker on a dedicated arbiter.
    pub fn start(ledger: ClaimLedger, timeout: Duration) -> Self {
        let arbiter = Arbiter::new();
        let addr = LedgerWorker::start_in_arbiter(&arbiter.handle(), move |_| {
            LedgerWorker::new(ledger)
        });
        Self::new(addr, timeout)
    }

    pub async fn has_claimed(&self, wallet: &str) -> Result<bool, LedgerError> {
        let msg = HasClaimed {
            wallet: wallet.to_owned(),
        };
        Ok(self.addr.send(msg).timeout(self.timeout).await?)
    }

    pub async fn append(&self, record: ClaimRecord) -> Result<ClaimRecord, LedgerError> {
        Ok(self
            .addr
            .send(AppendClaim { record })
            .timeout(self.timeout)
            .await??)
    }

    pub async fn records(&self) -> Result<Vec<ClaimRecord>, LedgerError> {
        Ok(self.addr.send(ListClaims).timeout(self.timeout).await?)
    }

    pub async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        Ok(self.addr.send(GetSummary).timeout(self.timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(wallet: &str, amount: u64) -> ClaimRecord {
        ClaimRecord {
            wallet: wallet.to_owned(),
            amount,
            timestamp: 0,
            message: "m".to_owned(),
            signature: "s".to_owned(),
            referrer: None,
        }
    }

    #[actix::test]
    async fn test_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ClaimLedger::open(dir.path().join("claims.json")).unwrap();
        let handle = LedgerHandle::start(ledger, Duration::from_secs(5));

        let results = futures_util::future::join_all(
            (0..8).map(|_| handle.append(record("A", 25))),
        )
        .await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::AlreadyClaimed)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);

        assert!(handle.has_claimed("A").await.unwrap());
        assert!(!handle.has_claimed("B").await.unwrap());
        assert_eq!(
            handle.summary().await.unwrap(),
            LedgerSummary {
                claims: 1,
                total_claimed: 25
            }
        );
        assert_eq!(handle.records().await.unwrap(), vec![record("A", 25)]);
    }

    #[actix::test]
    async fn test_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let ledger = ClaimLedger::open(sub.join("claims.json")).unwrap();
        let handle = LedgerHandle::start(ledger, Duration::from_secs(5));
        std::fs::remove_dir_all(&sub).unwrap();

        assert!(matches!(
            handle.append(record("A", 25)).await,
            Err(LedgerError::Storage(_))
        ));
        assert!(!handle.has_claimed("A").await.unwrap());
    }
}
