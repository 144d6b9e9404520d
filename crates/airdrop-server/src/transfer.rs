//! Payout plans and the executors that carry them out.

use airdrop_lib::{AllocationSet, ClaimRecord};
use anyhow::{Context, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::io::AsyncWriteExt;

#[derive(Deserialize, Clone, Debug)]
pub struct TransferConfig {
    /// Program and arguments receiving the plan as JSON on stdin. Without
    /// a command, runs only log the plan.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default = "TransferConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long finished jobs stay queryable.
    #[serde(default = "TransferConfig::default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: Self::default_timeout_secs(),
            retention_secs: Self::default_retention_secs(),
        }
    }
}

impl TransferConfig {
    pub fn default_timeout_secs() -> u64 {
        300
    }

    pub fn default_retention_secs() -> u64 {
        3600
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn executor(&self) -> Result<Arc<dyn TransferExecutor>, anyhow::Error> {
        match self.command.as_deref() {
            None => Ok(Arc::new(DryRun)),
            Some([]) => bail!("empty transfer command"),
            Some([program, args @ ..]) => Ok(Arc::new(CommandExecutor::new(
                program.clone(),
                args.to_vec(),
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Claim,
    Referral,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub wallet: String,
    pub amount: u64,
    pub kind: PayoutKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    pub payouts: Vec<Payout>,
    pub total: u64,
}

impl TransferPlan {
    /// One payout per claim, plus the referral share of every claimed
    /// allocation grouped by referrer. A referral is only paid for a claim of
    /// the allocation's net amount, the share it was carved out of.
    pub fn build(claims: &[ClaimRecord], allocations: &AllocationSet) -> Self {
        let mut payouts = Vec::with_capacity(claims.len());
        let mut referrals = IndexMap::<String, u64>::new();
        for claim in claims {
            if claim.amount == 0 {
                continue;
            }
            payouts.push(Payout {
                wallet: claim.wallet.clone(),
                amount: claim.amount,
                kind: PayoutKind::Claim,
            });
            let Some(referrer) = &claim.referrer else {
                continue;
            };
            if let Some(a) = allocations.get(&claim.wallet) {
                if a.referral_amount > 0 && a.net_amount == claim.amount {
                    let total = referrals.entry(referrer.clone()).or_default();
                    *total = total.saturating_add(a.referral_amount);
                }
            }
        }
        payouts.extend(referrals.into_iter().map(|(wallet, amount)| Payout {
            wallet,
            amount,
            kind: PayoutKind::Referral,
        }));
        let total = payouts
            .iter()
            .map(|p| p.amount)
            .fold(0, u64::saturating_add);
        Self { payouts, total }
    }

    pub fn is_empty(&self) -> bool {
        self.payouts.is_empty()
    }
}

#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Carry out `plan`, returning a short report.
    async fn execute(&self, plan: &TransferPlan) -> Result<String, anyhow::Error>;
}

/// Logs the plan instead of executing it.
pub struct DryRun;

#[async_trait]
impl TransferExecutor for DryRun {
    async fn execute(&self, plan: &TransferPlan) -> Result<String, anyhow::Error> {
        for p in &plan.payouts {
            tracing::info!("dry run: {:?} {} to {}", p.kind, p.amount, p.wallet);
        }
        Ok(format!(
            "dry run: {} payouts, {} tokens",
            plan.payouts.len(),
            plan.total
        ))
    }
}

/// Runs an external program with the plan as JSON on stdin.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl TransferExecutor for CommandExecutor {
    async fn execute(&self, plan: &TransferPlan) -> Result<String, anyhow::Error> {
        let input = serde_json::to_vec(plan)?;
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let mut stdin = child.stdin.take().context("no stdin")?;
        stdin.write_all(&input).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
