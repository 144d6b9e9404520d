//! Proportional pool allocation and referral carve-outs.
//!
//! All share math is done with [`Decimal`], amounts are whole tokens.

use indexmap::IndexMap;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error as ThisError;

pub const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub wallet: String,
    pub weight: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum WeightError {
    #[error("malformed weight: {0:?}")]
    Malformed(String),
    #[error("negative weight: {0}")]
    Negative(Decimal),
}

impl Recipient {
    pub fn new(wallet: impl Into<String>, weight: Decimal) -> Self {
        Self {
            wallet: wallet.into(),
            weight,
            referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Parse a raw input row. A missing or blank weight counts as `1`,
    /// anything else must be a non-negative decimal.
    pub fn parse(
        wallet: &str,
        weight: Option<&str>,
        referrer: Option<&str>,
    ) -> Result<Self, WeightError> {
        let weight = match weight.map(str::trim) {
            None | Some("") => Decimal::ONE,
            Some(s) => Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .map_err(|_| WeightError::Malformed(s.to_owned()))?,
        };
        if weight < Decimal::ZERO {
            return Err(WeightError::Negative(weight));
        }
        Ok(Self {
            wallet: wallet.trim().to_owned(),
            weight,
            referrer: referrer
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub wallet: String,
    pub gross_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub referral_amount: u64,
    pub net_amount: u64,
}

#[derive(ThisError, Debug, PartialEq, Eq)]
#[error("inconsistent allocation for {wallet}: gross {gross} != net {net} + referral {referral}")]
pub struct InconsistentAllocation {
    pub wallet: String,
    pub gross: u64,
    pub net: u64,
    pub referral: u64,
}

impl Allocation {
    /// Rebuild an allocation from stored columns, rejecting rows that do not add up.
    pub fn from_parts(
        wallet: String,
        gross_amount: u64,
        net_amount: u64,
        referrer: Option<String>,
        referral_amount: u64,
    ) -> Result<Self, InconsistentAllocation> {
        if net_amount.checked_add(referral_amount) != Some(gross_amount) {
            return Err(InconsistentAllocation {
                wallet,
                gross: gross_amount,
                net: net_amount,
                referral: referral_amount,
            });
        }
        Ok(Self {
            wallet,
            gross_amount,
            referrer,
            referral_amount,
            net_amount,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralSplit {
    pub referral_amount: u64,
    pub net_amount: u64,
}

/// Carve the referral payout out of `gross`. Without a referrer the whole
/// gross amount is the net amount.
pub fn split_referral(gross: u64, referrer: Option<&str>, bps: u16) -> ReferralSplit {
    if referrer.is_none() {
        return ReferralSplit {
            referral_amount: 0,
            net_amount: gross,
        };
    }
    let bps = u64::from(bps).min(BPS_DENOMINATOR);
    // gross * bps fits in u128 for every u64 gross
    let referral_amount = (u128::from(gross) * u128::from(bps) / u128::from(BPS_DENOMINATOR)) as u64;
    ReferralSplit {
        referral_amount,
        net_amount: gross - referral_amount,
    }
}

fn floor_share(pool: Decimal, weight: Decimal, total: Decimal) -> u64 {
    let scaled = pool.checked_mul(weight);
    let share = scaled
        .and_then(|p| p.checked_div(total))
        .or_else(|| weight.checked_div(total).and_then(|s| pool.checked_mul(s)))
        .unwrap_or(Decimal::ZERO);
    let mut amount = share.floor();
    // division rounds to 28 significant digits, which may land exactly on the next integer
    if let (Some(scaled), Some(back)) = (scaled, amount.checked_mul(total)) {
        if back > scaled && amount > Decimal::ZERO {
            amount -= Decimal::ONE;
        }
    }
    amount.to_u64().unwrap_or(0)
}

/// Gross amount per wallet: `floor(pool * weight / total_weight)`.
///
/// Returns an empty map when the total weight is not positive. The map keeps
/// the first-seen order of wallets; a duplicated wallet keeps its first
/// position and the value of its last row.
pub fn compute_allocations(pool: u64, recipients: &[Recipient]) -> IndexMap<String, u64> {
    let Some(total) = recipients
        .iter()
        .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.weight))
    else {
        tracing::error!("total weight overflowed, refusing to allocate");
        return IndexMap::new();
    };
    if total <= Decimal::ZERO {
        return IndexMap::new();
    }

    let pool = Decimal::from(pool);
    let mut out = IndexMap::with_capacity(recipients.len());
    for r in recipients {
        let amount = floor_share(pool, r.weight, total);
        if out.insert(r.wallet.clone(), amount).is_some() {
            tracing::warn!("duplicated recipient {}, last row wins", r.wallet);
        }
    }
    out
}

/// The full allocation table for one pool.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationSet {
    pool: u64,
    allocations: IndexMap<String, Allocation>,
}

impl AllocationSet {
    pub fn from_allocations<I>(pool: u64, allocations: I) -> Self
    where
        I: IntoIterator<Item = Allocation>,
    {
        let allocations = allocations
            .into_iter()
            .map(|a| (a.wallet.clone(), a))
            .collect();
        Self { pool, allocations }
    }

    pub fn pool(&self) -> u64 {
        self.pool
    }

    pub fn get(&self, wallet: &str) -> Option<&Allocation> {
        self.allocations.get(wallet)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    pub fn total_gross(&self) -> u64 {
        self.iter().map(|a| a.gross_amount).fold(0, u64::saturating_add)
    }

    pub fn total_net(&self) -> u64 {
        self.iter().map(|a| a.net_amount).fold(0, u64::saturating_add)
    }

    pub fn total_referrals(&self) -> u64 {
        self.iter()
            .map(|a| a.referral_amount)
            .fold(0, u64::saturating_add)
    }

    /// Tokens left in the pool by per-recipient truncation.
    pub fn residual(&self) -> u64 {
        self.pool.saturating_sub(self.total_gross())
    }

    /// Referral payouts grouped by referrer. No cap is applied.
    pub fn referral_totals(&self) -> IndexMap<String, u64> {
        let mut totals = IndexMap::<String, u64>::new();
        for a in self.iter() {
            if let Some(referrer) = &a.referrer {
                if a.referral_amount > 0 {
                    let entry = totals.entry(referrer.clone()).or_default();
                    *entry = entry.saturating_add(a.referral_amount);
                }
            }
        }
        totals
    }
}

/// Compute gross shares and apply the referral split to each of them.
pub fn allocate(pool: u64, referral_bps: u16, recipients: &[Recipient]) -> AllocationSet {
    let gross = compute_allocations(pool, recipients);
    let referrers = recipients
        .iter()
        .map(|r| (r.wallet.as_str(), r.referrer.as_deref()))
        .collect::<IndexMap<_, _>>();
    let allocations = gross.into_iter().map(|(wallet, gross_amount)| {
        let referrer = referrers.get(wallet.as_str()).copied().flatten();
        let split = split_referral(gross_amount, referrer, referral_bps);
        Allocation {
            referrer: referrer.map(str::to_owned),
            wallet,
            gross_amount,
            referral_amount: split.referral_amount,
            net_amount: split.net_amount,
        }
    });
    AllocationSet::from_allocations(pool, allocations)
}
