use serde::{Deserialize, Serialize};

pub mod alloc;
pub mod eligibility;
pub mod proof;
pub mod signature;

pub use alloc::{Allocation, AllocationSet, Recipient};
pub use eligibility::{EligibilityOracle, EligibilityResult, MonitoredAssets, Reason};
pub use proof::ProofService;
pub use signature::SignatureError;

/// Size of the distributed pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_total_supply")]
    pub total_supply: u64,
    /// Percent of the total supply, clamped to 100.
    #[serde(default = "PoolConfig::default_airdrop_percent")]
    pub airdrop_percent: u8,
    #[serde(default = "PoolConfig::default_referral_bps")]
    pub referral_bps: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            total_supply: Self::default_total_supply(),
            airdrop_percent: Self::default_airdrop_percent(),
            referral_bps: Self::default_referral_bps(),
        }
    }
}

impl PoolConfig {
    pub fn default_total_supply() -> u64 {
        850_000_000
    }

    pub fn default_airdrop_percent() -> u8 {
        60
    }

    pub fn default_referral_bps() -> u16 {
        2400
    }

    /// `floor(total_supply * airdrop_percent / 100)`
    pub fn pool(&self) -> u64 {
        let percent = u128::from(self.airdrop_percent.min(100));
        (u128::from(self.total_supply) * percent / 100) as u64
    }
}

/// A successful claim, as persisted in the claim ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub wallet: String,
    pub amount: u64,
    /// Unix timestamp in seconds.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub message: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}
