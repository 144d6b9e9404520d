//! Holdings-based eligibility.
//!
//! Oracle failures and timeouts never make a wallet eligible: an asset whose
//! balance or price cannot be fetched contributes nothing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, time::Duration};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    TokenValue,
    NftOwned,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitoredToken {
    pub mint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coingecko_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitoredAssets {
    #[serde(default)]
    pub tokens: Vec<MonitoredToken>,
    #[serde(default)]
    pub nfts: Vec<String>,
    #[serde(default = "MonitoredAssets::default_min_value_usd")]
    pub min_value_usd: Decimal,
}

impl Default for MonitoredAssets {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            nfts: Vec::new(),
            min_value_usd: Self::default_min_value_usd(),
        }
    }
}

impl MonitoredAssets {
    pub fn default_min_value_usd() -> Decimal {
        Decimal::ONE_HUNDRED
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.nfts.is_empty()
    }
}

/// Source of on-chain holdings and prices.
#[async_trait]
pub trait EligibilityOracle: Send + Sync {
    /// UI amount (decimals applied) of `asset_id` held by `wallet`.
    async fn get_holdings(&self, wallet: &str, asset_id: &str) -> Result<Decimal, anyhow::Error>;

    /// USD price of one token, `None` if the asset has no known price.
    async fn get_price(&self, token: &MonitoredToken) -> Result<Option<Decimal>, anyhow::Error>;
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TokenHolding {
    pub mint: String,
    pub balance: Option<Decimal>,
    pub price: Option<Decimal>,
    pub value: Option<Decimal>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NftHolding {
    pub mint: String,
    pub owns: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub reasons: BTreeSet<Reason>,
    pub value_usd: Decimal,
    pub tokens: Vec<TokenHolding>,
    pub nfts: Vec<NftHolding>,
}

async fn bounded<T, F>(what: &str, asset: &str, timeout: Duration, fut: F) -> Option<T>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            tracing::warn!("oracle {} failed for {}: {}", what, asset, error);
            None
        }
        Err(_) => {
            tracing::warn!("oracle {} timed out for {}", what, asset);
            None
        }
    }
}

/// Query every monitored asset for `wallet`, each call bounded by `timeout`.
pub async fn check_holdings(
    oracle: &dyn EligibilityOracle,
    assets: &MonitoredAssets,
    wallet: &str,
    timeout: Duration,
) -> EligibilityResult {
    let mut result = EligibilityResult::default();

    for token in &assets.tokens {
        let balance = bounded(
            "holdings",
            &token.mint,
            timeout,
            oracle.get_holdings(wallet, &token.mint),
        )
        .await;
        let price = bounded("price", &token.mint, timeout, oracle.get_price(token))
            .await
            .flatten();
        let value = balance.zip(price).and_then(|(b, p)| b.checked_mul(p));
        if let Some(value) = value {
            result.value_usd = result.value_usd.saturating_add(value);
        }
        result.tokens.push(TokenHolding {
            mint: token.mint.clone(),
            balance,
            price,
            value,
        });
    }

    for mint in &assets.nfts {
        let owns = bounded("holdings", mint, timeout, oracle.get_holdings(wallet, mint))
            .await
            .is_some_and(|balance| balance >= Decimal::ONE);
        result.nfts.push(NftHolding {
            mint: mint.clone(),
            owns,
        });
    }

    if result.value_usd > Decimal::ZERO && result.value_usd >= assets.min_value_usd {
        result.reasons.insert(Reason::TokenValue);
    }
    if result.nfts.iter().any(|n| n.owns) {
        result.reasons.insert(Reason::NftOwned);
    }
    result.eligible = !result.reasons.is_empty();
    result
}
