use airdrop_lib::eligibility::{EligibilityOracle, MonitoredAssets, MonitoredToken};
use anyhow::{bail, ensure};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::{collections::HashMap, sync::atomic::AtomicU64, time::Duration};

pub fn is_pubkey(s: &str) -> Result<&str, anyhow::Error> {
    let mut buf = [0u8; 32];
    let written = bs58::decode(s).into(&mut buf)?;
    ensure!(written == buf.len(), "invalid pubkey");
    Ok(s)
}

#[derive(Deserialize, Clone, Debug)]
pub struct OracleConfig {
    #[serde(default = "OracleConfig::default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "OracleConfig::default_coingecko_url")]
    pub coingecko_url: String,
    /// Fixed USD prices by mint, preferred over CoinGecko.
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    #[serde(flatten)]
    pub assets: MonitoredAssets,
    /// Tokens granted to a wallet that qualifies through its holdings.
    #[serde(default)]
    pub onchain_grant: u64,
    #[serde(default = "OracleConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            rpc_url: Self::default_rpc_url(),
            coingecko_url: Self::default_coingecko_url(),
            prices: HashMap::new(),
            assets: MonitoredAssets::default(),
            onchain_grant: 0,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl OracleConfig {
    pub fn default_rpc_url() -> String {
        "https://api.devnet.solana.com".to_owned()
    }

    pub fn default_coingecko_url() -> String {
        "https://api.coingecko.com/api/v3".to_owned()
    }

    pub fn default_timeout_secs() -> u64 {
        5
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Solana JSON-RPC balances with static or CoinGecko prices.
#[derive(Debug)]
pub struct RpcOracle {
    client: reqwest::Client,
    rpc_url: String,
    coingecko_url: String,
    prices: HashMap<String, Decimal>,
    id: AtomicU64,
}

impl RpcOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &OracleConfig) -> Self {
        Self {
            client,
            rpc_url: config.rpc_url.clone(),
            coingecko_url: config.coingecko_url.trim_end_matches('/').to_owned(),
            prices: config.prices.clone(),
            id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        self.id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            .to_string()
    }

    async fn token_accounts(&self, owner: &str, mint: &str) -> Result<JsonValue, anyhow::Error> {
        is_pubkey(owner)?;
        is_pubkey(mint)?;
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": "getTokenAccountsByOwner",
            "params": [
                owner,
                { "mint": mint },
                { "encoding": "jsonParsed" },
            ],
        });
        let json = self
            .client
            .post(&self.rpc_url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<JsonValue>()
            .await?;
        if let Some(error) = json.get("error") {
            bail!("rpc error: {}", error);
        }
        Ok(json)
    }

    async fn coingecko_price(&self, id: &str) -> Result<Option<Decimal>, anyhow::Error> {
        let url = format!("{}/simple/price", self.coingecko_url);
        let mut resp = self
            .client
            .get(url)
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, HashMap<String, Decimal>>>()
            .await?;
        Ok(resp.remove(id).and_then(|mut m| m.remove("usd")))
    }
}

#[derive(Deserialize)]
struct TokenAmount {
    amount: String,
    decimals: u32,
}

/// Sum `tokenAmount` over every parsed token account in a
/// `getTokenAccountsByOwner` response, matching `mint`.
pub fn sum_token_amounts(resp: &JsonValue, mint: &str) -> Result<Decimal, anyhow::Error> {
    let Some(accounts) = resp.pointer("/result/value").and_then(JsonValue::as_array) else {
        bail!("unexpected response: missing result.value");
    };
    let mut total = Decimal::ZERO;
    for account in accounts {
        let Some(info) = account.pointer("/account/data/parsed/info") else {
            continue;
        };
        if info.get("mint").and_then(JsonValue::as_str) != Some(mint) {
            continue;
        }
        let Some(amount) = info.get("tokenAmount") else {
            continue;
        };
        let TokenAmount { amount, decimals } = serde_json::from_value(amount.clone())?;
        let raw = amount.parse::<i128>()?;
        let Ok(ui) = Decimal::try_from_i128_with_scale(raw, decimals) else {
            bail!("token amount out of range: {} (decimals {})", amount, decimals);
        };
        total = total
            .checked_add(ui)
            .ok_or_else(|| anyhow::anyhow!("token amount overflow"))?;
    }
    Ok(total)
}

#[async_trait]
impl EligibilityOracle for RpcOracle {
    async fn get_holdings(&self, wallet: &str, asset_id: &str) -> Result<Decimal, anyhow::Error> {
        let resp = self.token_accounts(wallet, asset_id).await?;
        sum_token_amounts(&resp, asset_id)
    }

    async fn get_price(&self, token: &MonitoredToken) -> Result<Option<Decimal>, anyhow::Error> {
        if let Some(price) = self.prices.get(&token.mint) {
            return Ok(Some(*price));
        }
        match &token.coingecko_id {
            Some(id) => self.coingecko_price(id).await,
            None => Ok(None),
        }
    }
}
