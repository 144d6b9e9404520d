//! Eligibility queries and claim submission.
//!
//! Both go through [`ClaimCoordinator::entitlement`], so the amount a proof
//! is issued for is the amount a claim is checked against.

use crate::{
    allocation_cache::AllocationCache,
    error::ClaimError,
    ledger_worker::{LedgerHandle, LedgerSummary},
};
use airdrop_lib::{
    ClaimRecord, EligibilityOracle, EligibilityResult, MonitoredAssets, ProofService, Reason,
    eligibility::check_holdings, signature,
};
use chain_oracle::OracleConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

/// Holdings-based grant, used when a wallet qualifies through the oracle.
pub struct OnchainEligibility {
    oracle: Arc<dyn EligibilityOracle>,
    assets: MonitoredAssets,
    grant: u64,
    timeout: Duration,
}

impl OnchainEligibility {
    pub fn new(
        oracle: Arc<dyn EligibilityOracle>,
        assets: MonitoredAssets,
        grant: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            assets,
            grant,
            timeout,
        }
    }

    pub fn from_config(oracle: Arc<dyn EligibilityOracle>, config: &OracleConfig) -> Self {
        Self::new(
            oracle,
            config.assets.clone(),
            config.onchain_grant,
            config.timeout(),
        )
    }

    fn is_active(&self) -> bool {
        self.grant > 0 && !self.assets.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Allocation,
    Onchain,
}

/// What a wallet may claim right now.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    pub amount: u64,
    pub referrer: Option<String>,
    pub source: Source,
    pub onchain: Option<EligibilityResult>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub wallet: String,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_currency: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub reasons: BTreeSet<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_usd: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain: Option<EligibilityResult>,
}

impl Eligibility {
    fn not_eligible(wallet: &str) -> Self {
        Self {
            wallet: wallet.to_owned(),
            eligible: false,
            allocation: None,
            allocation_currency: None,
            proof: None,
            source: None,
            reasons: BTreeSet::new(),
            referrer: None,
            amount_usd: None,
            onchain: None,
        }
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ClaimRequest {
    pub wallet: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub amount: u64,
    pub proof: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    /// Informational only, the stored referrer comes from the allocation.
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub recipients: usize,
    pub pool: u64,
    pub total_allocated: u64,
    pub total_referrals: u64,
    pub residual: u64,
    pub claims: usize,
    pub total_claimed: u64,
}

pub struct ClaimCoordinator {
    proofs: ProofService,
    allocations: Arc<AllocationCache>,
    ledger: LedgerHandle,
    onchain: Option<OnchainEligibility>,
}

fn present(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.trim().is_empty())
}

impl ClaimCoordinator {
    pub fn new(
        proofs: ProofService,
        allocations: Arc<AllocationCache>,
        ledger: LedgerHandle,
        onchain: Option<OnchainEligibility>,
    ) -> Self {
        Self {
            proofs,
            allocations,
            ledger,
            onchain,
        }
    }

    pub fn allocations(&self) -> &Arc<AllocationCache> {
        &self.allocations
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    /// Holdings grant first, then the allocation table. Zero is never claimable.
    ///
    /// A holdings grant carries no referrer: referral payouts are carved out
    /// of a table allocation and the grant is not one.
    pub async fn entitlement(&self, wallet: &str) -> Option<Entitlement> {
        if let Some(onchain) = self.onchain.as_ref().filter(|o| o.is_active()) {
            let result =
                check_holdings(&*onchain.oracle, &onchain.assets, wallet, onchain.timeout).await;
            if result.eligible {
                return Some(Entitlement {
                    amount: onchain.grant,
                    referrer: None,
                    source: Source::Onchain,
                    onchain: Some(result),
                });
            }
        }

        self.allocations
            .snapshot()
            .get(wallet)
            .filter(|a| a.net_amount > 0)
            .map(|a| Entitlement {
                amount: a.net_amount,
                referrer: a.referrer.clone(),
                source: Source::Allocation,
                onchain: None,
            })
    }

    pub async fn eligibility(&self, wallet: &str) -> Result<Eligibility, ClaimError> {
        let wallet = wallet.trim();
        signature::decode_wallet(wallet).map_err(|_| ClaimError::InvalidWallet)?;

        let Some(entitlement) = self.entitlement(wallet).await else {
            return Ok(Eligibility::not_eligible(wallet));
        };
        let (reasons, amount_usd) = match &entitlement.onchain {
            Some(result) => (result.reasons.clone(), Some(result.value_usd)),
            None => (BTreeSet::new(), None),
        };
        Ok(Eligibility {
            wallet: wallet.to_owned(),
            eligible: true,
            allocation: Some(entitlement.amount),
            allocation_currency: Some("TOKEN"),
            proof: Some(self.proofs.issue(wallet, entitlement.amount)),
            source: Some(entitlement.source),
            reasons,
            referrer: entitlement.referrer,
            amount_usd,
            onchain: entitlement.onchain,
        })
    }

    /// Validate and record a claim. Checks run in a fixed order and stop at
    /// the first failure.
    pub async fn claim(&self, req: ClaimRequest) -> Result<ClaimRecord, ClaimError> {
        if !self.proofs.verify(&req.wallet, req.amount, &req.proof) {
            return Err(ClaimError::InvalidProof);
        }

        let (Some(message), Some(sig)) = (present(&req.message), present(&req.signature)) else {
            return Err(ClaimError::MissingSignatureData);
        };
        signature::verify(&req.wallet, message, sig)?;

        if self.ledger.has_claimed(&req.wallet).await? {
            return Err(ClaimError::AlreadyClaimed);
        }

        let entitlement = self
            .entitlement(&req.wallet)
            .await
            .ok_or(ClaimError::NotEligible)?;
        if entitlement.amount != req.amount {
            return Err(ClaimError::AmountMismatch);
        }

        if let Some(referrer) = present(&req.referrer) {
            if entitlement.referrer.as_deref() != Some(referrer) {
                tracing::debug!(
                    "ignoring client referrer {} for {}",
                    referrer,
                    req.wallet
                );
            }
        }

        let record = ClaimRecord {
            amount: req.amount,
            timestamp: chrono::Utc::now().timestamp(),
            message: message.to_owned(),
            signature: sig.to_owned(),
            referrer: entitlement.referrer,
            wallet: req.wallet,
        };
        Ok(self.ledger.append(record).await?)
    }

    pub async fn status(&self) -> Result<Status, ClaimError> {
        let snapshot = self.allocations.snapshot();
        let LedgerSummary {
            claims,
            total_claimed,
        } = self.ledger.summary().await?;
        Ok(Status {
            recipients: snapshot.len(),
            pool: snapshot.pool(),
            total_allocated: snapshot.total_gross(),
            total_referrals: snapshot.total_referrals(),
            residual: snapshot.residual(),
            claims,
            total_claimed,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transfer::TransferPlan;
    use airdrop_lib::{PoolConfig, Recipient, alloc, eligibility::MonitoredToken};
    use async_trait::async_trait;
    use base64::prelude::*;
    use db::{AllocationSource, ClaimLedger, StorageConfig};
    use ed25519_dalek::{Signer, SigningKey};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    pub struct Wallet {
        key: SigningKey,
        pub address: String,
    }

    impl Wallet {
        pub fn new(seed: u8) -> Self {
            let key = SigningKey::from_bytes(&[seed; 32]);
            let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
            Self { key, address }
        }

        pub fn sign(&self, message: &str) -> String {
            BASE64_STANDARD.encode(self.key.sign(message.as_bytes()).to_bytes())
        }
    }

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub coordinator: ClaimCoordinator,
        pub proofs: ProofService,
        pub a: Wallet,
        pub b: Wallet,
        pub c: Wallet,
    }

    impl Fixture {
        /// `[A:1, B:1 referred by A, C:2]` over a pool of 100.
        pub fn new(onchain: Option<OnchainEligibility>) -> Self {
            let (a, b, c) = (Wallet::new(1), Wallet::new(2), Wallet::new(3));
            let dir = tempfile::tempdir().unwrap();
            let storage = StorageConfig {
                recipients: dir.path().join("recipients.json"),
                allocations: None,
                claims: dir.path().join("claims.json"),
            };
            let pool = PoolConfig {
                total_supply: 100,
                airdrop_percent: 100,
                referral_bps: 2400,
            };
            let set = alloc::allocate(
                pool.pool(),
                pool.referral_bps,
                &[
                    Recipient::new(&a.address, dec!(1)),
                    Recipient::new(&b.address, dec!(1)).with_referrer(&a.address),
                    Recipient::new(&c.address, dec!(2)),
                ],
            );
            let cache = AllocationCache::new(AllocationSource::new(&storage, pool), set);
            let ledger = LedgerHandle::start(
                ClaimLedger::open(&storage.claims).unwrap(),
                Duration::from_secs(5),
            );
            let proofs = ProofService::new(b"test secret");
            let coordinator =
                ClaimCoordinator::new(proofs.clone(), Arc::new(cache), ledger, onchain);
            Self {
                dir,
                coordinator,
                proofs,
                a,
                b,
                c,
            }
        }

        pub fn request(&self, wallet: &Wallet, amount: u64) -> ClaimRequest {
            let message = format!("claim {} for {}", amount, wallet.address);
            ClaimRequest {
                wallet: wallet.address.clone(),
                amount,
                proof: self.proofs.issue(&wallet.address, amount),
                signature: Some(wallet.sign(&message)),
                message: Some(message),
                referrer: None,
            }
        }
    }

    #[derive(Default)]
    struct StaticOracle {
        balances: HashMap<(String, String), Decimal>,
        prices: HashMap<String, Decimal>,
    }

    #[async_trait]
    impl EligibilityOracle for StaticOracle {
        async fn get_holdings(
            &self,
            wallet: &str,
            asset_id: &str,
        ) -> Result<Decimal, anyhow::Error> {
            Ok(self
                .balances
                .get(&(wallet.to_owned(), asset_id.to_owned()))
                .copied()
                .unwrap_or_default())
        }

        async fn get_price(
            &self,
            token: &MonitoredToken,
        ) -> Result<Option<Decimal>, anyhow::Error> {
            Ok(self.prices.get(&token.mint).copied())
        }
    }

    #[actix::test]
    async fn test_eligibility_from_table() {
        let f = Fixture::new(None);
        let res = f.coordinator.eligibility(&f.b.address).await.unwrap();
        assert!(res.eligible);
        assert_eq!(res.allocation, Some(19));
        assert_eq!(res.referrer.as_deref(), Some(f.a.address.as_str()));
        assert_eq!(res.source, Some(Source::Allocation));
        assert!(f.proofs.verify(&f.b.address, 19, res.proof.as_deref().unwrap()));

        let res = f.coordinator.eligibility(&f.a.address).await.unwrap();
        assert_eq!(res.allocation, Some(25));

        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["allocation_currency"], "TOKEN");
        assert!(json.get("onchain").is_none());
    }

    #[actix::test]
    async fn test_unknown_wallet() {
        let f = Fixture::new(None);
        let stranger = Wallet::new(9);
        let res = f.coordinator.eligibility(&stranger.address).await.unwrap();
        assert_eq!(res, Eligibility::not_eligible(&stranger.address));
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            serde_json::json!({"wallet": stranger.address, "eligible": false})
        );

        // a self-issued proof does not help without an allocation
        let err = f.coordinator.claim(f.request(&stranger, 10)).await.unwrap_err();
        assert!(matches!(err, ClaimError::NotEligible));

        assert!(matches!(
            f.coordinator.eligibility("not-a-wallet").await,
            Err(ClaimError::InvalidWallet)
        ));
    }

    #[actix::test]
    async fn test_claim_once() {
        let f = Fixture::new(None);
        let record = f.coordinator.claim(f.request(&f.b, 19)).await.unwrap();
        assert_eq!(record.wallet, f.b.address);
        assert_eq!(record.amount, 19);
        assert_eq!(record.referrer.as_deref(), Some(f.a.address.as_str()));

        let err = f.coordinator.claim(f.request(&f.b, 19)).await.unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed));

        let stored: Vec<ClaimRecord> =
            serde_json::from_slice(&std::fs::read(f.dir.path().join("claims.json")).unwrap())
                .unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[actix::test]
    async fn test_second_claim_with_other_amount() {
        let f = Fixture::new(None);
        f.coordinator.claim(f.request(&f.a, 25)).await.unwrap();
        // validly proved, but a different amount
        let err = f.coordinator.claim(f.request(&f.a, 30)).await.unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed));
    }

    #[actix::test]
    async fn test_amount_mismatch() {
        let f = Fixture::new(None);
        let err = f.coordinator.claim(f.request(&f.c, 49)).await.unwrap_err();
        assert!(matches!(err, ClaimError::AmountMismatch));
        // gross instead of net
        let err = f.coordinator.claim(f.request(&f.b, 25)).await.unwrap_err();
        assert!(matches!(err, ClaimError::AmountMismatch));
        f.coordinator.claim(f.request(&f.c, 50)).await.unwrap();
    }

    #[actix::test]
    async fn test_rejections_in_order() {
        let f = Fixture::new(None);

        let mut req = f.request(&f.a, 25);
        req.proof = f.proofs.issue(&f.a.address, 26);
        req.message = None;
        assert!(matches!(
            f.coordinator.claim(req).await,
            Err(ClaimError::InvalidProof)
        ));

        let mut req = f.request(&f.a, 25);
        req.signature = Some(String::new());
        assert!(matches!(
            f.coordinator.claim(req).await,
            Err(ClaimError::MissingSignatureData)
        ));

        let mut req = f.request(&f.a, 25);
        req.signature = Some("%%%".to_owned());
        assert!(matches!(
            f.coordinator.claim(req).await,
            Err(ClaimError::InvalidEncoding(
                airdrop_lib::SignatureError::InvalidSignatureEncoding
            ))
        ));

        let mut req = f.request(&f.a, 25);
        req.message = Some("something else".to_owned());
        assert!(matches!(
            f.coordinator.claim(req).await,
            Err(ClaimError::SignatureMismatch)
        ));

        // signed by another wallet
        let mut req = f.request(&f.a, 25);
        req.signature = Some(f.b.sign(req.message.as_deref().unwrap()));
        assert!(matches!(
            f.coordinator.claim(req).await,
            Err(ClaimError::SignatureMismatch)
        ));

        // none of the above consumed the claim
        f.coordinator.claim(f.request(&f.a, 25)).await.unwrap();
    }

    #[actix::test]
    async fn test_client_referrer_ignored() {
        let f = Fixture::new(None);
        let mut req = f.request(&f.c, 50);
        req.referrer = Some(f.a.address.clone());
        let record = f.coordinator.claim(req).await.unwrap();
        assert_eq!(record.referrer, None);
    }

    #[actix::test]
    async fn test_concurrent_claims() {
        let f = Fixture::new(None);
        let results = futures_util::future::join_all(
            (0..6).map(|_| f.coordinator.claim(f.request(&f.c, 50))),
        )
        .await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ClaimError::AlreadyClaimed)))
                .count(),
            5
        );
    }

    #[actix::test]
    async fn test_storage_failure_reported() {
        let f = Fixture::new(None);
        let path = f.dir.path().join("claims.json");
        // a directory where the ledger file should be makes the rename fail
        std::fs::create_dir(&path).unwrap();
        let err = f.coordinator.claim(f.request(&f.a, 25)).await.unwrap_err();
        assert!(matches!(err, ClaimError::Storage(_)));

        std::fs::remove_dir(&path).unwrap();
        f.coordinator.claim(f.request(&f.a, 25)).await.unwrap();
    }

    #[actix::test]
    async fn test_status() {
        let f = Fixture::new(None);
        f.coordinator.claim(f.request(&f.b, 19)).await.unwrap();
        let status = f.coordinator.status().await.unwrap();
        assert_eq!(
            status,
            Status {
                recipients: 3,
                pool: 100,
                total_allocated: 100,
                total_referrals: 6,
                residual: 0,
                claims: 1,
                total_claimed: 19,
            }
        );
    }

    const NFT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn onchain(holder: &Wallet, grant: u64) -> OnchainEligibility {
        let mut oracle = StaticOracle::default();
        oracle
            .balances
            .insert((holder.address.clone(), NFT.to_owned()), dec!(1));
        oracle
            .balances
            .insert((holder.address.clone(), USDC.to_owned()), dec!(250));
        oracle.prices.insert(USDC.to_owned(), dec!(1));
        OnchainEligibility::new(
            Arc::new(oracle),
            MonitoredAssets {
                tokens: vec![MonitoredToken {
                    mint: USDC.to_owned(),
                    coingecko_id: None,
                }],
                nfts: vec![NFT.to_owned()],
                min_value_usd: dec!(100),
            },
            grant,
            Duration::from_secs(1),
        )
    }

    #[actix::test]
    async fn test_onchain_grant() {
        let holder = Wallet::new(7);
        let f = Fixture::new(Some(onchain(&holder, 1000)));

        let res = f.coordinator.eligibility(&holder.address).await.unwrap();
        assert!(res.eligible);
        assert_eq!(res.allocation, Some(1000));
        assert_eq!(res.source, Some(Source::Onchain));
        assert_eq!(res.amount_usd, Some(dec!(250)));
        assert_eq!(
            res.reasons,
            BTreeSet::from([Reason::TokenValue, Reason::NftOwned])
        );

        let mut req = f.request(&holder, 1000);
        req.proof = res.proof.unwrap();
        let record = f.coordinator.claim(req).await.unwrap();
        assert_eq!(record.amount, 1000);

        // table wallets without holdings fall back to their allocation
        let res = f.coordinator.eligibility(&f.c.address).await.unwrap();
        assert_eq!(res.allocation, Some(50));
        assert_eq!(res.source, Some(Source::Allocation));
    }

    #[actix::test]
    async fn test_onchain_grant_has_no_referral() {
        // B has a referred table row and also qualifies through holdings
        let b = Wallet::new(2);
        let f = Fixture::new(Some(onchain(&b, 1000)));

        let res = f.coordinator.eligibility(&f.b.address).await.unwrap();
        assert_eq!(res.allocation, Some(1000));
        assert_eq!(res.referrer, None);

        let mut req = f.request(&f.b, 1000);
        req.proof = res.proof.unwrap();
        let record = f.coordinator.claim(req).await.unwrap();
        assert_eq!(record.referrer, None);

        let claims = f.coordinator.ledger().records().await.unwrap();
        let plan = TransferPlan::build(&claims, &f.coordinator.allocations().snapshot());
        assert_eq!(plan.payouts.len(), 1);
        assert_eq!(plan.total, 1000);
    }

    #[actix::test]
    async fn test_zero_grant_disables_onchain() {
        let holder = Wallet::new(7);
        let f = Fixture::new(Some(onchain(&holder, 0)));
        let res = f.coordinator.eligibility(&holder.address).await.unwrap();
        assert!(!res.eligible);
        let err = f.coordinator.claim(f.request(&holder, 0)).await.unwrap_err();
        assert!(matches!(err, ClaimError::NotEligible));
    }
}
