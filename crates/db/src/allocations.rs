//! Loading recipients and allocation tables from disk.

use crate::{Error, Result, config::StorageConfig, ledger::write_json_atomic};
use airdrop_lib::{Allocation, AllocationSet, PoolConfig, Recipient, alloc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct RecipientRow {
    wallet: String,
    /// Kept as the literal JSON token so numbers never pass through `f64`.
    #[serde(default)]
    weight: Option<Box<RawValue>>,
    #[serde(default)]
    referrer: Option<String>,
}

/// The weight as text: strings unquoted, numbers verbatim.
fn weight_text(raw: &RawValue) -> String {
    let token = raw.get().trim();
    if token.starts_with('"') {
        serde_json::from_str::<String>(token).unwrap_or_else(|_| token.to_owned())
    } else {
        token.to_owned()
    }
}

/// One row of a precomputed allocation table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AllocationRow {
    pub wallet: String,
    pub gross: u64,
    pub net: u64,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub referral_amount: u64,
}

impl From<&Allocation> for AllocationRow {
    fn from(a: &Allocation) -> Self {
        Self {
            wallet: a.wallet.clone(),
            gross: a.gross_amount,
            net: a.net_amount,
            referrer: a.referrer.clone().unwrap_or_default(),
            referral_amount: a.referral_amount,
        }
    }
}

pub struct LoadedRecipients {
    pub recipients: Vec<Recipient>,
    /// Rows dropped because of a malformed or negative weight.
    pub rejected: usize,
}

fn read_file(path: &Path, context: &'static str) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(Error::io(context)(error)),
    }
}

/// Read the weighted recipient list. A missing file yields no recipients.
pub fn read_recipients(path: &Path) -> Result<LoadedRecipients> {
    let Some(bytes) = read_file(path, "read recipients")? else {
        tracing::warn!("recipients file not found: {}", path.display());
        return Ok(LoadedRecipients {
            recipients: Vec::new(),
            rejected: 0,
        });
    };
    let rows: Vec<RecipientRow> =
        serde_json::from_slice(&bytes).map_err(Error::json("parse recipients"))?;

    let mut recipients = Vec::with_capacity(rows.len());
    let mut rejected = 0;
    for row in rows {
        let weight = row.weight.as_deref().map(weight_text);
        match Recipient::parse(&row.wallet, weight.as_deref(), row.referrer.as_deref()) {
            Ok(r) => recipients.push(r),
            Err(error) => {
                tracing::warn!("skipping recipient {}: {}", row.wallet, error);
                rejected += 1;
            }
        }
    }
    Ok(LoadedRecipients {
        recipients,
        rejected,
    })
}

/// Read a precomputed allocation table, dropping rows whose amounts do not add up.
/// A table handing out more than `pool` is rejected as a whole.
pub fn read_allocations(path: &Path, pool: u64) -> Result<Option<AllocationSet>> {
    let Some(bytes) = read_file(path, "read allocations")? else {
        return Ok(None);
    };
    let rows: Vec<AllocationRow> =
        serde_json::from_slice(&bytes).map_err(Error::json("parse allocations"))?;
    let allocations = rows.into_iter().filter_map(|row| {
        let referrer = Some(row.referrer.trim().to_owned()).filter(|s| !s.is_empty());
        Allocation::from_parts(
            row.wallet.trim().to_owned(),
            row.gross,
            row.net,
            referrer,
            row.referral_amount,
        )
        .inspect_err(|error| tracing::warn!("skipping allocation row: {}", error))
        .ok()
    });
    let set = AllocationSet::from_allocations(pool, allocations);
    let total = set.total_gross();
    if total > pool {
        return Err(Error::PoolExceeded {
            total,
            pool,
            location: std::panic::Location::caller(),
        });
    }
    Ok(Some(set))
}

pub fn write_allocations(path: &Path, set: &AllocationSet) -> Result<()> {
    let rows = set.iter().map(AllocationRow::from).collect::<Vec<_>>();
    write_json_atomic(path, &rows)
}

/// Where the authoritative allocation table comes from.
#[derive(Clone, Debug)]
pub struct AllocationSource {
    recipients: PathBuf,
    precomputed: Option<PathBuf>,
    pool: PoolConfig,
}

impl AllocationSource {
    pub fn new(storage: &StorageConfig, pool: PoolConfig) -> Self {
        Self {
            recipients: storage.recipients.clone(),
            precomputed: storage.allocations.clone(),
            pool,
        }
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Build a complete allocation set, preferring the precomputed table.
    pub fn load(&self) -> Result<AllocationSet> {
        if let Some(path) = &self.precomputed {
            if let Some(set) = read_allocations(path, self.pool.pool())? {
                tracing::info!(
                    "loaded {} precomputed allocations from {}",
                    set.len(),
                    path.display()
                );
                return Ok(set);
            }
        }

        let loaded = read_recipients(&self.recipients)?;
        if loaded.rejected > 0 {
            tracing::warn!("rejected {} recipient rows", loaded.rejected);
        }
        let set = alloc::allocate(
            self.pool.pool(),
            self.pool.referral_bps,
            &loaded.recipients,
        );
        tracing::info!(
            "computed {} allocations, {} of {} allocated",
            set.len(),
            set.total_gross(),
            set.pool()
        );
        Ok(set)
    }

    /// Persist `set` as the precomputed table, if one is configured.
    pub fn export(&self, set: &AllocationSet) -> Result<Option<PathBuf>> {
        match &self.precomputed {
            Some(path) => {
                write_allocations(path, set)?;
                Ok(Some(path.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pool_100() -> PoolConfig {
        PoolConfig {
            total_supply: 100,
            airdrop_percent: 100,
            referral_bps: 2400,
        }
    }

    #[test]
    fn test_read_recipients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipients.json");
        std::fs::write(
            &path,
            r#"[
                {"wallet": "A", "weight": 1},
                {"wallet": "B", "weight": "1", "referrer": "A"},
                {"wallet": "C", "weight": 2.0},
                {"wallet": "D", "weight": "lots"},
                {"wallet": "E", "weight": -3},
                {"wallet": "F"},
                {"wallet": "G", "weight": "0.5", "referrer": ""},
                {"wallet": "H", "weight": 1.0000000000000000001},
                {"wallet": "I", "weight": true}
            ]"#,
        )
        .unwrap();
        let loaded = read_recipients(&path).unwrap();
        assert_eq!(loaded.rejected, 3);
        let weights = loaded
            .recipients
            .iter()
            .map(|r| (r.wallet.as_str(), r.weight))
            .collect::<Vec<_>>();
        assert_eq!(
            weights,
            vec![
                ("A", dec!(1)),
                ("B", dec!(1)),
                ("C", dec!(2)),
                ("F", dec!(1)),
                ("G", dec!(0.5)),
                ("H", dec!(1.0000000000000000001)),
            ]
        );
        assert_eq!(loaded.recipients[1].referrer.as_deref(), Some("A"));
        assert_eq!(loaded.recipients[4].referrer, None);
    }

    #[test]
    fn test_missing_recipients() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = read_recipients(&dir.path().join("none.json")).unwrap();
        assert!(loaded.recipients.is_empty());
    }

    #[test]
    fn test_load_computes_when_no_table() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            recipients: dir.path().join("recipients.json"),
            allocations: Some(dir.path().join("allocations.json")),
            claims: dir.path().join("claims.json"),
        };
        std::fs::write(
            &storage.recipients,
            r#"[{"wallet":"A","weight":1},{"wallet":"B","weight":1,"referrer":"A"},{"wallet":"C","weight":2}]"#,
        )
        .unwrap();
        let source = AllocationSource::new(&storage, pool_100());
        let set = source.load().unwrap();
        assert_eq!(set.get("A").unwrap().net_amount, 25);
        assert_eq!(set.get("B").unwrap().net_amount, 19);
        assert_eq!(set.get("C").unwrap().net_amount, 50);

        // once exported, the table is preferred over the recipients file
        assert_eq!(
            source.export(&set).unwrap().as_deref(),
            storage.allocations.as_deref()
        );
        std::fs::write(&storage.recipients, r#"[{"wallet":"Z","weight":1}]"#).unwrap();
        let reloaded = source.load().unwrap();
        assert_eq!(reloaded, set);
    }

    #[test]
    fn test_inconsistent_rows_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allocations.json");
        std::fs::write(
            &path,
            r#"[
                {"wallet":"A","gross":25,"net":25},
                {"wallet":"B","gross":25,"net":19,"referrer":"A","referral_amount":6},
                {"wallet":"C","gross":50,"net":49}
            ]"#,
        )
        .unwrap();
        let set = read_allocations(&path, 100).unwrap().unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.get("C").is_none());
        assert_eq!(set.get("B").unwrap().referrer.as_deref(), Some("A"));
        assert_eq!(set.referral_totals()["A"], 6);
    }

    #[test]
    fn test_table_over_pool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            recipients: dir.path().join("recipients.json"),
            allocations: Some(dir.path().join("allocations.json")),
            claims: dir.path().join("claims.json"),
        };
        std::fs::write(
            storage.allocations.as_ref().unwrap(),
            r#"[{"wallet":"A","gross":900,"net":900},{"wallet":"B","gross":900,"net":900}]"#,
        )
        .unwrap();
        assert!(matches!(
            read_allocations(storage.allocations.as_ref().unwrap(), 100),
            Err(Error::PoolExceeded {
                total: 1800,
                pool: 100,
                ..
            })
        ));
        // no fallback to the recipients file either
        let source = AllocationSource::new(&storage, pool_100());
        assert!(source.load().is_err());
    }
}
