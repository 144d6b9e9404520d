use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Clone, Debug)]
pub struct StorageConfig {
    /// Weighted recipient list, JSON array of `{wallet, weight?, referrer?}`.
    #[serde(default = "StorageConfig::default_recipients")]
    pub recipients: PathBuf,
    /// Precomputed allocation table, used instead of `recipients` when the file exists.
    #[serde(default = "StorageConfig::default_allocations")]
    pub allocations: Option<PathBuf>,
    #[serde(default = "StorageConfig::default_claims")]
    pub claims: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recipients: Self::default_recipients(),
            allocations: Self::default_allocations(),
            claims: Self::default_claims(),
        }
    }
}

impl StorageConfig {
    pub fn default_recipients() -> PathBuf {
        PathBuf::from("./outputs/recipients.json")
    }

    pub fn default_allocations() -> Option<PathBuf> {
        Some(PathBuf::from("./outputs/allocations_live.json"))
    }

    pub fn default_claims() -> PathBuf {
        PathBuf::from("./outputs/claims.json")
    }
}
