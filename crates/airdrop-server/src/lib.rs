use actix_web::http::header::HeaderValue;
use airdrop_lib::PoolConfig;
use chain_oracle::OracleConfig;
use db::StorageConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error as ThisError;
use transfer::TransferConfig;

pub mod allocation_cache;
pub mod api;
pub mod coordinator;
pub mod error;
pub mod job_worker;
pub mod ledger_worker;
pub mod middleware;
pub mod transfer;

pub use api::AppState;

/// `pat` may contain `*`, matching a run of ASCII alphanumerics.
fn match_wildcard(pat: &str, origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let mut segments = pat.split('*');
    let Some(mut rest) = segments.next().and_then(|first| origin.strip_prefix(first)) else {
        return false;
    };
    for s in segments.filter(|s| !s.is_empty()) {
        let Some(pos) = rest.find(s) else {
            return false;
        };
        if !rest[..pos].chars().all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
        rest = &rest[pos + s.len()..];
    }
    rest.is_empty() || pat.ends_with('*')
}

#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("error reading config {path}: {error}")]
    Read {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("error parsing config {path}: {error}")]
    Parse {
        path: String,
        #[source]
        error: toml::de::Error,
    },
}

#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Key of the claim proofs. Falls back to `PROOF_SECRET`, then `ADMIN_TOKEN`.
    #[serde(default)]
    pub proof_secret: Option<String>,
    /// Falls back to `ADMIN_TOKEN`. Admin routes are closed when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "Config::default_allocation_refresh_secs")]
    pub allocation_refresh_secs: u64,
    #[serde(default = "Config::default_ledger_timeout_secs")]
    pub ledger_timeout_secs: u64,
    #[serde(default)]
    pub oracle: Option<OracleConfig>,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            cors_origins: Vec::new(),
            pool: PoolConfig::default(),
            storage: StorageConfig::default(),
            proof_secret: None,
            admin_token: None,
            allocation_refresh_secs: Self::default_allocation_refresh_secs(),
            ledger_timeout_secs: Self::default_ledger_timeout_secs(),
            oracle: None,
            transfer: TransferConfig::default(),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn default_host() -> String {
        "127.0.0.1".to_owned()
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub fn default_allocation_refresh_secs() -> u64 {
        60
    }

    pub fn default_ledger_timeout_secs() -> u64 {
        10
    }

    /// Load the config named by the first CLI argument, `-` reads STDIN.
    /// Defaults are only used when no argument is given.
    pub fn get_config() -> Result<Self, ConfigError> {
        Self::from_arg(std::env::args().nth(1))
    }

    pub fn from_arg(arg: Option<String>) -> Result<Self, ConfigError> {
        let Some(path) = arg else {
            tracing::info!("No config specified, using default");
            return Ok(Config::default());
        };
        let text = if path == "-" {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map(|_| buf)
        } else {
            std::fs::read_to_string(&path)
        }
        .map_err(|error| ConfigError::Read {
            path: path.clone(),
            error,
        })?;
        toml::from_str(&text).map_err(|error| ConfigError::Parse { path, error })
    }

    /// Resolve the proof key. Without any configured secret a random one is
    /// generated, so proofs do not survive a restart.
    pub fn proof_secret(&self) -> Vec<u8> {
        let secret = non_empty(self.proof_secret.clone())
            .or_else(|| non_empty(std::env::var("PROOF_SECRET").ok()))
            .or_else(|| non_empty(std::env::var("ADMIN_TOKEN").ok()));
        match secret {
            Some(secret) => secret.into_bytes(),
            None => {
                tracing::warn!("no proof secret configured, using a random one");
                rand::random::<[u8; 32]>().to_vec()
            }
        }
    }

    pub fn admin_token(&self) -> Option<String> {
        non_empty(self.admin_token.clone()).or_else(|| non_empty(std::env::var("ADMIN_TOKEN").ok()))
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    pub fn allocation_refresh_interval(&self) -> Option<Duration> {
        (self.allocation_refresh_secs > 0).then(|| Duration::from_secs(self.allocation_refresh_secs))
    }

    /// Build a CORS middleware.
    pub fn cors(&self) -> actix_cors::Cors {
        let mut cors = actix_cors::Cors::default()
            .allow_any_header()
            .allow_any_method()
            .supports_credentials();
        for origin in &self.cors_origins {
            if origin.contains('*') {
                let pattern = origin.clone();
                cors = cors.allowed_origin_fn(move |origin, _| match_wildcard(&pattern, origin));
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
        cors
    }
}
