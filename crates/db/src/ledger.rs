//! Append-only claim ledger stored as one JSON document.
//!
//! Every append rewrites the whole file through a temporary file in the same
//! directory followed by a rename, so readers see either the old or the new
//! record set. The in-memory view is only updated once the rename succeeded.

use crate::{Error, Result};
use airdrop_lib::ClaimRecord;
use serde::Serialize;
use std::{
    collections::HashSet,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppendError {
    #[error("already claimed")]
    AlreadyClaimed,
    #[error(transparent)]
    Storage(#[from] Error),
}

/// Replace `path` with the JSON encoding of `value`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(Error::io("create temp file"))?;
    {
        let mut w = BufWriter::new(file.as_file_mut());
        serde_json::to_writer_pretty(&mut w, value).map_err(Error::json("encode"))?;
        w.flush().map_err(Error::io("write temp file"))?;
    }
    file.as_file()
        .sync_all()
        .map_err(Error::io("sync temp file"))?;
    file.persist(path)
        .map_err(|e| e.error)
        .map_err(Error::io("rename temp file"))?;
    Ok(())
}

#[derive(Debug)]
pub struct ClaimLedger {
    path: PathBuf,
    records: Vec<ClaimRecord>,
    claimed: HashSet<String>,
}

impl ClaimLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger, an
    /// unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tracing::info!("opening claim ledger: {}", path.display());
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(Error::io("create ledger directory"))?;
        }

        let records = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Vec<ClaimRecord>>(&bytes)
                .map_err(Error::json("read claims"))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(Error::io("read claims")(error)),
        };

        let mut claimed = HashSet::with_capacity(records.len());
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if claimed.insert(record.wallet.clone()) {
                unique.push(record);
            } else {
                tracing::warn!("duplicated claim for {} in ledger, keeping the first", record.wallet);
            }
        }
        tracing::info!("loaded {} claims", unique.len());

        Ok(Self {
            path,
            records: unique,
            claimed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_claimed(&self, wallet: &str) -> bool {
        self.claimed.contains(wallet)
    }

    pub fn get(&self, wallet: &str) -> Option<&ClaimRecord> {
        if !self.has_claimed(wallet) {
            return None;
        }
        self.records.iter().find(|r| r.wallet == wallet)
    }

    pub fn records(&self) -> &[ClaimRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_claimed(&self) -> u64 {
        self.records
            .iter()
            .map(|r| r.amount)
            .fold(0, u64::saturating_add)
    }

    /// Record a claim. Fails with [`AppendError::AlreadyClaimed`] if the
    /// wallet already has a record; on a storage error nothing changes.
    pub fn append(&mut self, record: ClaimRecord) -> std::result::Result<ClaimRecord, AppendError> {
        if self.has_claimed(&record.wallet) {
            return Err(AppendError::AlreadyClaimed);
        }

        let next = self
            .records
            .iter()
            .chain(std::iter::once(&record))
            .collect::<Vec<_>>();
        write_json_atomic(&self.path, &next)?;

        tracing::info!("recorded claim of {} for {}", record.amount, record.wallet);
        self.claimed.insert(record.wallet.clone());
        self.records.push(record.clone());
        Ok(record)
    }
}
