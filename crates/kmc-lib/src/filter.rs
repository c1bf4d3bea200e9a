//! Static deny-list of global accounts
//!
//! Runtimes owned by a listed global account are skipped by discovery:
//! they are neither tracked nor queried. The list is loaded once at
//! startup from a YAML file of shape `{globalAccounts: [uuid, ...]}`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct Accounts {
    #[serde(default, rename = "globalAccounts")]
    global_accounts: Vec<String>,
}

/// Set of global account IDs excluded from metering.
#[derive(Debug, Default, Clone)]
pub struct FilterList {
    accounts: HashSet<String>,
}

impl FilterList {
    /// An empty list; used when no filter file is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read filter file {}", path.display()))?;

        Self::from_yaml(&data)
    }

    /// Parse the YAML list. Every entry must be a valid UUID; otherwise the
    /// whole load fails naming the invalid entries.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let parsed: Accounts = serde_yaml::from_str(data).context("failed to parse filter file")?;

        let mut accounts = HashSet::new();
        let mut invalid = Vec::new();

        for account in parsed.global_accounts {
            if Uuid::parse_str(&account).is_err() {
                invalid.push(account);
                continue;
            }

            accounts.insert(account);
        }

        if !invalid.is_empty() {
            anyhow::bail!("invalid global account IDs: {}", invalid.join(", "));
        }

        Ok(Self { accounts })
    }

    pub fn contains(&self, global_account_id: &str) -> bool {
        self.accounts.contains(global_account_id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
