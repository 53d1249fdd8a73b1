use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use thiserror::Error;
use tracing::{info, warn};

/// One connected seller account, as seen by the engine.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    pub slug: String,
    pub user_id: String,
}

/// Resolved access for one outbound call. Tokens are read-only here; refresh
/// happens behind the broker.
#[derive(Debug, Clone)]
pub struct AccountAccess {
    pub slug: String,
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("account `{0}` is not connected")]
    UnknownAccount(String),
    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

/// Directory of connected accounts and their access credentials. Credential
/// acquisition and refresh live entirely behind this seam; the engine only
/// reads.
#[async_trait]
pub trait AccessBroker: Send + Sync {
    async fn connected_accounts(&self) -> Result<Vec<AccountHandle>, BrokerError>;

    async fn access(&self, slug: &str) -> Result<AccountAccess, BrokerError>;
}

/// Env-backed directory: `SELLER_ACCOUNTS=slug:user_id:token,slug:user_id:token`.
#[derive(Clone)]
pub struct EnvAccountDirectory {
    records: HashMap<String, AccountAccess>,
    order: Vec<String>,
}

impl EnvAccountDirectory {
    pub fn from_env() -> Self {
        let raw = env::var("SELLER_ACCOUNTS").unwrap_or_default();
        let mut records = HashMap::new();
        let mut order = Vec::new();
        for token in raw.split(',') {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.splitn(3, ':');
            let slug = parts.next().map(str::trim).filter(|s| !s.is_empty());
            let user_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
            let secret = parts.next().map(str::trim).filter(|s| !s.is_empty());
            match (slug, user_id, secret) {
                (Some(slug), Some(user_id), Some(secret)) => {
                    if records
                        .insert(
                            slug.to_string(),
                            AccountAccess {
                                slug: slug.to_string(),
                                user_id: user_id.to_string(),
                                token: secret.to_string(),
                            },
                        )
                        .is_none()
                    {
                        order.push(slug.to_string());
                    }
                }
                _ => warn!(
                    target = "crosslist.api",
                    "ignored malformed SELLER_ACCOUNTS entry: {trimmed}"
                ),
            }
        }

        if records.is_empty() {
            warn!(
                target = "crosslist.api",
                "SELLER_ACCOUNTS produced no connected accounts; replication requests will be rejected"
            );
        } else {
            info!(
                target = "crosslist.api",
                account_count = records.len(),
                "loaded connected accounts from env"
            );
        }

        Self { records, order }
    }

    #[cfg(test)]
    pub fn with_accounts(entries: &[(&str, &str, &str)]) -> Self {
        let mut records = HashMap::new();
        let mut order = Vec::new();
        for (slug, user_id, token) in entries {
            records.insert(
                slug.to_string(),
                AccountAccess {
                    slug: slug.to_string(),
                    user_id: user_id.to_string(),
                    token: token.to_string(),
                },
            );
            order.push(slug.to_string());
        }
        Self { records, order }
    }
}

#[async_trait]
impl AccessBroker for EnvAccountDirectory {
    async fn connected_accounts(&self) -> Result<Vec<AccountHandle>, BrokerError> {
        Ok(self
            .order
            .iter()
            .filter_map(|slug| self.records.get(slug))
            .map(|access| AccountHandle {
                slug: access.slug.clone(),
                user_id: access.user_id.clone(),
            })
            .collect())
    }

    async fn access(&self, slug: &str) -> Result<AccountAccess, BrokerError> {
        self.records
            .get(slug)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownAccount(slug.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_resolves_known_accounts() {
        let directory = EnvAccountDirectory::with_accounts(&[
            ("alpha", "100", "tok-a"),
            ("beta", "200", "tok-b"),
        ]);
        let accounts = directory.connected_accounts().await.expect("accounts");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].slug, "alpha");

        let access = directory.access("beta").await.expect("beta access");
        assert_eq!(access.user_id, "200");
        assert_eq!(access.token, "tok-b");
    }

    #[tokio::test]
    async fn unknown_account_is_an_error() {
        let directory = EnvAccountDirectory::with_accounts(&[("alpha", "100", "tok-a")]);
        let err = directory.access("gamma").await.expect_err("unknown");
        assert!(matches!(err, BrokerError::UnknownAccount(slug) if slug == "gamma"));
    }
}
