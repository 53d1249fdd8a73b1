use crate::accounts::AccountHandle;
use crate::marketplace::MarketplaceGateway;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

/// One concrete destination discovered for a catalog identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogMatch {
    pub sku: String,
    pub account: String,
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountFailure {
    pub account: String,
    pub error: String,
}

/// Aggregated catalog search result. A failed account query is never folded
/// into `not_found`: identifiers touched only by failed lookups stay out of
/// both lists so a real destination is never hidden behind an outage.
#[derive(Debug, Default, Serialize)]
pub struct CatalogSearchOutcome {
    pub matches: Vec<CatalogMatch>,
    pub not_found: Vec<String>,
    pub failed_accounts: Vec<AccountFailure>,
}

impl CatalogSearchOutcome {
    pub fn matches_for(&self, sku: &str) -> Vec<&CatalogMatch> {
        self.matches.iter().filter(|m| m.sku == sku).collect()
    }
}

/// Search every connected account for every identifier, one read per
/// (account, identifier) pair, all in flight concurrently.
pub async fn search_all_accounts(
    gateway: Arc<dyn MarketplaceGateway>,
    accounts: &[AccountHandle],
    skus: &[String],
) -> CatalogSearchOutcome {
    let mut tasks: JoinSet<(String, String, Result<Vec<CatalogMatch>, String>)> = JoinSet::new();

    for account in accounts {
        for sku in skus {
            let gateway = gateway.clone();
            let account = account.slug.clone();
            let sku = sku.clone();
            tasks.spawn(async move {
                let result = lookup(gateway.as_ref(), &account, &sku).await;
                (account, sku, result)
            });
        }
    }

    let mut matches = Vec::new();
    let mut matched_skus: HashSet<String> = HashSet::new();
    let mut failed_skus: HashSet<String> = HashSet::new();
    let mut failed_accounts: BTreeMap<String, String> = BTreeMap::new();

    while let Some(joined) = tasks.join_next().await {
        let Ok((account, sku, result)) = joined else {
            continue;
        };
        match result {
            Ok(found) => {
                if !found.is_empty() {
                    matched_skus.insert(sku);
                    matches.extend(found);
                }
            }
            Err(error) => {
                warn!(
                    target = "crosslist.engine",
                    account = %account,
                    sku = %sku,
                    error = %error,
                    "catalog search query failed"
                );
                failed_skus.insert(sku);
                failed_accounts.entry(account).or_insert(error);
            }
        }
    }

    matches.sort_by(|a, b| {
        (&a.sku, &a.account, &a.item_id).cmp(&(&b.sku, &b.account, &b.item_id))
    });

    let mut seen = HashSet::new();
    let not_found = skus
        .iter()
        .filter(|sku| seen.insert((*sku).clone()))
        .filter(|sku| !matched_skus.contains(*sku) && !failed_skus.contains(*sku))
        .cloned()
        .collect();

    CatalogSearchOutcome {
        matches,
        not_found,
        failed_accounts: failed_accounts
            .into_iter()
            .map(|(account, error)| AccountFailure { account, error })
            .collect(),
    }
}

async fn lookup(
    gateway: &dyn MarketplaceGateway,
    account: &str,
    sku: &str,
) -> Result<Vec<CatalogMatch>, String> {
    let item_ids = gateway
        .search_by_sku(account, sku)
        .await
        .map_err(|failure| failure.to_string())?;

    let mut found = Vec::with_capacity(item_ids.len());
    for item_id in item_ids {
        // Title enrichment is cosmetic; a failed detail read keeps the match.
        let title = match gateway.item(account, &item_id).await {
            Ok(item) => item.title,
            Err(err) => {
                warn!(
                    target = "crosslist.engine",
                    account = %account,
                    item_id = %item_id,
                    error = %err,
                    "could not fetch item detail during catalog search"
                );
                None
            }
        };
        found.push(CatalogMatch {
            sku: sku.to_string(),
            account: account.to_string(),
            item_id,
            title,
        });
    }
    Ok(found)
}
