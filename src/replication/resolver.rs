use crate::marketplace::{CallFailure, MarketplaceGateway};

/// Resolved condition of one destination target: everything the strategy
/// selection needs, gathered in one classification pass instead of probing
/// the mutating endpoint and reacting to failures.
#[derive(Debug, Clone, Default)]
pub struct DestinationSnapshot {
    pub aggregate_product_id: Option<String>,
    pub category_id: Option<String>,
    pub domain_id: Option<String>,
    pub existing_product_ids: Vec<String>,
    pub has_existing_compatibility: bool,
}

impl DestinationSnapshot {
    pub fn is_aggregate_product(&self) -> bool {
        self.aggregate_product_id.is_some()
    }
}

/// Classify one destination. Aggregate-product destinations are identified by
/// the listing read alone; plain listings get one additional compatibility
/// read (absent and empty are equivalent). Consumed once by the selector,
/// never persisted.
pub async fn resolve_destination(
    gateway: &dyn MarketplaceGateway,
    account: &str,
    item_id: &str,
) -> Result<DestinationSnapshot, CallFailure> {
    let item = gateway.item(account, item_id).await?;

    if let Some(user_product_id) = item.user_product_id {
        return Ok(DestinationSnapshot {
            aggregate_product_id: Some(user_product_id),
            category_id: item.category_id,
            domain_id: item.domain_id,
            existing_product_ids: Vec::new(),
            has_existing_compatibility: false,
        });
    }

    let existing = gateway
        .compatibilities(account, item_id)
        .await?
        .unwrap_or_default();

    Ok(DestinationSnapshot {
        aggregate_product_id: None,
        category_id: item.category_id,
        domain_id: item.domain_id,
        existing_product_ids: existing.product_ids(),
        has_existing_compatibility: !existing.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::testing::FakeGateway;

    #[tokio::test]
    async fn aggregate_destination_skips_the_compatibility_read() {
        let gateway = FakeGateway::new();
        gateway.put_aggregate_item("beta", "MLB200", "UP-9", "MLB-CAT", Some("CARS"));

        let snapshot = resolve_destination(&gateway, "beta", "MLB200")
            .await
            .expect("resolve");

        assert_eq!(snapshot.aggregate_product_id.as_deref(), Some("UP-9"));
        assert!(snapshot.is_aggregate_product());
        assert_eq!(gateway.call_count("compatibilities"), 0);
        assert_eq!(gateway.call_count("item"), 1);
    }

    #[tokio::test]
    async fn plain_listing_without_data_reads_once_and_reports_empty() {
        let gateway = FakeGateway::new();
        gateway.put_item("beta", "MLB200", "MLB-CAT");

        let snapshot = resolve_destination(&gateway, "beta", "MLB200")
            .await
            .expect("resolve");

        assert!(!snapshot.is_aggregate_product());
        assert!(!snapshot.has_existing_compatibility);
        assert!(snapshot.existing_product_ids.is_empty());
        assert_eq!(gateway.call_count("compatibilities"), 1);
    }

    #[tokio::test]
    async fn existing_products_are_listed_for_the_replace_path() {
        let gateway = FakeGateway::new();
        gateway.put_item("beta", "MLB200", "MLB-CAT");
        gateway.put_compatibilities("beta", "MLB200", &["P1", "P2"], Some("CARS"));

        let snapshot = resolve_destination(&gateway, "beta", "MLB200")
            .await
            .expect("resolve");

        assert!(snapshot.has_existing_compatibility);
        assert_eq!(snapshot.existing_product_ids, vec!["P1", "P2"]);
    }
}
