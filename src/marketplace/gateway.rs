use super::compat::{self, AggregateCopyRequest, CompatibilitySet};
use super::error::{CallError, CallFailure};
use super::items::{self, ItemDetail, NewListingPayload, UpdateItemRequest};
use super::retry::{Attempted, RetryPolicy, call_with_retry};
use crate::accounts::{AccessBroker, AccountAccess, BrokerError};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

/// Seam between the replication engine and the remote platform. Reads return
/// plain values; mutations report how many attempts the retry controller
/// dispatched, which feeds the per-target attempt count.
#[async_trait]
pub trait MarketplaceGateway: Send + Sync {
    async fn item(&self, account: &str, item_id: &str) -> Result<ItemDetail, CallFailure>;

    async fn item_description(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<String>, CallFailure>;

    async fn compatibilities(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<CompatibilitySet>, CallFailure>;

    async fn create_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure>;

    async fn merge_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure>;

    async fn replace_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
        existing_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure>;

    async fn delete_compatibilities(
        &self,
        account: &str,
        item_id: &str,
        product_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure>;

    async fn copy_compatibilities_to_aggregate(
        &self,
        account: &str,
        user_product_id: &str,
        request: &AggregateCopyRequest,
    ) -> Result<Attempted<()>, CallFailure>;

    async fn search_by_sku(&self, account: &str, sku: &str) -> Result<Vec<String>, CallFailure>;

    async fn create_listing(
        &self,
        account: &str,
        payload: &NewListingPayload,
    ) -> Result<Attempted<String>, CallFailure>;

    async fn update_listing(
        &self,
        account: &str,
        item_id: &str,
        update: &UpdateItemRequest,
    ) -> Result<Attempted<()>, CallFailure>;

    async fn set_item_description(
        &self,
        account: &str,
        item_id: &str,
        plain_text: &str,
    ) -> Result<Attempted<()>, CallFailure>;

    /// Whether the platform accepts the combined delete+create replace call.
    fn supports_atomic_replace(&self) -> bool {
        true
    }
}

/// Live gateway: resolves per-account tokens through the broker and wraps
/// every outbound call in the retry controller.
pub struct HttpGateway {
    http: Client,
    broker: Arc<dyn AccessBroker>,
    policy: RetryPolicy,
    atomic_replace: bool,
}

impl HttpGateway {
    pub fn new(broker: Arc<dyn AccessBroker>, policy: RetryPolicy, atomic_replace: bool) -> Self {
        Self {
            http: build_client(),
            broker,
            policy,
            atomic_replace,
        }
    }

    pub fn from_env(broker: Arc<dyn AccessBroker>) -> Self {
        let atomic_replace = std::env::var("COMPAT_ATOMIC_REPLACE")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        Self::new(broker, RetryPolicy::from_env(), atomic_replace)
    }

    async fn access(&self, account: &str) -> Result<AccountAccess, CallFailure> {
        self.broker.access(account).await.map_err(broker_failure)
    }
}

fn broker_failure(err: BrokerError) -> CallFailure {
    CallFailure {
        error: CallError::Validation {
            status: 401,
            detail: err.to_string(),
        },
        attempts: 0,
    }
}

#[async_trait]
impl MarketplaceGateway for HttpGateway {
    async fn item(&self, account: &str, item_id: &str) -> Result<ItemDetail, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::get_item(&self.http, &access.token, item_id)
        })
        .await
        .map(|attempted| attempted.value)
    }

    async fn item_description(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<String>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::get_item_description(&self.http, &access.token, item_id)
        })
        .await
        .map(|attempted| attempted.value)
    }

    async fn compatibilities(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<CompatibilitySet>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::get_compatibilities(&self.http, &access.token, item_id)
        })
        .await
        .map(|attempted| attempted.value)
    }

    async fn create_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::create_from_source(&self.http, &access.token, item_id, source_item_id)
        })
        .await
    }

    async fn merge_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::merge_from_source(&self.http, &access.token, item_id, source_item_id)
        })
        .await
    }

    async fn replace_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
        existing_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::replace_from_source(
                &self.http,
                &access.token,
                item_id,
                source_item_id,
                existing_ids,
            )
        })
        .await
    }

    async fn delete_compatibilities(
        &self,
        account: &str,
        item_id: &str,
        product_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::delete_products(&self.http, &access.token, item_id, product_ids)
        })
        .await
    }

    async fn copy_compatibilities_to_aggregate(
        &self,
        account: &str,
        user_product_id: &str,
        request: &AggregateCopyRequest,
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            compat::aggregate_copy_paste(&self.http, &access.token, user_product_id, request)
        })
        .await
    }

    async fn search_by_sku(&self, account: &str, sku: &str) -> Result<Vec<String>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::search_items_by_sku(&self.http, &access.token, &access.user_id, sku)
        })
        .await
        .map(|attempted| attempted.value)
    }

    async fn create_listing(
        &self,
        account: &str,
        payload: &NewListingPayload,
    ) -> Result<Attempted<String>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::create_item(&self.http, &access.token, payload)
        })
        .await
    }

    async fn update_listing(
        &self,
        account: &str,
        item_id: &str,
        update: &UpdateItemRequest,
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::update_item(&self.http, &access.token, item_id, update)
        })
        .await
    }

    async fn set_item_description(
        &self,
        account: &str,
        item_id: &str,
        plain_text: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        let access = self.access(account).await?;
        call_with_retry(&self.policy, || {
            items::set_item_description(&self.http, &access.token, item_id, plain_text)
        })
        .await
    }

    fn supports_atomic_replace(&self) -> bool {
        self.atomic_replace
    }
}
