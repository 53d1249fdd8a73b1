//! In-process gateway fake for engine tests: scripted destination state,
//! scripted failures, and per-method call counting. Compatibility state is
//! modeled so add/replace runs can assert resulting entry counts, including
//! the platform-side deduplication of overlapping entries.

use crate::marketplace::compat::{AggregateCopyRequest, CompatProduct, CompatibilitySet};
use crate::marketplace::error::{CallError, CallFailure};
use crate::marketplace::gateway::MarketplaceGateway;
use crate::marketplace::items::{ItemDetail, NewListingPayload, UpdateItemRequest};
use crate::marketplace::retry::Attempted;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    items: HashMap<(String, String), ItemDetail>,
    compat: HashMap<(String, String), Vec<CompatProduct>>,
    descriptions: HashMap<(String, String), String>,
    sku_index: HashMap<(String, String), Vec<String>>,
    failing_search_accounts: HashMap<String, String>,
    fail_create_compat: HashMap<String, CallError>,
    fail_create_listing: HashMap<String, CallError>,
    dimension_gated_accounts: Vec<String>,
    dimensions_supplied: bool,
    created_counter: u32,
    counts: HashMap<String, u32>,
    atomic_replace: bool,
}

pub struct FakeGateway {
    inner: Mutex<Inner>,
}

fn products(ids: &[&str], domain: Option<&str>) -> Vec<CompatProduct> {
    ids.iter()
        .map(|id| CompatProduct {
            catalog_product_id: Some(id.to_string()),
            domain_id: domain.map(str::to_string),
        })
        .collect()
}

fn ok() -> Attempted<()> {
    Attempted {
        value: (),
        attempts: 1,
    }
}

fn failure(error: CallError) -> CallFailure {
    CallFailure { error, attempts: 1 }
}

fn not_found(what: &str) -> CallFailure {
    failure(CallError::Validation {
        status: 404,
        detail: format!("{what} not found"),
    })
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                atomic_replace: true,
                ..Inner::default()
            }),
        }
    }

    fn count(&self, method: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counts.entry(method.to_string()).or_insert(0) += 1;
    }

    pub fn call_count(&self, method: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .counts
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn put_item(&self, account: &str, item_id: &str, category: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.insert(
            (account.to_string(), item_id.to_string()),
            ItemDetail {
                id: item_id.to_string(),
                title: Some(format!("Listing {item_id}")),
                category_id: Some(category.to_string()),
                price: Some(99.0),
                currency_id: Some("BRL".into()),
                available_quantity: Some(3),
                condition: Some("new".into()),
                ..ItemDetail::default()
            },
        );
    }

    pub fn put_aggregate_item(
        &self,
        account: &str,
        item_id: &str,
        user_product_id: &str,
        category: &str,
        domain: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.insert(
            (account.to_string(), item_id.to_string()),
            ItemDetail {
                id: item_id.to_string(),
                title: Some(format!("Listing {item_id}")),
                category_id: Some(category.to_string()),
                domain_id: domain.map(str::to_string),
                user_product_id: Some(user_product_id.to_string()),
                ..ItemDetail::default()
            },
        );
    }

    pub fn put_compatibilities(
        &self,
        account: &str,
        item_id: &str,
        ids: &[&str],
        domain: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.compat.insert(
            (account.to_string(), item_id.to_string()),
            products(ids, domain),
        );
    }

    pub fn put_description(&self, account: &str, item_id: &str, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .descriptions
            .insert((account.to_string(), item_id.to_string()), text.to_string());
    }

    pub fn put_sku(&self, account: &str, sku: &str, item_ids: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.sku_index.insert(
            (account.to_string(), sku.to_string()),
            item_ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn fail_search(&self, account: &str, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .failing_search_accounts
            .insert(account.to_string(), detail.to_string());
    }

    pub fn fail_create_compatibilities(&self, account: &str, status: u16, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create_compat.insert(
            account.to_string(),
            CallError::Validation {
                status,
                detail: detail.to_string(),
            },
        );
    }

    pub fn fail_create_listing(&self, account: &str, status: u16, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create_listing.insert(
            account.to_string(),
            CallError::Validation {
                status,
                detail: detail.to_string(),
            },
        );
    }

    /// Listing creation on this account rejects with a missing-dimensions
    /// validation error until dimensions are supplied on the source listing.
    pub fn require_dimensions(&self, account: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.dimension_gated_accounts.push(account.to_string());
    }

    pub fn set_atomic_replace(&self, atomic: bool) {
        self.inner.lock().unwrap().atomic_replace = atomic;
    }

    pub fn compat_count(&self, account: &str, item_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .compat
            .get(&(account.to_string(), item_id.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn description_of(&self, account: &str, item_id: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .descriptions
            .get(&(account.to_string(), item_id.to_string()))
            .cloned()
    }

    fn source_products_by_item(inner: &Inner, source_item_id: &str) -> Vec<CompatProduct> {
        inner
            .compat
            .iter()
            .find(|((_, item_id), _)| item_id == source_item_id)
            .map(|(_, products)| products.clone())
            .unwrap_or_default()
    }

    fn copy_into(dest: &mut Vec<CompatProduct>, incoming: Vec<CompatProduct>) {
        for product in incoming {
            let duplicate = dest
                .iter()
                .any(|p| p.catalog_product_id == product.catalog_product_id);
            if !duplicate {
                dest.push(product);
            }
        }
    }
}

#[async_trait]
impl MarketplaceGateway for FakeGateway {
    async fn item(&self, account: &str, item_id: &str) -> Result<ItemDetail, CallFailure> {
        self.count("item");
        let inner = self.inner.lock().unwrap();
        inner
            .items
            .get(&(account.to_string(), item_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found("item"))
    }

    async fn item_description(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<String>, CallFailure> {
        self.count("item_description");
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .descriptions
            .get(&(account.to_string(), item_id.to_string()))
            .cloned())
    }

    async fn compatibilities(
        &self,
        account: &str,
        item_id: &str,
    ) -> Result<Option<CompatibilitySet>, CallFailure> {
        self.count("compatibilities");
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .compat
            .get(&(account.to_string(), item_id.to_string()))
            .map(|products| CompatibilitySet {
                products: products.clone(),
            }))
    }

    async fn create_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("create_compatibilities_from");
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_create_compat.get(account) {
            return Err(failure(error.clone()));
        }
        let incoming = Self::source_products_by_item(&inner, source_item_id);
        let dest = inner
            .compat
            .entry((account.to_string(), item_id.to_string()))
            .or_default();
        let mut merged = std::mem::take(dest);
        Self::copy_into(&mut merged, incoming);
        *dest = merged;
        Ok(ok())
    }

    async fn merge_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("merge_compatibilities_from");
        let mut inner = self.inner.lock().unwrap();
        let incoming = Self::source_products_by_item(&inner, source_item_id);
        let dest = inner
            .compat
            .entry((account.to_string(), item_id.to_string()))
            .or_default();
        let mut merged = std::mem::take(dest);
        Self::copy_into(&mut merged, incoming);
        *dest = merged;
        Ok(ok())
    }

    async fn replace_compatibilities_from(
        &self,
        account: &str,
        item_id: &str,
        source_item_id: &str,
        existing_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("replace_compatibilities_from");
        let mut inner = self.inner.lock().unwrap();
        let incoming = Self::source_products_by_item(&inner, source_item_id);
        let dest = inner
            .compat
            .entry((account.to_string(), item_id.to_string()))
            .or_default();
        dest.retain(|p| {
            p.catalog_product_id
                .as_ref()
                .map(|id| !existing_ids.contains(id))
                .unwrap_or(true)
        });
        let mut merged = std::mem::take(dest);
        Self::copy_into(&mut merged, incoming);
        *dest = merged;
        Ok(ok())
    }

    async fn delete_compatibilities(
        &self,
        account: &str,
        item_id: &str,
        product_ids: &[String],
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("delete_compatibilities");
        let mut inner = self.inner.lock().unwrap();
        if let Some(dest) = inner
            .compat
            .get_mut(&(account.to_string(), item_id.to_string()))
        {
            dest.retain(|p| {
                p.catalog_product_id
                    .as_ref()
                    .map(|id| !product_ids.contains(id))
                    .unwrap_or(true)
            });
        }
        Ok(ok())
    }

    async fn copy_compatibilities_to_aggregate(
        &self,
        account: &str,
        user_product_id: &str,
        request: &AggregateCopyRequest,
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("copy_compatibilities_to_aggregate");
        let mut inner = self.inner.lock().unwrap();
        let incoming = Self::source_products_by_item(&inner, &request.item_id);
        let dest = inner
            .compat
            .entry((account.to_string(), format!("UP:{user_product_id}")))
            .or_default();
        let mut merged = std::mem::take(dest);
        Self::copy_into(&mut merged, incoming);
        *dest = merged;
        Ok(ok())
    }

    async fn search_by_sku(&self, account: &str, sku: &str) -> Result<Vec<String>, CallFailure> {
        self.count("search_by_sku");
        let inner = self.inner.lock().unwrap();
        if let Some(detail) = inner.failing_search_accounts.get(account) {
            return Err(failure(CallError::Transient {
                status: 500,
                detail: detail.clone(),
            }));
        }
        Ok(inner
            .sku_index
            .get(&(account.to_string(), sku.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_listing(
        &self,
        account: &str,
        payload: &NewListingPayload,
    ) -> Result<Attempted<String>, CallFailure> {
        self.count("create_listing");
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_create_listing.get(account) {
            return Err(failure(error.clone()));
        }
        if inner.dimension_gated_accounts.iter().any(|a| a == account)
            && !inner.dimensions_supplied
        {
            return Err(failure(CallError::Validation {
                status: 400,
                detail: "validation_error; shipping.dimensions: seller_package dimensions required"
                    .into(),
            }));
        }
        inner.created_counter += 1;
        let new_id = format!("NEW-{}-{}", account, inner.created_counter);
        inner.items.insert(
            (account.to_string(), new_id.clone()),
            ItemDetail {
                id: new_id.clone(),
                title: payload.title.clone(),
                category_id: payload.category_id.clone(),
                ..ItemDetail::default()
            },
        );
        Ok(Attempted {
            value: new_id,
            attempts: 1,
        })
    }

    async fn update_listing(
        &self,
        account: &str,
        item_id: &str,
        _update: &UpdateItemRequest,
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("update_listing");
        let mut inner = self.inner.lock().unwrap();
        if !inner
            .items
            .contains_key(&(account.to_string(), item_id.to_string()))
        {
            return Err(not_found("item"));
        }
        inner.dimensions_supplied = true;
        Ok(ok())
    }

    async fn set_item_description(
        &self,
        account: &str,
        item_id: &str,
        plain_text: &str,
    ) -> Result<Attempted<()>, CallFailure> {
        self.count("set_item_description");
        let mut inner = self.inner.lock().unwrap();
        inner.descriptions.insert(
            (account.to_string(), item_id.to_string()),
            plain_text.to_string(),
        );
        Ok(ok())
    }

    fn supports_atomic_replace(&self) -> bool {
        self.inner.lock().unwrap().atomic_replace
    }
}
