use super::config::ROOT;
use super::error::{CallError, classify_response};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

/// Compatibility data attached to a listing or aggregate product.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompatibilitySet {
    #[serde(default)]
    pub products: Vec<CompatProduct>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompatProduct {
    #[serde(default)]
    pub catalog_product_id: Option<String>,
    #[serde(default)]
    pub domain_id: Option<String>,
}

impl CompatibilitySet {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn product_ids(&self) -> Vec<String> {
        self.products
            .iter()
            .filter_map(|p| p.catalog_product_id.clone())
            .collect()
    }

    pub fn first_domain_id(&self) -> Option<&str> {
        self.products.iter().find_map(|p| p.domain_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ItemToCopy {
    item_id: String,
    extended_information: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CopyBody {
    item_to_copy: ItemToCopy,
}

#[derive(Debug, Clone, Serialize)]
struct MergeBody {
    create: CopyBody,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteBody {
    product_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ReplaceBody {
    delete: DeleteBody,
    create: CopyBody,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteOnlyBody {
    delete: DeleteBody,
}

/// Payload for the aggregate-product copy-paste endpoint. It references the
/// source by listing id only; the aggregate id lives in the URL, never in the
/// body alongside the listing id.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateCopyRequest {
    pub domain_id: String,
    pub category_id: String,
    pub item_id: String,
    pub extended_information: bool,
}

fn copy_body(source_item_id: &str) -> CopyBody {
    CopyBody {
        item_to_copy: ItemToCopy {
            item_id: source_item_id.to_string(),
            extended_information: true,
        },
    }
}

/// 404 means the listing carries no compatibility data at all, which the
/// engine treats the same as an empty set.
pub async fn get_compatibilities(
    http: &Client,
    access_token: &str,
    item_id: &str,
) -> Result<Option<CompatibilitySet>, CallError> {
    let url = format!("{}/items/{}/compatibilities", *ROOT, encode(item_id));
    let response = http
        .get(url)
        .bearer_auth(access_token)
        .query(&[("extended", "true")])
        .send()
        .await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    let payload: CompatibilitySet = response
        .json()
        .await
        .map_err(|err| CallError::Network(err.to_string()))?;
    Ok(Some(payload))
}

pub async fn create_from_source(
    http: &Client,
    access_token: &str,
    item_id: &str,
    source_item_id: &str,
) -> Result<(), CallError> {
    let url = format!("{}/items/{}/compatibilities", *ROOT, encode(item_id));
    let response = http
        .post(url)
        .bearer_auth(access_token)
        .json(&copy_body(source_item_id))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

pub async fn merge_from_source(
    http: &Client,
    access_token: &str,
    item_id: &str,
    source_item_id: &str,
) -> Result<(), CallError> {
    let url = format!("{}/items/{}/compatibilities", *ROOT, encode(item_id));
    let body = MergeBody {
        create: copy_body(source_item_id),
    };
    let response = http
        .put(url)
        .bearer_auth(access_token)
        .json(&body)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

/// Atomic delete-existing + create-from-source in one request.
pub async fn replace_from_source(
    http: &Client,
    access_token: &str,
    item_id: &str,
    source_item_id: &str,
    existing_ids: &[String],
) -> Result<(), CallError> {
    let url = format!("{}/items/{}/compatibilities", *ROOT, encode(item_id));
    let body = ReplaceBody {
        delete: DeleteBody {
            product_ids: existing_ids.to_vec(),
        },
        create: copy_body(source_item_id),
    };
    let response = http
        .put(url)
        .bearer_auth(access_token)
        .json(&body)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

/// Standalone delete, only used on platforms without the atomic combined call.
pub async fn delete_products(
    http: &Client,
    access_token: &str,
    item_id: &str,
    product_ids: &[String],
) -> Result<(), CallError> {
    let url = format!("{}/items/{}/compatibilities", *ROOT, encode(item_id));
    let body = DeleteOnlyBody {
        delete: DeleteBody {
            product_ids: product_ids.to_vec(),
        },
    };
    let response = http
        .put(url)
        .bearer_auth(access_token)
        .json(&body)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

pub async fn aggregate_copy_paste(
    http: &Client,
    access_token: &str,
    user_product_id: &str,
    request: &AggregateCopyRequest,
) -> Result<(), CallError> {
    let url = format!(
        "{}/user-products/{}/compatibilities/copy-paste",
        *ROOT,
        encode(user_product_id)
    );
    let response = http
        .post(url)
        .bearer_auth(access_token)
        .json(request)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}
