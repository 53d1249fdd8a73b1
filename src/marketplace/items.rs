use super::config::ROOT;
use super::error::{CallError, classify_response};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use urlencoding::encode;

/// Full listing detail as read from the platform. Only the fields the engine
/// consumes are typed; value fields stay loose (`Value`) because the platform
/// mixes strings and numbers freely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemDetail {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub available_quantity: Option<i64>,
    #[serde(default)]
    pub buying_mode: Option<String>,
    #[serde(default)]
    pub listing_type_id: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub seller_custom_field: Option<Value>,
    #[serde(default)]
    pub user_product_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pictures: Vec<Picture>,
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
    #[serde(default)]
    pub sale_terms: Vec<AttributeEntry>,
    #[serde(default)]
    pub shipping: Option<ShippingInfo>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub secure_thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Picture {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secure_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributeEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value_id: Option<Value>,
    #[serde(default)]
    pub value_name: Option<Value>,
    #[serde(default)]
    pub values: Vec<NestedValue>,
    #[serde(default)]
    pub value_struct: Option<ValueStruct>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NestedValue {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValueStruct {
    #[serde(default)]
    pub number: Option<Value>,
    #[serde(default)]
    pub unit: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingInfo {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub local_pick_up: Option<bool>,
    #[serde(default)]
    pub free_shipping: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Variation {
    #[serde(default)]
    pub available_quantity: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub seller_custom_field: Option<Value>,
    #[serde(default)]
    pub attribute_combinations: Vec<AttributeEntry>,
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
}

/// Create-listing payload. Absent fields are omitted from the wire body so
/// the platform applies its own defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewListingPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buying_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_custom_field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pictures: Vec<PictureSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sale_terms: Vec<AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<VariationPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PictureSource {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeValue {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShippingPayload {
    pub mode: &'static str,
    pub local_pick_up: bool,
    pub free_shipping: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VariationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_custom_field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribute_combinations: Vec<AttributeValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeValue>,
}

/// Attribute-only update, used to push package dimensions onto a listing.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateItemRequest {
    pub attributes: Vec<AttributeValue>,
}

pub async fn get_item(
    http: &Client,
    access_token: &str,
    item_id: &str,
) -> Result<ItemDetail, CallError> {
    let url = format!("{}/items/{}", *ROOT, encode(item_id));
    let response = http.get(url).bearer_auth(access_token).send().await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    response
        .json::<ItemDetail>()
        .await
        .map_err(|err| CallError::Network(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct DescriptionResponse {
    #[serde(default)]
    plain_text: Option<String>,
}

/// 404 means the listing simply has no description.
pub async fn get_item_description(
    http: &Client,
    access_token: &str,
    item_id: &str,
) -> Result<Option<String>, CallError> {
    let url = format!("{}/items/{}/description", *ROOT, encode(item_id));
    let response = http.get(url).bearer_auth(access_token).send().await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    let payload: DescriptionResponse = response
        .json()
        .await
        .map_err(|err| CallError::Network(err.to_string()))?;
    Ok(payload.plain_text.filter(|text| !text.trim().is_empty()))
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    id: String,
}

pub async fn create_item(
    http: &Client,
    access_token: &str,
    payload: &NewListingPayload,
) -> Result<String, CallError> {
    let url = format!("{}/items", *ROOT);
    let response = http
        .post(url)
        .bearer_auth(access_token)
        .json(payload)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    let created: CreatedItem = response
        .json()
        .await
        .map_err(|err| CallError::Network(err.to_string()))?;
    Ok(created.id)
}

pub async fn update_item(
    http: &Client,
    access_token: &str,
    item_id: &str,
    payload: &UpdateItemRequest,
) -> Result<(), CallError> {
    let url = format!("{}/items/{}", *ROOT, encode(item_id));
    let response = http
        .put(url)
        .bearer_auth(access_token)
        .json(payload)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

pub async fn set_item_description(
    http: &Client,
    access_token: &str,
    item_id: &str,
    plain_text: &str,
) -> Result<(), CallError> {
    let url = format!("{}/items/{}/description", *ROOT, encode(item_id));
    let response = http
        .post(url)
        .bearer_auth(access_token)
        .json(&serde_json::json!({ "plain_text": plain_text }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(classify_response(response).await);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<String>,
}

/// The platform indexes seller SKUs under two different query parameters
/// depending on listing age; both are queried and the union returned.
pub async fn search_items_by_sku(
    http: &Client,
    access_token: &str,
    user_id: &str,
    sku: &str,
) -> Result<Vec<String>, CallError> {
    let url = format!("{}/users/{}/items/search", *ROOT, encode(user_id));
    let mut item_ids: Vec<String> = Vec::new();
    for param in ["seller_sku", "sku"] {
        let response = http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[(param, sku)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            continue;
        }
        if !response.status().is_success() {
            return Err(classify_response(response).await);
        }
        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| CallError::Network(err.to_string()))?;
        for item_id in payload.results {
            if !item_id.is_empty() && !item_ids.contains(&item_id) {
                item_ids.push(item_id);
            }
        }
    }
    Ok(item_ids)
}
