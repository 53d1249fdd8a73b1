//! Deterministic construction of the create-listing payload from a source
//! listing. Read-only and platform-managed fields are excluded up front so
//! the create call is a pure function of the source read, with no
//! submit-inspect-adjust loop.

use crate::marketplace::items::{
    AttributeEntry, AttributeValue, ItemDetail, NewListingPayload, PictureSource, ShippingPayload,
    UpdateItemRequest, Variation, VariationPayload,
};
use serde::Deserialize;
use serde_json::Value;

/// Attributes the platform computes or manages itself; sending them back on
/// create is either rejected or ignored.
const EXCLUDED_ATTRIBUTES: &[&str] = &[
    "ITEM_CONDITION",
    "SELLER_SKU",
    "GTIN",
    "PACKAGE_WEIGHT",
    "PACKAGE_HEIGHT",
    "PACKAGE_WIDTH",
    "PACKAGE_LENGTH",
    "SHIPMENT_PACKING",
    "CATALOG_TITLE",
    "PRODUCT_FEATURES",
];

const USER_PRODUCT_LISTING_TAG: &str = "user_product_listing";
const MAX_FAMILY_NAME_LEN: usize = 120;

/// Package dimensions supplied on resume to unblock paused targets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDimensions {
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl PackageDimensions {
    pub fn is_empty(&self) -> bool {
        self.height.is_none() && self.width.is_none() && self.length.is_none()
            && self.weight.is_none()
    }
}

fn clean_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn clean_str(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

/// Extract a usable (value_id, value_name) pair from direct fields, nested
/// `values`, or a numeric `value_struct`.
fn extract_value_pair(entry: &AttributeEntry) -> (String, String) {
    let value_id = clean_text(entry.value_id.as_ref());
    let value_name = clean_text(entry.value_name.as_ref());
    if !value_id.is_empty() || !value_name.is_empty() {
        return (value_id, value_name);
    }

    for nested in &entry.values {
        let nested_id = clean_text(nested.id.as_ref());
        let nested_name = clean_text(nested.name.as_ref());
        if !nested_id.is_empty() || !nested_name.is_empty() {
            return (nested_id, nested_name);
        }
    }

    if let Some(value_struct) = &entry.value_struct {
        let number = clean_text(value_struct.number.as_ref());
        let unit = clean_text(value_struct.unit.as_ref());
        if !number.is_empty() {
            return (String::new(), format!("{number} {unit}").trim().to_string());
        }
    }

    (String::new(), String::new())
}

fn extract_seller_sku(attributes: &[AttributeEntry]) -> String {
    for attr in attributes {
        if attr.id.as_deref() != Some("SELLER_SKU") {
            continue;
        }
        let (value_id, value_name) = extract_value_pair(attr);
        let value = if value_name.is_empty() { value_id } else { value_name };
        if !value.is_empty() {
            return value;
        }
    }
    String::new()
}

pub fn item_seller_custom_field(item: &ItemDetail) -> String {
    let direct = clean_text(item.seller_custom_field.as_ref());
    if !direct.is_empty() {
        return direct;
    }
    let top = extract_seller_sku(&item.attributes);
    if !top.is_empty() {
        return top;
    }
    for variation in &item.variations {
        let sku = variation_seller_custom_field(variation);
        if !sku.is_empty() {
            return sku;
        }
    }
    String::new()
}

fn variation_seller_custom_field(variation: &Variation) -> String {
    let direct = clean_text(variation.seller_custom_field.as_ref());
    if !direct.is_empty() {
        return direct;
    }
    extract_seller_sku(&variation.attributes)
}

fn truncate_name(value: String) -> String {
    if value.len() <= MAX_FAMILY_NAME_LEN {
        return value;
    }
    let mut end = MAX_FAMILY_NAME_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Fallback chain for the grouping name required by aggregate listings.
pub fn family_name(item: &ItemDetail) -> String {
    let candidates = [
        clean_str(item.family_name.as_deref()),
        clean_str(item.title.as_deref()),
        item_seller_custom_field(item),
        item.id.trim().to_string(),
    ];
    for candidate in candidates {
        if !candidate.is_empty() {
            return truncate_name(candidate);
        }
    }
    String::new()
}

pub fn is_user_product_item(item: &ItemDetail) -> bool {
    if item.tags.iter().any(|t| t == USER_PRODUCT_LISTING_TAG) {
        return true;
    }
    !clean_str(item.family_name.as_deref()).is_empty()
}

/// Convert raw attribute entries to clean write values. Attributes keep both
/// id and name when present; sale terms and variation entries prefer the id.
fn attribute_values(entries: &[AttributeEntry], keep_both: bool, excluded: bool) -> Vec<AttributeValue> {
    let mut out = Vec::new();
    for entry in entries {
        let Some(id) = entry.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        if excluded && EXCLUDED_ATTRIBUTES.contains(&id) {
            continue;
        }
        let (value_id, value_name) = extract_value_pair(entry);
        if value_id.is_empty() && value_name.is_empty() {
            continue;
        }
        let value = if keep_both {
            AttributeValue {
                id: id.to_string(),
                value_id: (!value_id.is_empty()).then_some(value_id),
                value_name: (!value_name.is_empty()).then_some(value_name),
            }
        } else if !value_id.is_empty() {
            AttributeValue {
                id: id.to_string(),
                value_id: Some(value_id),
                value_name: None,
            }
        } else {
            AttributeValue {
                id: id.to_string(),
                value_id: None,
                value_name: Some(value_name),
            }
        };
        out.push(value);
    }
    out
}

/// Build the create payload from the source listing.
pub fn build_listing_payload(item: &ItemDetail) -> NewListingPayload {
    let is_user_product = is_user_product_item(item);
    let mut payload = NewListingPayload::default();

    if !is_user_product {
        payload.title = item.title.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    }
    payload.category_id = item.category_id.clone();
    payload.price = item.price;
    payload.currency_id = item.currency_id.clone();
    payload.available_quantity = item.available_quantity;
    payload.buying_mode = item.buying_mode.clone();
    payload.listing_type_id = item.listing_type_id.clone();
    payload.condition = item.condition.clone();
    payload.video_id = item.video_id.clone();

    let sku = item_seller_custom_field(item);
    if !sku.is_empty() {
        payload.seller_custom_field = Some(sku);
    }

    let mut name = clean_str(item.family_name.as_deref());
    if name.is_empty() && is_user_product {
        name = family_name(item);
    }
    if !name.is_empty() {
        payload.family_name = Some(truncate_name(name));
    }

    // The platform accepts pictures by source URL.
    payload.pictures = item
        .pictures
        .iter()
        .filter_map(|pic| pic.secure_url.clone().or_else(|| pic.url.clone()))
        .filter(|url| !url.is_empty())
        .map(|source| PictureSource { source })
        .collect();

    payload.attributes = attribute_values(&item.attributes, true, true);
    payload.sale_terms = attribute_values(&item.sale_terms, false, false);

    // Shipping always goes out as me2; fulfillment programs are seller-specific.
    if let Some(shipping) = &item.shipping {
        payload.shipping = Some(ShippingPayload {
            mode: "me2",
            local_pick_up: shipping.local_pick_up.unwrap_or(false),
            free_shipping: shipping.free_shipping.unwrap_or(false),
        });
    }

    // Aggregate listings do not accept variations on create.
    if !is_user_product {
        for variation in &item.variations {
            let combos = attribute_values(&variation.attribute_combinations, false, false);
            if combos.is_empty() {
                continue;
            }
            let sku = variation_seller_custom_field(variation);
            payload.variations.push(VariationPayload {
                available_quantity: variation.available_quantity,
                price: variation.price,
                seller_custom_field: (!sku.is_empty()).then_some(sku),
                attribute_combinations: combos,
                attributes: attribute_values(&variation.attributes, false, false),
            });
        }
    }

    if !payload.variations.is_empty() {
        // With variations, the platform expects stock per variation.
        payload.available_quantity = None;
    } else if payload.available_quantity.is_none() && !item.variations.is_empty() {
        let total: i64 = item
            .variations
            .iter()
            .filter_map(|v| v.available_quantity)
            .sum();
        payload.available_quantity = Some(total);
    }

    payload.channels = item.channels.clone();

    payload
}

fn format_measure(value: f64, unit: &str) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0} {unit}")
    } else {
        format!("{value} {unit}")
    }
}

/// SELLER_PACKAGE_* attributes from supplied dimensions, ready to PUT on the
/// source listing.
pub fn dimension_update(dimensions: &PackageDimensions) -> UpdateItemRequest {
    let mut attributes = Vec::new();
    let mapping = [
        (dimensions.height, "SELLER_PACKAGE_HEIGHT", "cm"),
        (dimensions.width, "SELLER_PACKAGE_WIDTH", "cm"),
        (dimensions.length, "SELLER_PACKAGE_LENGTH", "cm"),
        (dimensions.weight, "SELLER_PACKAGE_WEIGHT", "g"),
    ];
    for (value, attr_id, unit) in mapping {
        if let Some(value) = value {
            attributes.push(AttributeValue {
                id: attr_id.to_string(),
                value_id: None,
                value_name: Some(format_measure(value, unit)),
            });
        }
    }
    UpdateItemRequest { attributes }
}
