use once_cell::sync::Lazy;
use std::env;

/// Remote marketplace API root; overridable for sandbox or test targets.
pub static ROOT: Lazy<String> = Lazy::new(|| {
    env::var("MARKET_API_ROOT").unwrap_or_else(|_| "https://api.mercadolibre.com".to_string())
});
