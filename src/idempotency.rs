use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub async fn redis_get<T: DeserializeOwned>(client: &redis::Client, key: &str) -> Option<T> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set<T: Serialize>(
    client: &redis::Client,
    key: &str,
    value: &T,
    ttl_secs: usize,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs as u64).await;
    }
}
