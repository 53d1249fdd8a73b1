use reqwest::{Response, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Classification of one outbound marketplace call, driving retry behavior:
/// rate-limited and transient responses are retryable, validation is not.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("rate limited: {detail}")]
    RateLimited {
        retry_after: Option<u64>,
        detail: String,
    },
    #[error("server error {status}: {detail}")]
    Transient { status: u16, detail: String },
    #[error("rejected {status}: {detail}")]
    Validation { status: u16, detail: String },
    #[error("transport error: {0}")]
    Network(String),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::RateLimited { .. } | CallError::Transient { .. } | CallError::Network(_)
        )
    }

    pub fn detail(&self) -> &str {
        match self {
            CallError::RateLimited { detail, .. } => detail,
            CallError::Transient { detail, .. } => detail,
            CallError::Validation { detail, .. } => detail,
            CallError::Network(detail) => detail,
        }
    }
}

/// A call that gave up, with the number of attempts actually dispatched.
#[derive(Debug, Clone, Error)]
#[error("{error} (attempts: {attempts})")]
pub struct CallFailure {
    pub error: CallError,
    pub attempts: u32,
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::Network(err.to_string())
    }
}

/// Turn a non-success response into a classified error, condensing the
/// platform's structured error body into a single detail string.
pub async fn classify_response(response: Response) -> CallError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let detail = condense_error_body(&body, status);

    if status == StatusCode::TOO_MANY_REQUESTS {
        CallError::RateLimited {
            retry_after,
            detail,
        }
    } else if status.is_server_error() {
        CallError::Transient {
            status: status.as_u16(),
            detail,
        }
    } else {
        CallError::Validation {
            status: status.as_u16(),
            detail,
        }
    }
}

/// Condense a platform error payload (`error`, `message`, `cause[]`) into a
/// concise message, preserving cause codes. Falls back to raw body text.
fn condense_error_body(body: &str, status: StatusCode) -> String {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        let text = body.trim();
        if text.is_empty() {
            return format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim()
            .to_string();
        }
        return truncate(text, 600);
    };

    let Some(map) = payload.as_object() else {
        return truncate(&payload.to_string(), 600);
    };

    let mut parts: Vec<String> = Vec::new();
    if let Some(error) = map.get("error").and_then(Value::as_str) {
        parts.push(error.to_string());
    }
    let message = map
        .get("message")
        .or_else(|| map.get("error_description"))
        .or_else(|| map.get("detail"))
        .and_then(Value::as_str);
    if let Some(message) = message
        && !parts.iter().any(|p| p.as_str() == message)
    {
        parts.push(message.to_string());
    }

    if let Some(causes) = map.get("cause").and_then(Value::as_array) {
        let mut cause_parts = Vec::new();
        for cause in causes {
            match cause {
                Value::Object(c) => {
                    let code = c.get("code").map(value_text).unwrap_or_default();
                    let msg = c
                        .get("message")
                        .or_else(|| c.get("description"))
                        .map(value_text)
                        .unwrap_or_default();
                    match (code.is_empty(), msg.is_empty()) {
                        (false, false) => cause_parts.push(format!("{code}: {msg}")),
                        (false, true) => cause_parts.push(code),
                        (true, false) => cause_parts.push(msg),
                        (true, true) => {}
                    }
                }
                Value::Null => {}
                other => cause_parts.push(value_text(other)),
            }
        }
        if !cause_parts.is_empty() {
            parts.push(cause_parts.join(" | "));
        }
    }

    if parts.is_empty() {
        truncate(&payload.to_string(), 600)
    } else {
        parts.join("; ")
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

const DIMENSION_KEYWORDS: &[&str] = &[
    "dimension",
    "dimensions",
    "dimensões",
    "dimensiones",
    "shipping.dimensions",
    "package_height",
    "package_width",
    "package_length",
    "package_weight",
    "seller_package",
];

/// A validation rejection caused by missing package dimensions on the source
/// listing. This is the only rejection that pauses a target instead of
/// failing it.
pub fn is_dimension_rejection(error: &CallError) -> bool {
    let CallError::Validation { detail, .. } = error else {
        return false;
    };
    let lowered = detail.to_lowercase();
    DIMENSION_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condense_prefers_error_and_message() {
        let body = r#"{"error":"validation_error","message":"invalid item","cause":[{"code":"item.category_id","message":"missing category"}]}"#;
        let detail = condense_error_body(body, StatusCode::BAD_REQUEST);
        assert_eq!(
            detail,
            "validation_error; invalid item; item.category_id: missing category"
        );
    }

    #[test]
    fn condense_falls_back_to_text() {
        let detail = condense_error_body("boom", StatusCode::BAD_GATEWAY);
        assert_eq!(detail, "boom");
        let empty = condense_error_body("", StatusCode::BAD_GATEWAY);
        assert_eq!(empty, "502 Bad Gateway");
    }

    #[test]
    fn dimension_rejection_matches_cause_codes() {
        let err = CallError::Validation {
            status: 400,
            detail: "validation_error; shipping.dimensions: required".into(),
        };
        assert!(is_dimension_rejection(&err));

        let other = CallError::Validation {
            status: 400,
            detail: "validation_error; title too long".into(),
        };
        assert!(!is_dimension_rejection(&other));

        let rate = CallError::RateLimited {
            retry_after: None,
            detail: "dimensions".into(),
        };
        assert!(!is_dimension_rejection(&rate));
    }
}
