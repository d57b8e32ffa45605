//! Request and response bodies of the `/auth` endpoints.

use serde::Deserialize;

/// `POST /auth/token` success body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// `POST /auth/token/refresh` success body. Servers that rotate refresh
/// tokens return the replacement alongside the access token.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenewedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Fields servers use for a human-readable rejection reason, in preference order
const MESSAGE_FIELDS: [&str; 4] = ["message", "detail", "error", "error_description"];

/// Pull the server's own explanation out of a rejected registration body.
pub(crate) fn rejection_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        // Plain-text error bodies are passed through as-is
        Err(_) if !body.starts_with('<') => return Some(body.to_string()),
        Err(_) => return None,
    };

    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Object(map) => {
            for field in MESSAGE_FIELDS {
                if let Some(message) = map.get(field).and_then(first_text) {
                    return Some(message);
                }
            }
            // Field-keyed errors: {"email": ["already registered"]}
            map.values().find_map(first_text)
        }
        _ => None,
    }
}

fn first_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}
