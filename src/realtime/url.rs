//! Realtime endpoint URL with encoded credentials.
//!
//! The subscription endpoint authenticates the upgrade request through a
//! base64 `header` query parameter holding the API host and identity token,
//! plus an empty base64 `payload` (`e30=` is `{}`).

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::auth::AuthHeaders;

const EMPTY_PAYLOAD: &str = "e30=";

/// Host part of the API endpoint, used in the subscription authorization.
pub fn api_host(api_url: &str) -> String {
    reqwest::Url::parse(api_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| api_url.to_string())
}

pub fn build_realtime_url(realtime_url: &str, host: &str, auth: &AuthHeaders) -> String {
    let header = serde_json::json!({
        "host": host,
        "Authorization": auth.id_token,
    });
    let encoded = STANDARD.encode(header.to_string());
    let separator = if realtime_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}header={}&payload={}",
        realtime_url,
        separator,
        urlencoding::encode(&encoded),
        urlencoding::encode(EMPTY_PAYLOAD)
    )
}
