//! The bundled web UI.
//!
//! `index.html` carries a handful of placeholder literals that are replaced
//! per request with the relay's configuration. Every other file is served
//! verbatim.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use rust_embed::RustEmbed;

use crate::listener::ProxyConfig;
use crate::origin::gateway_url_for_request;
use crate::rewrite::LEGACY_TOKEN;

/// Name of the templated root document inside the bundle.
pub const INDEX_FILE: &str = "index.html";

/// Gateway URL placeholder in `index.html`.
pub const GATEWAY_URL_PLACEHOLDER: &str = "ws://127.0.0.1:18789";

/// Session key placeholder in `index.html`.
pub const SESSION_KEY_PLACEHOLDER: &str = r#""sessionKey": "global""#;

/// Thinking mode placeholder in `index.html`.
pub const THINKING_PLACEHOLDER: &str = r#""thinking": "auto""#;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("embedded asset {0} is missing")]
    Missing(&'static str),

    #[error("embedded asset {path} is not valid UTF-8: {source}")]
    NotUtf8 {
        path: &'static str,
        source: std::string::FromUtf8Error,
    },
}

/// Load the raw `index.html` template from the bundle.
pub fn index_template() -> Result<String, AssetError> {
    let file = Assets::get(INDEX_FILE).ok_or(AssetError::Missing(INDEX_FILE))?;
    String::from_utf8(file.data.into_owned()).map_err(|source| AssetError::NotUtf8 {
        path: INDEX_FILE,
        source,
    })
}

/// Fill the placeholders in `template` for a request that arrived with
/// `request_host` as its `Host` header.
pub fn render_index(template: &str, config: &ProxyConfig, request_host: Option<&str>) -> String {
    let gateway_url = gateway_url_for_request(&config.gateway_url, request_host);
    if gateway_url != config.gateway_url {
        tracing::debug!(%gateway_url, "adjusted gateway URL for request host");
    }

    template
        .replace(GATEWAY_URL_PLACEHOLDER, &gateway_url)
        .replace(LEGACY_TOKEN, &json_escaped(&config.gateway_token))
        .replace(
            SESSION_KEY_PLACEHOLDER,
            &json_field("sessionKey", &config.session_key),
        )
        .replace(THINKING_PLACEHOLDER, &json_field("thinking", &config.thinking))
}

/// `value` escaped for use inside an existing JSON string literal.
fn json_escaped(value: &str) -> String {
    let quoted = serde_json::Value::from(value).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// `"key": <value as JSON string>`, matching the spacing of the placeholders.
fn json_field(key: &str, value: &str) -> String {
    let value = serde_json::Value::from(value);
    format!(r#""{key}": {value}"#)
}

/// Serve `path` from the bundle, or `404` if it is not there.
///
/// The raw template is never served: `/index.html` redirects to `/`.
pub fn serve_asset(path: &str) -> Response {
    let path = path.trim_start_matches('/');
    if path == INDEX_FILE {
        return Redirect::permanent("/").into_response();
    }

    match Assets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], file.data).into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 page not found\n").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(session_key: &str) -> ProxyConfig {
        ProxyConfig {
            gateway_url: "ws://127.0.0.1:18789".into(),
            gateway_token: "configured-token".into(),
            handshake_timeout: Duration::from_secs(10),
            client_id: "webchat-ui".into(),
            session_key: session_key.into(),
            thinking: "high".into(),
            cors_origins: Vec::new(),
            version: "1.0.0".into(),
        }
    }

    #[test]
    fn bundled_index_carries_every_placeholder() {
        let template = index_template().expect("index.html is bundled");
        assert!(template.contains(GATEWAY_URL_PLACEHOLDER));
        assert!(template.contains(LEGACY_TOKEN));
        assert!(template.contains(SESSION_KEY_PLACEHOLDER));
        assert!(template.contains(THINKING_PLACEHOLDER));
    }

    #[test]
    fn render_replaces_session_key() {
        let template = index_template().expect("index.html is bundled");
        let html = render_index(&template, &config("abc"), None);
        assert!(html.contains(r#""sessionKey": "abc""#));
        assert!(!html.contains(SESSION_KEY_PLACEHOLDER));
        assert!(html.contains(r#""thinking": "high""#));
        assert!(html.contains("configured-token"));
        assert!(!html.contains(LEGACY_TOKEN));
    }

    #[test]
    fn render_uses_request_host_for_loopback_gateway() {
        let template = r#"const url = "ws://127.0.0.1:18789";"#;
        let html = render_index(template, &config("global"), Some("10.0.0.5:36006"));
        assert_eq!(html, r#"const url = "ws://10.0.0.5:18789";"#);
    }

    #[test]
    fn render_escapes_quoted_values() {
        let html = render_index(SESSION_KEY_PLACEHOLDER, &config(r#"a"b"#), None);
        assert_eq!(html, r#""sessionKey": "a\"b""#);
    }

    #[test]
    fn render_escapes_token() {
        let mut config = config("global");
        config.gateway_token = r#"tok"en\x"#.into();
        let html = render_index(&format!(r#""token": "{LEGACY_TOKEN}""#), &config, None);
        assert_eq!(html, r#""token": "tok\"en\\x""#);
    }

    #[test]
    fn raw_template_redirects_to_root() {
        let response = serve_asset("/index.html");
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok()),
            Some("/")
        );
    }

    #[test]
    fn missing_asset_is_404() {
        let response = serve_asset("/does-not-exist.js");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn stylesheet_has_css_content_type() {
        let response = serve_asset("/style.css");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        assert_eq!(content_type, Some("text/css"));
    }
}
