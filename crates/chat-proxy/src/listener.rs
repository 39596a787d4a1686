use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::SecondsFormat;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::assets::{self, AssetError};
use crate::relay::RelaySession;

/// Settings shared by every request handler and relay session.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// WebSocket URL of the gateway.
    pub gateway_url: String,
    /// Token injected into `connect` requests.
    pub gateway_token: String,
    /// Upper bound on the gateway handshake.
    pub handshake_timeout: Duration,
    /// Client identifier reported by `/api/config`.
    pub client_id: String,
    /// Session key substituted into the web UI.
    pub session_key: String,
    /// Thinking mode substituted into the web UI.
    pub thinking: String,
    /// Allowed CORS origins. Empty or `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// Version reported by the JSON endpoints.
    pub version: String,
}

#[derive(Clone)]
struct AppState {
    config: Arc<ProxyConfig>,
    index_template: Arc<str>,
}

/// HTTP front door: serves the web UI and relays `/ws` to the gateway.
pub struct Proxy {
    state: AppState,
}

impl Proxy {
    /// Create a proxy, loading the embedded web UI.
    ///
    /// Fails if the bundled `index.html` is missing or not UTF-8.
    pub fn new(config: ProxyConfig) -> Result<Self, AssetError> {
        let index_template = assets::index_template()?;
        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                index_template: Arc::from(index_template),
            },
        })
    }

    /// Build the axum router for all endpoints.
    pub fn router(&self) -> Router {
        let cors = cors_layer(&self.state.config.cors_origins);

        Router::new()
            .route("/ws", get(relay_handler))
            .route("/api/config", get(config_handler))
            .route("/api/health", get(health_handler))
            .route("/", get(index_handler))
            .fallback(asset_handler)
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Each upgraded connection runs in its own task; a failing session never
    /// affects the listener or other sessions.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, gateway = %self.state.config.gateway_url, "clawchat listening");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%origin, %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

/// `Host` header of the request, if present and printable.
fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

async fn relay_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        tracing::info!(%remote_addr, "client connected");
        match RelaySession::establish(socket, remote_addr, &state.config).await {
            Ok(session) => session.run().await,
            Err(err) => tracing::debug!(%remote_addr, %err, "relay session not started"),
        }
    })
}

async fn config_handler(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let host = request_host(&headers).unwrap_or("localhost");
    Json(serde_json::json!({
        "gateway": format!("ws://{host}/ws"),
        "version": state.config.version,
        "client": state.config.client_id,
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "gateway": state.config.gateway_url,
        "version": state.config.version,
    }))
}

async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    Html(assets::render_index(
        &state.index_template,
        &state.config,
        request_host(&headers),
    ))
}

async fn asset_handler(uri: Uri) -> impl IntoResponse {
    assets::serve_asset(uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_host_reads_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_host(&headers), None);
        headers.insert(header::HOST, HeaderValue::from_static("chat.lan:36006"));
        assert_eq!(request_host(&headers), Some("chat.lan:36006"));
    }

    #[test]
    fn proxy_loads_embedded_index() {
        let proxy = Proxy::new(ProxyConfig {
            gateway_url: "ws://127.0.0.1:18789".into(),
            gateway_token: "token".into(),
            handshake_timeout: Duration::from_secs(10),
            client_id: "webchat-ui".into(),
            session_key: "global".into(),
            thinking: "auto".into(),
            cors_origins: vec!["https://chat.example.com".into()],
            version: "1.0.0".into(),
        });
        assert!(proxy.is_ok());
    }
}
