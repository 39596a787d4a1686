use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_proxy::ProxyConfig;

use crate::cli::Cli;

/// Name of the config file looked up when none is given explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    /// Bind host. Empty binds every interface.
    #[serde(default)]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_token")]
    pub token: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(
        default = "default_handshake_timeout",
        rename = "handshakeTimeout",
        alias = "handshake_timeout"
    )]
    pub handshake_timeout: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: default_token(),
            timeout: default_timeout(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_id")]
    pub id: String,
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            version: default_client_version(),
            platform: default_platform(),
            mode: default_mode(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    #[serde(
        default = "default_session_key",
        rename = "sessionKey",
        alias = "session_key"
    )]
    pub session_key: String,
    #[serde(default = "default_thinking")]
    pub thinking: String,
    #[serde(default = "default_true")]
    pub deliver: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_key: default_session_key(),
            thinking: default_thinking(),
            deliver: default_true(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default, rename = "corsOrigins", alias = "cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default, rename = "enableTLS", alias = "enable_tls")]
    pub enable_tls: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log destination. Empty or absent logs to stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_port() -> u16 {
    36006
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_token() -> String {
    "99a1282cff39ec6008916016302302fe42dd769c6d1fdfc1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_client_id() -> String {
    "webchat-ui".to_string()
}

fn default_client_version() -> String {
    "1.0.0".to_string()
}

fn default_platform() -> String {
    "web".to_string()
}

fn default_mode() -> String {
    "webchat".to_string()
}

fn default_session_key() -> String {
    "global".to_string()
}

fn default_thinking() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Ports may be written as `36006` or `"36006"`.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid port {text:?}: {e}"))),
    }
}

impl Config {
    /// Apply command-line overrides on top of the file/default values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref gateway) = cli.gateway {
            self.gateway.url = gateway.clone();
        }
        if let Some(ref token) = cli.token {
            self.gateway.token = token.clone();
        }
    }

    /// Settings handed to the relay and its HTTP handlers.
    pub fn proxy_config(&self, version: &str) -> ProxyConfig {
        ProxyConfig {
            gateway_url: self.gateway.url.clone(),
            gateway_token: self.gateway.token.clone(),
            handshake_timeout: Duration::from_secs(self.gateway.handshake_timeout),
            client_id: self.client.id.clone(),
            session_key: self.chat.session_key.clone(),
            thinking: self.chat.thinking.clone(),
            cors_origins: self.security.cors_origins.clone(),
            version: version.to_string(),
        }
    }

    /// Host to bind the HTTP listener on.
    pub fn bind_host(&self) -> &str {
        if self.server.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.server.host
        }
    }

    /// Configured log file, treating an empty path as unset.
    pub fn log_file(&self) -> Option<&Path> {
        self.log
            .file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Find the config file to read.
///
/// An explicit path always wins. Otherwise `config.toml` is looked up in
/// `cwd`, then next to the executable.
pub fn locate(explicit: Option<&Path>, cwd: &Path, exe_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = cwd.join(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    exe_dir
        .map(|dir| dir.join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.is_file())
}

/// Read and decode a TOML config file.
pub fn load_from(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to decode config file {}: {e}", path.display()))?;

    Ok(config)
}

/// Resolve and load configuration, returning the file it came from.
///
/// With no explicit path and no `config.toml` in the usual places, the
/// built-in defaults are returned.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    match locate(explicit, &cwd, exe_dir.as_deref()) {
        Some(path) => Ok((load_from(&path)?, Some(path))),
        None => Ok((Config::default(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_bundled_ui() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 36006);
        assert_eq!(cfg.gateway.url, "ws://127.0.0.1:18789");
        assert_eq!(cfg.gateway.timeout, 30);
        assert_eq!(cfg.gateway.handshake_timeout, 10);
        assert_eq!(cfg.client.id, "webchat-ui");
        assert_eq!(cfg.chat.session_key, "global");
        assert_eq!(cfg.chat.thinking, "auto");
        assert!(cfg.chat.deliver);
        assert!(cfg.security.cors_origins.is_empty());
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.bind_host(), "0.0.0.0");
        assert!(cfg.log_file().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = "8080"
host = "127.0.0.1"

[gateway]
url = "ws://10.0.0.2:18789"
token = "file-token"

[chat]
sessionKey = "team"
thinking = "high"
deliver = false

[security]
corsOrigins = ["https://chat.example.com"]
enableTLS = true

[log]
level = "debug"
file = ""
"#,
        )
        .unwrap();

        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.bind_host(), "127.0.0.1");
        assert_eq!(cfg.gateway.url, "ws://10.0.0.2:18789");
        assert_eq!(cfg.gateway.token, "file-token");
        assert_eq!(cfg.gateway.handshake_timeout, 10);
        assert_eq!(cfg.chat.session_key, "team");
        assert_eq!(cfg.chat.thinking, "high");
        assert!(!cfg.chat.deliver);
        assert_eq!(cfg.security.cors_origins, vec!["https://chat.example.com"]);
        assert!(cfg.security.enable_tls);
        assert_eq!(cfg.log.level, "debug");
        assert!(cfg.log_file().is_none());
        assert_eq!(cfg.client.platform, "web");
    }

    #[test]
    fn numeric_port_is_accepted() {
        let cfg: Config = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn invalid_port_fails_to_decode() {
        assert!(toml::from_str::<Config>("[server]\nport = \"http\"\n").is_err());
    }

    #[test]
    fn undecodable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[gateway\nurl = ").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let mut cfg: Config =
            toml::from_str("[server]\nport = 9000\n[gateway]\ntoken = \"file\"\n").unwrap();
        let cli = Cli::parse_from(["clawchat", "-p", "7000", "--token", "cli-token"]);
        cfg.apply_overrides(&cli);

        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.gateway.token, "cli-token");
        assert_eq!(cfg.gateway.url, "ws://127.0.0.1:18789");

        let proxy = cfg.proxy_config("1.0.0");
        assert_eq!(proxy.gateway_token, "cli-token");
        assert_eq!(proxy.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        let explicit = dir.path().join("other.toml");

        let found = locate(Some(&explicit), dir.path(), None);
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn working_directory_before_executable_directory() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();
        std::fs::write(exe.path().join(DEFAULT_CONFIG_FILE), "").unwrap();

        assert_eq!(
            locate(None, cwd.path(), Some(exe.path())),
            Some(exe.path().join(DEFAULT_CONFIG_FILE))
        );

        std::fs::write(cwd.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        assert_eq!(
            locate(None, cwd.path(), Some(exe.path())),
            Some(cwd.path().join(DEFAULT_CONFIG_FILE))
        );
    }

    #[test]
    fn nothing_found_means_defaults() {
        let cwd = tempfile::tempdir().unwrap();
        assert_eq!(locate(None, cwd.path(), None), None);
    }
}
