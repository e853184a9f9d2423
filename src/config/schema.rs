//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Keys are snake_case; the camelCase names used by hub modules are accepted
//! as aliases.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// IP address or host name to bind, use 0.0.0.0 for all interfaces.
    pub bind: String,

    /// Port to bind. 0 picks an ephemeral port.
    pub port: u16,

    /// Serve HTTPS when both `key` and `cert` are present.
    pub https: bool,

    /// Path to the PEM private key.
    pub key: Option<PathBuf>,

    /// Path to the PEM certificate chain.
    pub cert: Option<PathBuf>,

    /// Emit access and error records for every request.
    pub logging: bool,

    /// Cross-origin policy.
    pub cors: CorsPolicy,

    /// Request a process-wide shutdown when the listen port can't be bound.
    #[serde(alias = "errorOnBindFail")]
    pub error_on_bind_fail: bool,

    /// Parse JSON, urlencoded and text bodies before user stages run.
    #[serde(alias = "enableBodyParser")]
    pub enable_body_parser: bool,

    /// Maximum accepted request body.
    #[serde(alias = "bodyParserLimit")]
    pub body_parser_limit: ByteSize,

    /// Mount the streaming (WebSocket) endpoint.
    #[serde(alias = "enableSocketIo")]
    pub enable_socket_io: bool,

    /// Path of the streaming endpoint.
    pub socket_io_path: String,

    /// Trust `X-Forwarded-For` / `X-Real-IP` when resolving the source address.
    pub trust_proxy: bool,

    /// CRUD bridge behaviour.
    pub bridge: BridgeConfig,

    /// How long `stop()` lets in-flight requests drain, in seconds.
    pub shutdown_grace_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            https: false,
            key: None,
            cert: None,
            logging: true,
            cors: CorsPolicy::Any,
            error_on_bind_fail: true,
            enable_body_parser: true,
            body_parser_limit: ByteSize::mib(100),
            enable_socket_io: true,
            socket_io_path: "/socket.io".to_string(),
            trust_proxy: false,
            bridge: BridgeConfig::default(),
            shutdown_grace_secs: 5,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// TLS material, if HTTPS is requested and both halves are configured.
    pub fn tls_material(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (self.https, &self.cert, &self.key) {
            (true, Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    pub fn scheme_label(&self) -> &'static str {
        if self.tls_material().is_some() {
            "HTTPS"
        } else {
            "HTTP"
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Origin policy applied by the CORS stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "RawCors", into = "RawCors")]
pub enum CorsPolicy {
    /// No CORS headers are added.
    Disabled,
    /// `*`: every origin is allowed. With credentials the request origin is echoed.
    Any,
    /// A single fixed origin.
    Origin(String),
    /// An allow-list; matching origins are echoed.
    List(Vec<String>),
}

impl CorsPolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CorsPolicy::Disabled)
    }
}

impl fmt::Display for CorsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorsPolicy::Disabled => write!(f, "disabled"),
            CorsPolicy::Any => write!(f, "*"),
            CorsPolicy::Origin(origin) => write!(f, "{}", origin),
            CorsPolicy::List(origins) => write!(f, "[{}]", origins.join(", ")),
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum RawCors {
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

impl From<RawCors> for CorsPolicy {
    fn from(raw: RawCors) -> Self {
        match raw {
            RawCors::Flag(false) => CorsPolicy::Disabled,
            RawCors::Flag(true) => CorsPolicy::Any,
            RawCors::One(origin) if origin.is_empty() => CorsPolicy::Disabled,
            RawCors::One(origin) if origin == "*" => CorsPolicy::Any,
            RawCors::One(origin) => CorsPolicy::Origin(origin),
            RawCors::Many(origins) if origins.is_empty() => CorsPolicy::Disabled,
            RawCors::Many(origins) => CorsPolicy::List(origins),
        }
    }
}

impl From<CorsPolicy> for RawCors {
    fn from(policy: CorsPolicy) -> Self {
        match policy {
            CorsPolicy::Disabled => RawCors::Flag(false),
            CorsPolicy::Any => RawCors::One("*".to_string()),
            CorsPolicy::Origin(origin) => RawCors::One(origin),
            CorsPolicy::List(origins) => RawCors::Many(origins),
        }
    }
}

/// A byte count, written either as an integer or as `"<n><unit>"` with
/// `b`, `kb`, `mb` or `gb` (1024-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawSize", into = "RawSize")]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn mib(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    /// Parse a size string such as `100mb`, `512kb` or `2048`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let text = input.trim().to_ascii_lowercase();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid size: {:?}", input))?;
        let multiplier: u64 = match unit.trim() {
            "" | "b" => 1,
            "kb" => 1 << 10,
            "mb" => 1 << 20,
            "gb" => 1 << 30,
            other => return Err(format!("unknown size unit {:?} in {:?}", other, input)),
        };
        Ok(Self((value * multiplier as f64).floor() as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawSize> for ByteSize {
    type Error = String;

    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Bytes(n) => Ok(ByteSize(n)),
            RawSize::Text(text) => ByteSize::parse(&text),
        }
    }
}

impl From<ByteSize> for RawSize {
    fn from(size: ByteSize) -> Self {
        RawSize::Bytes(size.0)
    }
}

/// How the CRUD bridge answers HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    /// Wait for the data layer's reply and relay it.
    #[default]
    Await,
    /// Publish the event and answer `202 Accepted` immediately.
    Acknowledge,
}

/// CRUD bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mode: BridgeMode,

    /// Upper bound on waiting for a data-layer reply, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::Await,
            timeout_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_props() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors, CorsPolicy::Any);
        assert!(config.error_on_bind_fail);
        assert_eq!(config.body_parser_limit.0, 100 * 1024 * 1024);
        assert_eq!(config.scheme_label(), "HTTP");
    }

    #[test]
    fn cors_policy_forms() {
        let parse = |s: &str| toml::from_str::<GatewayConfig>(s).unwrap().cors;
        assert_eq!(parse("cors = false"), CorsPolicy::Disabled);
        assert_eq!(parse("cors = \"\""), CorsPolicy::Disabled);
        assert_eq!(parse("cors = \"*\""), CorsPolicy::Any);
        assert_eq!(
            parse("cors = \"https://a.example\""),
            CorsPolicy::Origin("https://a.example".into())
        );
        assert_eq!(
            parse("cors = [\"https://a.example\", \"https://b.example\"]"),
            CorsPolicy::List(vec!["https://a.example".into(), "https://b.example".into()])
        );
    }

    #[test]
    fn camel_case_aliases() {
        let config: GatewayConfig = toml::from_str(
            "errorOnBindFail = false\nbodyParserLimit = \"512kb\"\nenableSocketIo = false",
        )
        .unwrap();
        assert!(!config.error_on_bind_fail);
        assert_eq!(config.body_parser_limit, ByteSize(512 * 1024));
        assert!(!config.enable_socket_io);
    }

    #[test]
    fn byte_size_parsing() {
        assert_eq!(ByteSize::parse("100mb").unwrap(), ByteSize::mib(100));
        assert_eq!(ByteSize::parse("1.5kb").unwrap(), ByteSize(1536));
        assert_eq!(ByteSize::parse("42").unwrap(), ByteSize(42));
        assert_eq!(ByteSize::parse(" 2GB ").unwrap(), ByteSize(2 << 30));
        assert!(ByteSize::parse("ten mb").is_err());
        assert!(ByteSize::parse("10tb").is_err());
    }

    #[test]
    fn tls_requires_both_halves() {
        let mut config = GatewayConfig {
            https: true,
            cert: Some("cert.pem".into()),
            ..GatewayConfig::default()
        };
        assert!(config.tls_material().is_none());
        config.key = Some("key.pem".into());
        assert!(config.tls_material().is_some());
        assert_eq!(config.scheme_label(), "HTTPS");
    }
}
