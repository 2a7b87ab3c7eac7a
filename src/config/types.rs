use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration for smpplink
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Inbound listeners, keyed by listener id
    #[serde(default)]
    pub listener: HashMap<String, ListenerConfig>,

    /// Outbound client connections, keyed by connection id
    #[serde(default)]
    pub connection: HashMap<String, ConnectionConfig>,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,

    /// Prometheus scrape endpoint; disabled when absent
    #[serde(default)]
    pub metrics_address: Option<SocketAddr>,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Start this listener at boot
    #[serde(default)]
    pub enabled: bool,

    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address family
    #[serde(default)]
    pub family: IpFamily,

    /// How long an accepted connection may stay unbound before it is
    /// force-closed
    #[serde(default = "default_bind_timeout", with = "humantime_serde")]
    pub bind_timeout: Duration,

    /// How long a request sent on an accepted connection may wait for its
    /// response
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            family: IpFamily::default(),
            bind_timeout: default_bind_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Outbound connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Dial this connection at boot
    #[serde(default)]
    pub enabled: bool,

    /// Remote host
    #[serde(default = "default_host")]
    pub host: String,

    /// Remote port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address family
    #[serde(default)]
    pub family: IpFamily,

    /// system_id for the automatic bind after (re)connecting
    #[serde(default = "default_system_id")]
    pub system_id: String,

    /// password for the automatic bind
    #[serde(default = "default_password")]
    pub password: String,

    /// Which bind to issue after connecting
    #[serde(rename = "type", default)]
    pub bind_type: BindType,

    /// Reconnect after loss once this interval has elapsed; no restart when
    /// absent
    #[serde(default, with = "humantime_serde::opt")]
    pub restart: Option<Duration>,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Pause between a reconnect and the automatic rebind
    #[serde(default = "default_bind_delay", with = "humantime_serde")]
    pub bind_delay: Duration,

    /// How long a request sent on this connection may wait for its response
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            family: IpFamily::default(),
            system_id: default_system_id(),
            password: default_password(),
            bind_type: BindType::default(),
            restart: None,
            connect_timeout: default_connect_timeout(),
            bind_delay: default_bind_delay(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Address family for sockets
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub enum IpFamily {
    #[default]
    #[serde(rename = "ipv4")]
    V4,
    #[serde(rename = "ipv6")]
    V6,
}

impl IpFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }

    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
        }
    }

    /// Resolve `host:port` to the first address of this family.
    pub async fn resolve(&self, host: &str, port: u16) -> std::io::Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((host, port)).await?;
        addrs.find(|addr| self.matches(addr)).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no {} address for {host}", self.as_str()),
            )
        })
    }
}

/// Bind flavour for outbound connections
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindType {
    Transmitter,
    Receiver,
    #[default]
    Transceiver,
}

impl BindType {
    /// Event name of the bind this type issues.
    pub fn event_name(&self) -> &'static str {
        match self {
            BindType::Transmitter => "smpp.bind_transmitter",
            BindType::Receiver => "smpp.bind_receiver",
            BindType::Transceiver => "smpp.bind_transceiver",
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit structured JSON instead of the human format
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2775
}

fn default_bind_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_bind_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_system_id() -> String {
    "SYSTEM_ID".to_string()
}

fn default_password() -> String {
    "PASSWORD".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use serde::{self, Deserialize, Deserializer};
        use std::time::Duration;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = Option::<String>::deserialize(deserializer)?;
            match s {
                Some(s) => humantime::parse_duration(&s)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
