use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiveError, Result};

pub struct Config {
    pub server: ServerConfig,
    pub ice: IceConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// STUN/TURN servers handed to peer connections and to clients via `/live/config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Timing knobs for one room session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed cadence of the presence/record reconciliation pass.
    pub reconcile_interval: Duration,
    /// How long an open participant record may lack presence before it is force-closed.
    pub presence_grace: Duration,
    /// How long a peer link may stay `disconnected` before it is torn down.
    pub link_grace: Duration,
    /// Upper bound for the fire-and-forget presence-leave on channel leave.
    pub leave_timeout: Duration,
    /// Audio meter sampling cadence; `None` disables metering.
    pub meter_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(5_000),
            presence_grace: Duration::from_millis(15_000),
            link_grace: Duration::from_millis(10_000),
            leave_timeout: Duration::from_millis(2_000),
            meter_interval: Some(Duration::from_millis(100)),
        }
    }
}

/// Hosted record store endpoint. `url == None` selects the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| LiveError::InvalidConfiguration("Invalid SERVER_PORT".to_string()))?;

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            ice: IceConfig::from_env(),
            session: SessionConfig::from_env(),
            store: StoreConfig {
                url: env::var("STORE_URL").ok().filter(|u| !u.is_empty()),
                api_key: env::var("STORE_API_KEY").ok(),
            },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        // Try to parse as IP address first
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

impl IceConfig {
    pub fn from_env() -> Self {
        let stun_server = env::var("STUN_SERVER_URL")
            .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string());

        let mut turn_servers = vec![];

        // TURN is optional and needs all three variables
        if let (Ok(turn_url), Ok(username), Ok(credential)) = (
            env::var("TURN_SERVER_URL"),
            env::var("TURN_USERNAME"),
            env::var("TURN_CREDENTIAL"),
        ) {
            turn_servers.push(TurnServer {
                urls: vec![turn_url],
                username,
                credential,
            });
        }

        Self {
            stun_servers: vec![stun_server],
            turn_servers,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let meter_ms: u64 = env_or("METER_INTERVAL_MS", 100);

        Self {
            reconcile_interval: env_millis("RECONCILE_INTERVAL_MS", defaults.reconcile_interval),
            presence_grace: env_millis("PRESENCE_GRACE_MS", defaults.presence_grace),
            link_grace: env_millis("LINK_GRACE_MS", defaults.link_grace),
            leave_timeout: env_millis("LEAVE_TIMEOUT_MS", defaults.leave_timeout),
            meter_interval: (meter_ms > 0).then(|| Duration::from_millis(meter_ms)),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}
