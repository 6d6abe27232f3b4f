use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{net, rotation, room};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebTransport endpoint to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Port for metrics, health and map upload
    pub admin_port: u16,
    /// sqlx connection string for the map database
    pub database_url: String,
    /// Time between map rotations
    pub rotation_interval: Duration,
    /// Silence after which a connection is closed
    pub idle_timeout: Duration,
    /// How often idle connections are looked for
    pub reap_interval: Duration,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Maximum number of lobby rooms, including the global room
    pub max_rooms: usize,
    /// Path to TLS certificate file (if not using the dev certificate)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using the dev certificate)
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4433,
            admin_port: 9090,
            database_url: "sqlite://maps.db?mode=rwc".to_string(),
            rotation_interval: Duration::from_secs(rotation::DEFAULT_INTERVAL_SECS),
            idle_timeout: Duration::from_secs(net::DEFAULT_IDLE_TIMEOUT_SECS),
            reap_interval: Duration::from_secs(net::DEFAULT_REAP_INTERVAL_SECS),
            max_connections: net::DEFAULT_MAX_CONNECTIONS,
            max_rooms: room::DEFAULT_MAX_ROOMS,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Parse `name` into `target` when present and accepted by `valid`
fn apply<T, F>(lookup: &F, name: &str, target: &mut T, valid: impl Fn(&T) -> bool)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if valid(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} value '{}' out of range, using default", name, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
    }
}

fn apply_secs<F>(lookup: &F, name: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs();
    apply(lookup, name, &mut secs, |s| *s > 0);
    *target = Duration::from_secs(secs);
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        apply(&lookup, "BIND_ADDRESS", &mut config.bind_address, |_| true);
        apply(&lookup, "PORT", &mut config.port, |p| *p > 0);
        apply(&lookup, "ADMIN_PORT", &mut config.admin_port, |p| *p > 0);
        apply(&lookup, "MAX_CONNECTIONS", &mut config.max_connections, |n| *n > 0);
        apply(&lookup, "MAX_ROOMS", &mut config.max_rooms, |n| *n > 0 && *n <= 10000);
        apply_secs(&lookup, "ROTATION_INTERVAL_SECS", &mut config.rotation_interval);
        apply_secs(&lookup, "IDLE_TIMEOUT_SECS", &mut config.idle_timeout);
        apply_secs(&lookup, "REAP_INTERVAL_SECS", &mut config.reap_interval);

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            config.database_url = url;
        }
        config.tls_cert_path = lookup("TLS_CERT_PATH");
        config.tls_key_path = lookup("TLS_KEY_PATH");

        config
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 || self.admin_port == 0 {
            return Err("Ports cannot be 0".to_string());
        }
        if self.port == self.admin_port {
            return Err("PORT and ADMIN_PORT must differ".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.max_rooms == 0 {
            return Err("max_rooms must be at least 1".to_string());
        }
        if self.rotation_interval.is_zero() || self.reap_interval.is_zero() {
            return Err("Intervals must be non-zero".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}
