use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use oscar_proxy::{DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT};

/// How long each connection strategy may run before escalating.
///
/// These are client policy, not protocol requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Connect to the peer's self-declared address. Often a NAT-internal
    /// address, so this fails fast.
    pub client_ip: Duration,
    /// Connect to the address the server observed for the peer.
    pub verified_ip: Duration,
    /// Listen for the peer after asking it to connect to us.
    pub redirect_wait: Duration,
    /// Relay login, and the sender's wait for the receiver. Expiry is fatal.
    pub proxy: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            client_ip: Duration::from_secs(1),
            verified_ip: Duration::from_secs(5),
            redirect_wait: Duration::from_secs(10),
            proxy: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Local screen name, sent in relay logins and direct IM frames.
    pub screen_name: String,
    /// Interface to listen on for inbound peer connections.
    pub listen_ip: IpAddr,
    /// Client IP to advertise in proposes. Falls back to `listen_ip` when that
    /// is a concrete IPv4 address.
    pub advertise_ip: Option<Ipv4Addr>,
    pub proxy_host: String,
    pub proxy_port: u16,
    /// Skip direct connection and start every send at proxy stage 1.
    pub always_use_proxy: bool,
    /// Where accepted files land when the UI gives no explicit path.
    pub download_dir: PathBuf,
    /// Read/write granularity of the byte pump.
    pub chunk_size: usize,
    pub timeouts: TimeoutPolicy,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            screen_name: String::new(),
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_ip: None,
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
            proxy_port: DEFAULT_PROXY_PORT,
            always_use_proxy: false,
            download_dir: PathBuf::from("."),
            chunk_size: 64 * 1024,
            timeouts: TimeoutPolicy::default(),
        }
    }
}

impl RendezvousConfig {
    /// Build a config from `OSCAR_*` environment variables. Missing or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeouts = TimeoutPolicy {
            client_ip: env_millis("OSCAR_TIMEOUT_CLIENT_IP_MS").unwrap_or(defaults.timeouts.client_ip),
            verified_ip: env_millis("OSCAR_TIMEOUT_VERIFIED_IP_MS")
                .unwrap_or(defaults.timeouts.verified_ip),
            redirect_wait: env_millis("OSCAR_TIMEOUT_REDIRECT_MS")
                .unwrap_or(defaults.timeouts.redirect_wait),
            proxy: env_millis("OSCAR_TIMEOUT_PROXY_MS").unwrap_or(defaults.timeouts.proxy),
        };

        Self {
            screen_name: std::env::var("OSCAR_SCREEN_NAME").unwrap_or(defaults.screen_name),
            listen_ip: env_parse("OSCAR_LISTEN_IP").unwrap_or(defaults.listen_ip),
            advertise_ip: env_parse("OSCAR_ADVERTISE_IP"),
            proxy_host: std::env::var("OSCAR_PROXY_HOST").unwrap_or(defaults.proxy_host),
            proxy_port: env_parse("OSCAR_PROXY_PORT").unwrap_or(defaults.proxy_port),
            always_use_proxy: env_parse("OSCAR_ALWAYS_PROXY").unwrap_or(defaults.always_use_proxy),
            download_dir: std::env::var("OSCAR_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            chunk_size: defaults.chunk_size,
            timeouts,
        }
    }

    /// Client IP placed in outbound proposes, if we know one.
    pub fn advertised_ip(&self) -> Option<Ipv4Addr> {
        self.advertise_ip.or(match self.listen_ip {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.client_ip, Duration::from_secs(1));
        assert_eq!(policy.verified_ip, Duration::from_secs(5));
        assert_eq!(policy.redirect_wait, Duration::from_secs(10));
        assert_eq!(policy.proxy, Duration::from_secs(300));
    }

    #[test]
    fn advertised_ip_prefers_explicit() {
        let mut config = RendezvousConfig::default();
        assert_eq!(config.advertised_ip(), None);

        config.listen_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(config.advertised_ip(), Some(Ipv4Addr::LOCALHOST));

        config.advertise_ip = Some(Ipv4Addr::new(203, 0, 113, 4));
        assert_eq!(config.advertised_ip(), Some(Ipv4Addr::new(203, 0, 113, 4)));
    }
}
