//! Daemon configuration file.

use std::net::IpAddr;
use std::path::PathBuf;

use knode_id::Id160;
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// The node's 160-bit identity, as 40 hex characters. Defaults to a
    /// fresh random id when absent from the config file.
    #[serde(default = "default_self_id_hex")]
    pub self_id: String,
    /// The address advertised to peers (what NAT traversal gave us).
    #[serde(default = "default_external_ip")]
    pub external_ip: IpAddr,
    /// The address the UDP socket is bound to.
    #[serde(default = "default_internal_ip")]
    pub internal_ip: IpAddr,
    /// UDP port; IPv4 and IPv6 sockets share this port number.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Optional IPv6 bind address, for dual-stack operation.
    #[serde(default)]
    pub ipv6_bind: Option<IpAddr>,
    /// `knode://<id>@<ip>:<port>` URLs of peers to bootstrap from. Empty
    /// means this node is itself a bootstrap node.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Bucket size (`K`). Exposed for testing; production deployments
    /// should leave this at the default.
    #[serde(default = "default_k")]
    pub bucket_size: usize,
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_self_id_hex() -> String {
    Id160::random().to_hex()
}

fn default_external_ip() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_internal_ip() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_udp_port() -> u16 {
    0
}

fn default_k() -> usize {
    knode_dht::K
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            self_id: default_self_id_hex(),
            external_ip: default_external_ip(),
            internal_ip: default_internal_ip(),
            udp_port: default_udp_port(),
            ipv6_bind: None,
            bootstrap_peers: Vec::new(),
            bucket_size: default_k(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, or from the default location
    /// (`$KNODE_DATA_DIR/config.toml`, falling back to `~/.knode`), falling
    /// back to defaults if no file exists.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse `self_id` into an [`Id160`].
    pub fn self_id(&self) -> anyhow::Result<Id160> {
        Id160::from_hex(&self.self_id).map_err(|e| anyhow::anyhow!("invalid self_id: {e}"))
    }

    fn default_config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("KNODE_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".knode"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/knode"))
    }
}
