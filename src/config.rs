//! Daemon configuration decoded from the host's `InitArgs`.

use crate::proto::InitArgs;
use libp2p::Multiaddr;
use std::net::SocketAddr;

/// Typed startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// libp2p listen addresses.
    pub listen_addrs: Vec<Multiaddr>,
    /// Whether the discv5 service is started.
    pub enable_discovery: bool,
    /// UDP socket address for discv5.
    pub discovery_addr: SocketAddr,
    /// Bootstrap node records, `enr:`-prefixed.
    pub bootnodes: Vec<String>,
    /// Raw secp256k1 private key; `None` means generate an ephemeral one.
    pub private_key: Option<Vec<u8>>,
    /// Initial `eth2` ENR entry (16 bytes; first 4 are the fork digest).
    pub eth2: Vec<u8>,
    /// Initial `attnets` ENR entry (8-byte bitfield).
    pub attnets: Vec<u8>,
    /// Initial `syncnets` ENR entry (1-byte bitfield).
    pub syncnets: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {addr:?}: {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    #[error("invalid discovery address {addr:?}: {reason}")]
    InvalidDiscoveryAddr { addr: String, reason: String },
}

impl Config {
    pub fn from_init_args(args: InitArgs) -> Result<Self, ConfigError> {
        let mut listen_addrs = Vec::with_capacity(args.listen_addrs.len());
        for addr in &args.listen_addrs {
            let parsed = addr
                .parse::<Multiaddr>()
                .map_err(|e| ConfigError::InvalidListenAddr {
                    addr: addr.clone(),
                    reason: e.to_string(),
                })?;
            listen_addrs.push(parsed);
        }

        let discovery_addr = if args.discovery_addr.is_empty() {
            "0.0.0.0:0".parse().expect("static socket address")
        } else {
            args.discovery_addr.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidDiscoveryAddr {
                    addr: args.discovery_addr.clone(),
                    reason: e.to_string(),
                }
            })?
        };

        let entries = args.enr_entries.unwrap_or_default();
        Ok(Self {
            listen_addrs,
            enable_discovery: args.enable_discovery,
            discovery_addr,
            bootnodes: args.bootnodes,
            private_key: (!args.private_key.is_empty()).then_some(args.private_key),
            eth2: or_default(entries.eth2, 16),
            attnets: or_default(entries.attnets, 8),
            syncnets: or_default(entries.syncnets, 1),
        })
    }

    /// The current fork digest: the first 4 bytes of the `eth2` entry.
    pub fn fork_digest(&self) -> [u8; 4] {
        let mut digest = [0u8; 4];
        let len = self.eth2.len().min(4);
        digest[..len].copy_from_slice(&self.eth2[..len]);
        digest
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addrs: vec![],
            enable_discovery: false,
            discovery_addr: "0.0.0.0:0".parse().expect("static socket address"),
            bootnodes: vec![],
            private_key: None,
            eth2: vec![0; 16],
            attnets: vec![0; 8],
            syncnets: vec![0; 1],
        }
    }
}

fn or_default(value: Vec<u8>, len: usize) -> Vec<u8> {
    if value.is_empty() {
        vec![0; len]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::EnrEntries;

    #[test]
    fn decodes_init_args() {
        let args = InitArgs {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/9000".into()],
            enable_discovery: true,
            discovery_addr: "0.0.0.0:9001".into(),
            bootnodes: vec![],
            private_key: vec![],
            enr_entries: Some(EnrEntries {
                eth2: vec![0xaa, 0xbb, 0xcc, 0xdd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
                attnets: vec![0; 8],
                syncnets: vec![0],
            }),
        };

        let config = Config::from_init_args(args).unwrap();
        assert_eq!(config.listen_addrs.len(), 1);
        assert!(config.enable_discovery);
        assert_eq!(config.discovery_addr.port(), 9001);
        assert_eq!(config.fork_digest(), [0xaa, 0xbb, 0xcc, 0xdd]);
        assert!(config.private_key.is_none());
    }

    #[test]
    fn rejects_malformed_listen_addr() {
        let args = InitArgs {
            listen_addrs: vec!["not-a-multiaddr".into()],
            ..Default::default()
        };
        assert!(matches!(
            Config::from_init_args(args),
            Err(ConfigError::InvalidListenAddr { .. })
        ));
    }

    #[test]
    fn missing_enr_entries_fall_back_to_zeroed_fields() {
        let config = Config::from_init_args(InitArgs::default()).unwrap();
        assert_eq!(config.eth2.len(), 16);
        assert_eq!(config.attnets.len(), 8);
        assert_eq!(config.syncnets.len(), 1);
        assert_eq!(config.fork_digest(), [0; 4]);
    }
}
