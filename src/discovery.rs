//! discv5 peer discovery and local ENR management.
//!
//! The discv5 service runs its own UDP listener; a background loop walks the
//! DHT with random `find_node` queries, filters candidates by fork digest and
//! hands survivors to the request/response engine, which dials them and
//! emits `NewPeer`. The local ENR carries the consensus application entries
//! (`eth2`, `attnets`, `syncnets`) and is updated in place by `UpdateEnr`.

use crate::config::Config;
use crate::keys;
use crate::reqresp::Listener;
use alloy_rlp::Encodable;
use discv5::enr::NodeId;
use discv5::{ConfigBuilder, Discv5, Enr, ListenConfig};
use libp2p::identity;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Interval between random-walk queries.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Address lifetime handed to the peer store for discovered peers.
const PERMANENT_ADDR_TTL: i64 = i64::MAX;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("key conversion failed: {0}")]
    Key(#[from] keys::KeyError),

    #[error("failed to build local ENR: {0}")]
    EnrBuild(String),

    #[error("invalid bootnode record {record:?}: {reason}")]
    Bootnode { record: String, reason: String },

    #[error("discv5 error: {0}")]
    Discv5(String),
}

/// Running discovery service plus the fork-digest channel feeding its loop.
pub struct Discoverer {
    discv5: Arc<Discv5>,
    fork_digest: watch::Sender<[u8; 4]>,
}

impl Discoverer {
    /// Bind the UDP listener, build the local ENR, start discv5 and spawn the
    /// peer-finding loop. Accepted peers are dialed through `listener`.
    pub async fn spawn(
        config: &Config,
        keypair: &identity::Keypair,
        listener: Listener,
    ) -> Result<Self, DiscoveryError> {
        let enr_key = keys::discv5_key_from_keypair(keypair)?;
        let enr = build_local_enr(config, &enr_key)?;
        info!(enr = %enr.to_base64(), "local node record");

        let listen_config = listen_config(config.discovery_addr);
        let mut discv5 = Discv5::new(enr, enr_key, ConfigBuilder::new(listen_config).build())
            .map_err(|e| DiscoveryError::Discv5(e.to_string()))?;

        for record in &config.bootnodes {
            let bootnode: Enr = record.parse().map_err(|e| DiscoveryError::Bootnode {
                record: record.clone(),
                reason: format!("{e:?}"),
            })?;
            discv5
                .add_enr(bootnode)
                .map_err(|e| DiscoveryError::Bootnode {
                    record: record.clone(),
                    reason: e.to_string(),
                })?;
        }

        discv5
            .start()
            .await
            .map_err(|e| DiscoveryError::Discv5(e.to_string()))?;
        info!(addr = %config.discovery_addr, "discv5 listening");

        let discv5 = Arc::new(discv5);
        let (fork_digest, fork_digest_rx) = watch::channel(config.fork_digest());
        tokio::spawn(find_peers(discv5.clone(), fork_digest_rx, listener));

        Ok(Self {
            discv5,
            fork_digest,
        })
    }

    /// Rewrite the application entries of the local ENR and propagate the new
    /// fork digest to the peer-finding loop.
    pub fn update_enr(
        &self,
        eth2: Vec<u8>,
        attnets: Vec<u8>,
        syncnets: Vec<u8>,
    ) -> Result<(), DiscoveryError> {
        self.discv5
            .enr_insert("eth2", &eth2)
            .map_err(|e| DiscoveryError::Discv5(format!("{e:?}")))?;
        self.discv5
            .enr_insert("attnets", &attnets)
            .map_err(|e| DiscoveryError::Discv5(format!("{e:?}")))?;
        self.discv5
            .enr_insert("syncnets", &syncnets)
            .map_err(|e| DiscoveryError::Discv5(format!("{e:?}")))?;

        if eth2.len() >= 4 {
            let mut digest = [0u8; 4];
            digest.copy_from_slice(&eth2[..4]);
            self.fork_digest.send_replace(digest);
        }
        Ok(())
    }

    /// The local node record as `"enr:" + base64url(RLP(record))`.
    pub fn enr(&self) -> String {
        self.discv5.local_enr().to_base64()
    }

    /// `/ip{4,6}/<ip>/udp/<port>/p2p/<peer-id>` multiaddrs for the local
    /// record.
    pub fn discovery_addresses(&self) -> Vec<String> {
        let enr = self.discv5.local_enr();
        let Some(peer_id) = keys::peer_id_from_enr(&enr) else {
            return vec![];
        };

        let mut addrs = Vec::new();
        if let Some(socket) = enr.udp4_socket() {
            addrs.push(udp_multiaddr((*socket.ip()).into(), socket.port(), peer_id));
        }
        if let Some(socket) = enr.udp6_socket() {
            addrs.push(udp_multiaddr((*socket.ip()).into(), socket.port(), peer_id));
        }
        addrs.into_iter().map(|a| a.to_string()).collect()
    }
}

fn listen_config(addr: SocketAddr) -> ListenConfig {
    match addr {
        SocketAddr::V4(v4) => ListenConfig::Ipv4 {
            ip: *v4.ip(),
            port: v4.port(),
        },
        SocketAddr::V6(v6) => ListenConfig::Ipv6 {
            ip: *v6.ip(),
            port: v6.port(),
        },
    }
}

fn build_local_enr(
    config: &Config,
    enr_key: &discv5::enr::CombinedKey,
) -> Result<Enr, DiscoveryError> {
    let mut builder = Enr::builder();
    // The discovery socket doubles as the fallback endpoint: discv5
    // advertises these entries until its IP voting confirms an external
    // one, then rewrites them itself.
    match config.discovery_addr {
        SocketAddr::V4(v4) => {
            builder
                .ip4(*v4.ip())
                .udp4(v4.port())
                .tcp4(v4.port());
        }
        SocketAddr::V6(v6) => {
            builder
                .ip6(*v6.ip())
                .udp6(v6.port())
                .tcp6(v6.port());
        }
    }
    for (key, value) in [
        ("eth2", &config.eth2),
        ("attnets", &config.attnets),
        ("syncnets", &config.syncnets),
    ] {
        let mut rlp = Vec::new();
        value.as_slice().encode(&mut rlp);
        builder.add_value_rlp(key, rlp.into());
    }

    builder
        .build(enr_key)
        .map_err(|e| DiscoveryError::EnrBuild(format!("{e:?}")))
}

/// Random-walk loop: query, filter, hand accepted peers to the dialer.
async fn find_peers(
    discv5: Arc<Discv5>,
    fork_digest: watch::Receiver<[u8; 4]>,
    listener: Listener,
) {
    let mut interval = tokio::time::interval(DISCOVERY_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let digest = *fork_digest.borrow();

        match discv5.find_node(NodeId::random()).await {
            Ok(enrs) => {
                for enr in enrs {
                    if !accept_peer(&enr, &digest) {
                        continue;
                    }
                    let Some((peer_id, addr)) = peer_contact(&enr) else {
                        continue;
                    };
                    debug!(peer = %peer_id, addr = %addr, "discovered peer");
                    let listener = listener.clone();
                    tokio::spawn(async move {
                        listener
                            .add_peer(
                                &peer_id.to_bytes(),
                                &[addr.to_string()],
                                PERMANENT_ADDR_TTL,
                            )
                            .await;
                    });
                }
            }
            Err(e) => {
                warn!(error = ?e, "find_node query failed");
            }
        }
    }
}

/// A candidate is dialable when it advertises an IP and a TCP port and its
/// ENR `eth2` entry starts with our current fork digest.
fn accept_peer(enr: &Enr, fork_digest: &[u8; 4]) -> bool {
    if enr.ip4().is_none() && enr.ip6().is_none() {
        return false;
    }
    if enr.tcp4().is_none() && enr.tcp6().is_none() {
        return false;
    }
    let Some(Ok(eth2)) = enr.get_decodable::<bytes::Bytes>("eth2") else {
        trace!(node = %enr.node_id(), "skipping peer without eth2 entry");
        return false;
    };
    eth2.len() >= 4 && eth2[..4] == fork_digest[..]
}

/// Build the single contact multiaddr for an accepted node: TCP preferred,
/// QUIC over UDP as fallback.
fn peer_contact(enr: &Enr) -> Option<(PeerId, Multiaddr)> {
    let peer_id = keys::peer_id_from_enr(enr)?;
    let addr = if let Some(socket) = enr.tcp4_socket() {
        Multiaddr::from(*socket.ip()).with(Protocol::Tcp(socket.port()))
    } else if let Some(socket) = enr.tcp6_socket() {
        Multiaddr::from(*socket.ip()).with(Protocol::Tcp(socket.port()))
    } else if let Some(socket) = enr.udp4_socket() {
        Multiaddr::from(*socket.ip())
            .with(Protocol::Udp(socket.port()))
            .with(Protocol::QuicV1)
    } else if let Some(socket) = enr.udp6_socket() {
        Multiaddr::from(*socket.ip())
            .with(Protocol::Udp(socket.port()))
            .with(Protocol::QuicV1)
    } else {
        return None;
    };
    Some((peer_id, addr))
}

fn udp_multiaddr(ip: std::net::IpAddr, port: u16, peer_id: PeerId) -> Multiaddr {
    Multiaddr::from(ip)
        .with(Protocol::Udp(port))
        .with(Protocol::P2p(peer_id))
}
