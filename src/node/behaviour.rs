//! libp2p network behaviour definition.

use libp2p::swarm::NetworkBehaviour;
use libp2p::{gossipsub, upnp};
use libp2p_stream as stream;

/// Network behaviour combining gossipsub, raw request/response streams and
/// UPnP port mapping. Relay and ping are deliberately absent.
#[derive(NetworkBehaviour)]
pub(crate) struct Behaviour {
    /// Gossipsub with Ethereum consensus parameters and peer scoring.
    pub(crate) gossipsub: gossipsub::Behaviour,

    /// Raw streams for request/response. All timeout logic lives in the
    /// request/response engine; this is just a pipe.
    pub(crate) stream: stream::Behaviour,

    /// UPnP NAT port mapping.
    pub(crate) upnp: upnp::tokio::Behaviour,
}
