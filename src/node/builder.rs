//! Swarm construction with the TCP + noise transport stack.

use super::behaviour::Behaviour;
use super::NodeError;
use libp2p::{identity, noise, tcp, yamux, Swarm, SwarmBuilder};
use libp2p_mplex as mplex;
use std::time::Duration;

/// Connections without live streams are kept around for this long.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a swarm with TCP transport, noise security and both yamux and
/// `/mplex/6.7.0` stream muxers offered during negotiation.
pub(super) fn build_swarm(
    keypair: identity::Keypair,
    behaviour: Behaviour,
) -> Result<Swarm<Behaviour>, NodeError> {
    Ok(SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            (yamux::Config::default, mplex::MplexConfig::default),
        )
        .map_err(|e| NodeError::Transport(e.to_string()))?
        .with_behaviour(|_| behaviour)
        .map_err(|e| NodeError::Behaviour(format!("{e:?}")))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build())
}
