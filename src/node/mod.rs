//! libp2p host ownership: swarm construction and the background event loop.
//!
//! The swarm lives on a dedicated task; everything else talks to it through
//! the command channel or the cloneable stream control. Shared registries
//! (subscriptions, pending validations) are visible to both the event loop
//! and the host-facing facades.

mod behaviour;
mod builder;
mod command;
mod event_loop;

pub use command::CommandSender;
pub(crate) use command::{channel as command_channel, SwarmCommand};

use crate::config::Config;
use crate::gossip::{self, PendingValidation, Subscription};
use crate::port::NotificationSender;
use behaviour::Behaviour;
use dashmap::DashMap;
use libp2p::{identity, upnp, PeerId};
use libp2p_stream as stream;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("transport setup failed: {0}")]
    Transport(String),

    #[error("behaviour setup failed: {0}")]
    Behaviour(String),

    #[error("gossipsub setup failed: {0}")]
    Gossipsub(String),

    #[error("listen failed on {0}")]
    Listen(String),
}

/// Handles onto the running libp2p host.
pub struct Node {
    pub peer_id: PeerId,
    pub commands: CommandSender,
    /// Stream control for opening and accepting request/response streams.
    pub control: stream::Control,
    pub subscriptions: Arc<DashMap<String, Subscription>>,
    pub pending_validations: Arc<DashMap<Vec<u8>, PendingValidation>>,
}

/// Build the swarm, bind the listen addresses and spawn the event loop.
pub fn spawn(
    config: &Config,
    keypair: identity::Keypair,
    notifications: NotificationSender,
) -> Result<Node, NodeError> {
    let peer_id = PeerId::from(keypair.public());
    info!(peer = %peer_id, "starting libp2p host");

    let gossipsub = gossip::build_gossipsub().map_err(|e| NodeError::Gossipsub(e.to_string()))?;
    let stream_behaviour = stream::Behaviour::new();
    let control = stream_behaviour.new_control();
    let behaviour = Behaviour {
        gossipsub,
        stream: stream_behaviour,
        upnp: upnp::tokio::Behaviour::default(),
    };

    let mut swarm = builder::build_swarm(keypair, behaviour)?;
    for addr in &config.listen_addrs {
        swarm
            .listen_on(addr.clone())
            .map_err(|e| NodeError::Listen(format!("{addr}: {e}")))?;
    }

    let (commands, command_rx) = command::channel();
    let subscriptions = Arc::new(DashMap::new());
    let pending_validations = Arc::new(DashMap::new());

    tokio::spawn(event_loop::run(
        swarm,
        command_rx,
        subscriptions.clone(),
        pending_validations.clone(),
        notifications,
    ));

    Ok(Node {
        peer_id,
        commands,
        control,
        subscriptions,
        pending_validations,
    })
}
