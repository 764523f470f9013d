//! Commands sent from the facades to the swarm task.

use libp2p::gossipsub::{MessageAcceptance, MessageId};
use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Commands handled by the swarm event loop.
#[derive(Debug)]
pub(crate) enum SwarmCommand {
    /// Dial a peer at the given addresses.
    Dial {
        peer_id: PeerId,
        addrs: Vec<Multiaddr>,
    },

    /// Subscribe to a gossipsub topic.
    Subscribe { topic: String },

    /// Unsubscribe from a gossipsub topic.
    Unsubscribe { topic: String },

    /// Publish data to a topic.
    Publish { topic: String, data: Vec<u8> },

    /// Report the host's validation verdict for a parked message.
    ReportValidation {
        message_id: MessageId,
        source: PeerId,
        acceptance: MessageAcceptance,
    },

    /// Query current listen addresses.
    ListenAddresses {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
}

/// Cloneable sender half of the swarm command channel.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl CommandSender {
    /// Send a command to the swarm task. A closed channel means the swarm
    /// task is gone (shutdown); the command is dropped.
    pub(crate) fn send(&self, command: SwarmCommand) {
        if self.tx.send(command).is_err() {
            warn!("swarm task gone, dropping command");
        }
    }
}

/// Create the command channel between facades and the swarm task.
pub(crate) fn channel() -> (CommandSender, mpsc::UnboundedReceiver<SwarmCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, rx)
}
