//! Gossipsub layer: Ethereum consensus parameters, the post-Altair message-id
//! scheme, the subscription registry and the host-in-the-loop validation
//! bridge.
//!
//! Messages are never judged locally. Every delivery is parked in the
//! pending-validation registry and surfaced to the host as a `Gossip`
//! notification; the host answers with a `ValidateMessage` command that is
//! reported back to gossipsub as accept / reject / ignore.

use crate::node::{CommandSender, SwarmCommand};
use crate::port::NotificationSender;
use crate::proto::{self, tracer, PeerAdded, PeerRemoved, TopicEvent};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use libp2p::gossipsub::{self, MessageAcceptance, MessageId};
use libp2p::PeerId;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Mesh degree.
pub const MESH_D: usize = 8;
/// Mesh degree low watermark.
pub const MESH_D_LO: usize = 6;
/// Gossipsub heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(700);
/// How long fanout peers are remembered for unsubscribed topics.
const FANOUT_TTL: Duration = Duration::from_secs(60);
/// Full-message history windows.
const HISTORY_LENGTH: usize = 6;
/// Windows gossiped about in IHAVEs.
const HISTORY_GOSSIP: usize = 3;
/// Message ids are remembered for 550 heartbeats.
const SEEN_MESSAGES_TTL: Duration = Duration::from_millis(550 * 700);
/// Maximum transmit size for a gossip message.
pub const MAX_GOSSIP_SIZE: usize = 10 * (1 << 20);

const MESSAGE_DOMAIN_INVALID_SNAPPY: [u8; 4] = [0, 0, 0, 0];
const MESSAGE_DOMAIN_VALID_SNAPPY: [u8; 4] = [1, 0, 0, 0];
const MESSAGE_ID_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("gossipsub configuration error: {0}")]
    Config(String),
}

/// Per-topic record. A topic is *joined* once present in the registry and
/// *subscribed* once a handler tag is attached.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub handler: Option<Vec<u8>>,
}

/// A message parked in gossipsub awaiting the host's verdict.
#[derive(Debug, Clone)]
pub struct PendingValidation {
    /// Peer the message was received from; required to report the verdict.
    pub source: PeerId,
    pub topic: String,
}

/// Builds the gossipsub configuration used for Ethereum consensus interop.
pub fn gossipsub_config() -> gossipsub::Config {
    gossipsub::ConfigBuilder::default()
        .mesh_n(MESH_D)
        .mesh_n_low(MESH_D_LO)
        .heartbeat_interval(HEARTBEAT_INTERVAL)
        .fanout_ttl(FANOUT_TTL)
        .history_length(HISTORY_LENGTH)
        .history_gossip(HISTORY_GOSSIP)
        .max_transmit_size(MAX_GOSSIP_SIZE)
        .duplicate_cache_time(SEEN_MESSAGES_TTL)
        // Consensus messages carry no author and no signature.
        .validation_mode(gossipsub::ValidationMode::Anonymous)
        // Every delivery waits for an explicit verdict from the host.
        .validate_messages()
        .message_id_fn(compute_message_id)
        .build()
        .expect("gossipsub config must be valid")
}

/// Peer score parameters fixed by the consensus networking spec.
pub fn score_params() -> gossipsub::PeerScoreParams {
    gossipsub::PeerScoreParams {
        topic_score_cap: 32.72,
        app_specific_weight: 1.0,
        ip_colocation_factor_weight: -35.11,
        ip_colocation_factor_threshold: 10.0,
        behaviour_penalty_weight: -15.92,
        behaviour_penalty_threshold: 6.0,
        behaviour_penalty_decay: 0.01f64.powf(1.0 / (10.0 * 32.0)),
        decay_interval: Duration::from_secs(12),
        decay_to_zero: 0.01,
        retain_score: Duration::from_secs(100 * 32 * 12),
        ..Default::default()
    }
}

pub fn score_thresholds() -> gossipsub::PeerScoreThresholds {
    gossipsub::PeerScoreThresholds {
        gossip_threshold: -4000.0,
        publish_threshold: -8000.0,
        graylist_threshold: -16000.0,
        accept_px_threshold: 100.0,
        opportunistic_graft_threshold: 5.0,
    }
}

/// Builds the gossipsub behaviour with scoring attached.
pub fn build_gossipsub() -> Result<gossipsub::Behaviour, GossipError> {
    let mut behaviour = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Anonymous,
        gossipsub_config(),
    )
    .map_err(|e| GossipError::Config(e.to_string()))?;
    behaviour
        .with_peer_score(score_params(), score_thresholds())
        .map_err(|e| GossipError::Config(e.to_string()))?;
    Ok(behaviour)
}

fn compute_message_id(msg: &gossipsub::Message) -> MessageId {
    MessageId::from(altair_message_id(msg.topic.as_str(), &msg.data).to_vec())
}

/// Post-Altair message id: SHA-256 over a snappy domain, the topic length
/// (little-endian u64), the topic, and the (decoded) payload; truncated to
/// 20 bytes. Degenerate messages get a fixed sentinel id.
pub fn altair_message_id(topic: &str, data: &[u8]) -> [u8; MESSAGE_ID_LEN] {
    if topic.is_empty() || data.is_empty() {
        let mut id = [0u8; MESSAGE_ID_LEN];
        id[..7].copy_from_slice(b"invalid");
        return id;
    }

    let mut hasher = Sha256::new();
    let decoded = snap::raw::Decoder::new().decompress_vec(data);
    let payload = match &decoded {
        Ok(decoded) => {
            hasher.update(MESSAGE_DOMAIN_VALID_SNAPPY);
            decoded.as_slice()
        }
        Err(_) => {
            hasher.update(MESSAGE_DOMAIN_INVALID_SNAPPY);
            data
        }
    };
    hasher.update((topic.len() as u64).to_le_bytes());
    hasher.update(topic.as_bytes());
    hasher.update(payload);

    let digest = hasher.finalize();
    let mut id = [0u8; MESSAGE_ID_LEN];
    id.copy_from_slice(&digest[..MESSAGE_ID_LEN]);
    id
}

/// Bridges pubsub internals to host notifications, one method per event.
/// Methods may be called from any task; delivery is serialized by the writer.
#[derive(Clone)]
pub struct GossipTracer {
    notifications: NotificationSender,
}

impl GossipTracer {
    pub fn new(notifications: NotificationSender) -> Self {
        Self { notifications }
    }

    async fn emit(&self, event: tracer::T) {
        self.notifications
            .send(&proto::tracer_notification(event))
            .await;
    }

    fn topic_event(topic: &str) -> TopicEvent {
        TopicEvent {
            topic: topic.to_owned(),
        }
    }

    pub async fn peer_added(&self) {
        self.emit(tracer::T::PeerAdded(PeerAdded {})).await;
    }

    pub async fn peer_removed(&self) {
        self.emit(tracer::T::PeerRemoved(PeerRemoved {})).await;
    }

    pub async fn joined(&self, topic: &str) {
        self.emit(tracer::T::Joined(Self::topic_event(topic))).await;
    }

    pub async fn left(&self, topic: &str) {
        self.emit(tracer::T::Left(Self::topic_event(topic))).await;
    }

    pub async fn grafted(&self, topic: &str) {
        self.emit(tracer::T::Grafted(Self::topic_event(topic))).await;
    }

    pub async fn pruned(&self, topic: &str) {
        self.emit(tracer::T::Pruned(Self::topic_event(topic))).await;
    }

    pub async fn validate_message(&self, topic: &str) {
        self.emit(tracer::T::ValidateMessage(Self::topic_event(topic)))
            .await;
    }

    pub async fn deliver_message(&self, topic: &str) {
        self.emit(tracer::T::DeliverMessage(Self::topic_event(topic)))
            .await;
    }

    pub async fn undeliverable_message(&self, topic: &str) {
        self.emit(tracer::T::UndeliverableMessage(Self::topic_event(topic)))
            .await;
    }

    pub async fn reject_message(&self, topic: &str) {
        self.emit(tracer::T::RejectMessage(Self::topic_event(topic)))
            .await;
    }

    pub async fn duplicate_message(&self, topic: &str) {
        self.emit(tracer::T::DuplicateMessage(Self::topic_event(topic)))
            .await;
    }
}

/// Host-facing gossip facade: topic lifecycle, publish and the validation
/// verdict path. The registries are shared with the swarm event loop.
#[derive(Clone)]
pub struct Subscriber {
    commands: CommandSender,
    subscriptions: Arc<DashMap<String, Subscription>>,
    pending_validations: Arc<DashMap<Vec<u8>, PendingValidation>>,
    tracer: GossipTracer,
}

impl Subscriber {
    pub fn new(node: &crate::node::Node, notifications: NotificationSender) -> Self {
        Self {
            commands: node.commands.clone(),
            subscriptions: node.subscriptions.clone(),
            pending_validations: node.pending_validations.clone(),
            tracer: GossipTracer::new(notifications),
        }
    }

    #[cfg(test)]
    fn from_parts(
        commands: CommandSender,
        subscriptions: Arc<DashMap<String, Subscription>>,
        pending_validations: Arc<DashMap<Vec<u8>, PendingValidation>>,
        notifications: NotificationSender,
    ) -> Self {
        Self {
            commands,
            subscriptions,
            pending_validations,
            tracer: GossipTracer::new(notifications),
        }
    }

    /// Subscribe to a topic with a handler tag. Fails if a handler is already
    /// attached; an existing joined-only record is upgraded in place.
    pub async fn subscribe(&self, name: String, handler: Vec<u8>) -> Result<(), GossipError> {
        let newly_joined = match self.subscriptions.entry(name.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().handler.is_some() {
                    return Err(GossipError::AlreadySubscribed);
                }
                occupied.get_mut().handler = Some(handler);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Subscription {
                    handler: Some(handler),
                });
                true
            }
        };

        if newly_joined {
            self.tracer.joined(&name).await;
        }
        self.commands.send(SwarmCommand::Subscribe { topic: name });
        Ok(())
    }

    /// Record a topic without subscribing; used by the publish side.
    pub async fn join(&self, name: &str) {
        let inserted = match self.subscriptions.entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Subscription { handler: None });
                true
            }
        };
        if inserted {
            self.tracer.joined(name).await;
        }
    }

    /// Drop a topic. Idempotent.
    pub async fn leave(&self, name: &str) {
        if self.subscriptions.remove(name).is_some() {
            self.commands.send(SwarmCommand::Unsubscribe {
                topic: name.to_owned(),
            });
            self.tracer.left(name).await;
        }
    }

    /// Report the host's verdict for a parked message. Unknown ids are a
    /// silent no-op (the host may retry); a result outside accept / reject /
    /// ignore is a protocol contract violation.
    pub async fn validate(&self, msg_id: &[u8], result: i32) {
        let Some((_, pending)) = self.pending_validations.remove(msg_id) else {
            return;
        };
        let message_id = MessageId::from(msg_id.to_vec());
        match result {
            0 => {
                self.commands.send(SwarmCommand::ReportValidation {
                    message_id,
                    source: pending.source,
                    acceptance: MessageAcceptance::Accept,
                });
                self.tracer.deliver_message(&pending.topic).await;
            }
            1 => {
                self.commands.send(SwarmCommand::ReportValidation {
                    message_id,
                    source: pending.source,
                    acceptance: MessageAcceptance::Reject,
                });
                self.tracer.reject_message(&pending.topic).await;
            }
            2 => {
                self.commands.send(SwarmCommand::ReportValidation {
                    message_id,
                    source: pending.source,
                    acceptance: MessageAcceptance::Ignore,
                });
            }
            other => panic!("invalid validation result: {other}"),
        }
    }

    /// Publish to a topic, joining it first if needed.
    pub async fn publish(&self, name: String, data: Vec<u8>) {
        self.join(&name).await;
        self.commands.send(SwarmCommand::Publish { topic: name, data });
    }
}
