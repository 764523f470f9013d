//! Background event loop owning the swarm: processes facade commands and
//! swarm events, and drives the gossip validation bridge.

use super::behaviour::{Behaviour, BehaviourEvent};
use super::command::SwarmCommand;
use crate::gossip::{GossipTracer, PendingValidation, Subscription};
use crate::port::NotificationSender;
use crate::proto;
use dashmap::DashMap;
use futures::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::SwarmEvent;
use libp2p::{gossipsub, upnp, Multiaddr, Swarm};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub(super) async fn run(
    mut swarm: Swarm<Behaviour>,
    mut commands: mpsc::UnboundedReceiver<SwarmCommand>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    pending_validations: Arc<DashMap<Vec<u8>, PendingValidation>>,
    notifications: NotificationSender,
) {
    let tracer = GossipTracer::new(notifications.clone());

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => handle_command(&mut swarm, command),
                    // All facades dropped: the daemon is shutting down.
                    None => {
                        info!("command channel closed, stopping swarm event loop");
                        break;
                    }
                }
            }

            event = swarm.select_next_some() => {
                handle_event(
                    &mut swarm,
                    event,
                    &subscriptions,
                    &pending_validations,
                    &notifications,
                    &tracer,
                ).await;
            }
        }
    }
}

fn handle_command(swarm: &mut Swarm<Behaviour>, command: SwarmCommand) {
    match command {
        SwarmCommand::Dial { peer_id, addrs } => {
            let opts = DialOpts::peer_id(peer_id).addresses(addrs).build();
            if let Err(e) = swarm.dial(opts) {
                // Connect failures are transient peer errors, not surfaced.
                debug!(peer = %peer_id, error = %e, "dial failed");
            }
        }
        SwarmCommand::Subscribe { topic } => {
            let topic = gossipsub::IdentTopic::new(topic);
            match swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                Ok(_) => info!(topic = %topic, "subscribed to topic"),
                Err(e) => warn!(topic = %topic, error = ?e, "subscribe failed"),
            }
        }
        SwarmCommand::Unsubscribe { topic } => {
            let topic = gossipsub::IdentTopic::new(topic);
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            info!(topic = %topic, "unsubscribed from topic");
        }
        SwarmCommand::Publish { topic, data } => {
            let topic = gossipsub::IdentTopic::new(topic);
            let data_len = data.len();
            match swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                Ok(_) => trace!(topic = %topic, data_len, "published message"),
                // The same payload may be published by several hosts; gossipsub
                // already delivered it.
                Err(gossipsub::PublishError::Duplicate) => {
                    trace!(topic = %topic, "duplicate publish")
                }
                Err(e) => warn!(topic = %topic, data_len, error = ?e, "publish failed"),
            }
        }
        SwarmCommand::ReportValidation {
            message_id,
            source,
            acceptance,
        } => {
            trace!(msg_id = %message_id, ?acceptance, "reporting validation result");
            let _ = swarm.behaviour_mut().gossipsub.report_message_validation_result(
                &message_id,
                &source,
                acceptance,
            );
        }
        SwarmCommand::ListenAddresses { reply } => {
            let addrs: Vec<Multiaddr> = swarm.listeners().cloned().collect();
            let _ = reply.send(addrs);
        }
    }
}

async fn handle_event(
    swarm: &mut Swarm<Behaviour>,
    event: SwarmEvent<BehaviourEvent>,
    subscriptions: &DashMap<String, Subscription>,
    pending_validations: &DashMap<Vec<u8>, PendingValidation>,
    notifications: &NotificationSender,
    tracer: &GossipTracer,
) {
    match event {
        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message_id,
            message,
        })) => {
            let topic = message.topic.as_str().to_owned();
            let handler = subscriptions.get(&topic).and_then(|s| s.handler.clone());
            match handler {
                Some(handler) => {
                    if pending_validations.contains_key(&message_id.0) {
                        // Same id delivered again while the first copy is
                        // still awaiting its verdict.
                        tracer.duplicate_message(&topic).await;
                        let _ = swarm.behaviour_mut().gossipsub.report_message_validation_result(
                            &message_id,
                            &propagation_source,
                            gossipsub::MessageAcceptance::Ignore,
                        );
                    } else {
                        tracer.validate_message(&topic).await;
                        pending_validations.insert(
                            message_id.0.clone(),
                            PendingValidation {
                                source: propagation_source,
                                topic: topic.clone(),
                            },
                        );
                        notifications
                            .send(&proto::gossip_notification(
                                &topic,
                                &handler,
                                &message_id.0,
                                &message.data,
                            ))
                            .await;
                    }
                }
                None => {
                    // Joined for publishing only; nobody consumes deliveries.
                    tracer.undeliverable_message(&topic).await;
                    let _ = swarm.behaviour_mut().gossipsub.report_message_validation_result(
                        &message_id,
                        &propagation_source,
                        gossipsub::MessageAcceptance::Ignore,
                    );
                }
            }
        }

        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => {
            debug!(peer = %peer_id, topic = %topic, "peer subscribed");
            if subscriptions.contains_key(topic.as_str()) {
                tracer.grafted(topic.as_str()).await;
            }
        }

        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed {
            peer_id,
            topic,
        })) => {
            debug!(peer = %peer_id, topic = %topic, "peer unsubscribed");
            if subscriptions.contains_key(topic.as_str()) {
                tracer.pruned(topic.as_str()).await;
            }
        }

        SwarmEvent::Behaviour(BehaviourEvent::Upnp(event)) => match event {
            upnp::Event::NewExternalAddr(addr) => info!(%addr, "UPnP external address"),
            upnp::Event::GatewayNotFound => debug!("no UPnP gateway found"),
            event => trace!(?event, "UPnP event"),
        },

        SwarmEvent::ConnectionEstablished {
            peer_id,
            num_established,
            ..
        } => {
            debug!(peer = %peer_id, connections = num_established.get(), "connection established");
            if num_established.get() == 1 {
                tracer.peer_added().await;
            }
        }

        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established,
            cause,
            ..
        } => {
            debug!(peer = %peer_id, remaining = num_established, ?cause, "connection closed");
            if num_established == 0 {
                tracer.peer_removed().await;
            }
        }

        SwarmEvent::NewListenAddr { address, .. } => {
            info!(%address, "listening");
        }

        event => {
            trace!(?event, "swarm event");
        }
    }
}
