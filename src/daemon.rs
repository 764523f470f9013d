//! Command dispatcher: reads one command at a time from the port, routes by
//! variant and emits at most one reply notification. `SendRequest` replies
//! arrive later from a background task; `GetNodeIdentity` answers with a
//! specialized notification instead of a plain result.

use crate::config::Config;
use crate::discovery::Discoverer;
use crate::gossip::Subscriber;
use crate::keys;
use crate::node;
use crate::port::Port;
use crate::proto::{self, command::C, Command, Notification};
use crate::reqresp::Listener;
use tracing::info;

/// Run the daemon against an opened port until stdin reaches EOF.
///
/// Startup failures (bad init args, unusable listen or discovery sockets,
/// malformed bootnodes) are fatal and crash the process.
pub async fn run(mut port: Port) {
    let Some(init_args) = port
        .read_init_args()
        .await
        .expect("failed to read init args")
    else {
        return;
    };
    let config = Config::from_init_args(init_args).expect("invalid init args");
    let keypair = match &config.private_key {
        Some(raw) => keys::libp2p_keypair_from_secret(raw).expect("invalid private key"),
        None => libp2p::identity::Keypair::generate_secp256k1(),
    };

    let notifications = port.sender();
    let node = node::spawn(&config, keypair.clone(), notifications.clone())
        .expect("failed to start libp2p host");
    let listener = Listener::new(&node, notifications.clone());
    let subscriber = Subscriber::new(&node, notifications.clone());
    let discoverer = if config.enable_discovery {
        let discoverer = Discoverer::spawn(&config, &keypair, listener.clone())
            .await
            .expect("failed to start discovery");
        Some(discoverer)
    } else {
        None
    };

    info!(peer = %listener.host_peer_id(), "daemon ready");

    loop {
        match port.read_command().await {
            Ok(Some(command)) => {
                let reply =
                    handle_command(command, &listener, &subscriber, discoverer.as_ref()).await;
                if let Some(reply) = reply {
                    notifications.send(&reply).await;
                }
            }
            Ok(None) => {
                info!("host closed stdin, exiting");
                break;
            }
            Err(e) => panic!("failed to read command: {e}"),
        }
    }
}

async fn handle_command(
    command: Command,
    listener: &Listener,
    subscriber: &Subscriber,
    discoverer: Option<&Discoverer>,
) -> Option<Notification> {
    let from = command.from;
    let Some(c) = command.c else {
        return Some(proto::result_error(from, "invalid command"));
    };

    match c {
        C::GetNodeIdentity(_) => {
            let peer_id = listener.host_peer_id().to_bytes();
            let p2p_addresses = listener.listen_addresses().await;
            let (enr, discovery_addresses) = match discoverer {
                Some(d) => (d.enr(), d.discovery_addresses()),
                None => (String::new(), vec![]),
            };
            Some(proto::node_identity_notification(
                from,
                peer_id,
                enr,
                p2p_addresses,
                discovery_addresses,
            ))
        }

        C::AddPeer(args) => {
            listener.add_peer(&args.id, &args.addrs, args.ttl).await;
            Some(proto::result_ok(from, vec![]))
        }

        C::SendRequest(args) => {
            // The result notification is produced by the request task.
            listener.send_request(from, args.peer_id, args.protocol_id, args.message);
            None
        }

        C::SendResponse(args) => match listener.send_response(&args.request_id, args.message) {
            Ok(()) => Some(proto::result_ok(from, vec![])),
            Err(e) => Some(proto::result_error(from, e)),
        },

        C::SetHandler(args) => match listener.set_handler(args.protocol_id, args.handler) {
            Ok(()) => Some(proto::result_ok(from, vec![])),
            Err(e) => Some(proto::result_error(from, e)),
        },

        C::Subscribe(args) => match subscriber.subscribe(args.name, args.handler).await {
            Ok(()) => Some(proto::result_ok(from, vec![])),
            Err(e) => Some(proto::result_error(from, e)),
        },

        C::Leave(args) => {
            subscriber.leave(&args.name).await;
            Some(proto::result_ok(from, vec![]))
        }

        C::Join(args) => {
            subscriber.join(&args.name).await;
            Some(proto::result_ok(from, vec![]))
        }

        C::ValidateMessage(args) => {
            subscriber.validate(&args.msg_id, args.result).await;
            Some(proto::result_ok(from, vec![]))
        }

        C::Publish(args) => {
            subscriber.publish(args.name, args.message).await;
            Some(proto::result_ok(from, vec![]))
        }

        C::UpdateEnr(args) => {
            let Some(d) = discoverer else {
                // Discovery disabled: nothing to update.
                return Some(proto::result_ok(from, vec![]));
            };
            let entries = args.enr_entries.unwrap_or_default();
            match d.update_enr(entries.eth2, entries.attnets, entries.syncnets) {
                Ok(()) => Some(proto::result_ok(from, vec![])),
                Err(e) => Some(proto::result_error(from, e)),
            }
        }
    }
}
