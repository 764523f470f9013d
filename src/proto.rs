//! Wire messages exchanged with the host over the stdio port.
//!
//! The message structs are written in the shape `prost-build` would generate
//! for the daemon's protocol schema; code generation is deliberately not part
//! of the build. Constructors for the notification variants live at the
//! bottom of the module.

/// Arguments read once at startup, before the command loop begins.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitArgs {
    /// libp2p listen multiaddrs, e.g. `/ip4/0.0.0.0/tcp/9000`.
    #[prost(string, repeated, tag = "1")]
    pub listen_addrs: Vec<String>,
    #[prost(bool, tag = "2")]
    pub enable_discovery: bool,
    /// UDP `ip:port` the discv5 service binds to.
    #[prost(string, tag = "3")]
    pub discovery_addr: String,
    /// Bootstrap nodes as `enr:`-prefixed strings.
    #[prost(string, repeated, tag = "4")]
    pub bootnodes: Vec<String>,
    /// Raw secp256k1 private key (32 bytes). Empty means ephemeral.
    #[prost(bytes = "vec", tag = "5")]
    pub private_key: Vec<u8>,
    /// Initial application entries of the local ENR.
    #[prost(message, optional, tag = "6")]
    pub enr_entries: Option<EnrEntries>,
}

/// Application-level ENR entries owned by the host.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnrEntries {
    /// 16 bytes: current fork digest ++ next fork digest ++ next fork epoch.
    #[prost(bytes = "vec", tag = "1")]
    pub eth2: Vec<u8>,
    /// 8-byte attestation subnet bitfield.
    #[prost(bytes = "vec", tag = "2")]
    pub attnets: Vec<u8>,
    /// 1-byte sync committee subnet bitfield.
    #[prost(bytes = "vec", tag = "3")]
    pub syncnets: Vec<u8>,
}

/// A host command. `from` correlates the eventual result notification with
/// the host-side caller and is echoed back verbatim.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(bytes = "vec", tag = "1")]
    pub from: Vec<u8>,
    #[prost(oneof = "command::C", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12")]
    pub c: Option<command::C>,
}

pub mod command {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum C {
        #[prost(message, tag = "2")]
        GetNodeIdentity(super::GetNodeIdentity),
        #[prost(message, tag = "3")]
        AddPeer(super::AddPeer),
        #[prost(message, tag = "4")]
        SendRequest(super::SendRequest),
        #[prost(message, tag = "5")]
        SendResponse(super::SendResponse),
        #[prost(message, tag = "6")]
        SetHandler(super::SetHandler),
        #[prost(message, tag = "7")]
        Subscribe(super::Subscribe),
        #[prost(message, tag = "8")]
        Leave(super::Leave),
        #[prost(message, tag = "9")]
        Join(super::Join),
        #[prost(message, tag = "10")]
        ValidateMessage(super::ValidateMessage),
        #[prost(message, tag = "11")]
        Publish(super::Publish),
        #[prost(message, tag = "12")]
        UpdateEnr(super::UpdateEnr),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetNodeIdentity {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPeer {
    /// Raw libp2p peer id bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(string, repeated, tag = "2")]
    pub addrs: Vec<String>,
    /// Address lifetime in nanoseconds; advisory.
    #[prost(int64, tag = "3")]
    pub ttl: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub protocol_id: String,
    #[prost(bytes = "vec", tag = "3")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendResponse {
    /// Request id previously delivered in a `Request` notification.
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetHandler {
    #[prost(string, tag = "1")]
    pub protocol_id: String,
    /// Opaque host-side handler tag, echoed in `Request` notifications.
    #[prost(bytes = "vec", tag = "2")]
    pub handler: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subscribe {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Opaque host-side handler tag, echoed in `Gossip` notifications.
    #[prost(bytes = "vec", tag = "2")]
    pub handler: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Leave {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Join {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub msg_id: Vec<u8>,
    /// 0 = accept, 1 = reject, 2 = ignore.
    #[prost(int32, tag = "2")]
    pub result: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Publish {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateEnr {
    #[prost(message, optional, tag = "1")]
    pub enr_entries: Option<EnrEntries>,
}

/// An unsolicited or reply message written to the host.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    #[prost(oneof = "notification::N", tags = "1, 2, 3, 4, 5, 6")]
    pub n: Option<notification::N>,
}

pub mod notification {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum N {
        #[prost(message, tag = "1")]
        Gossip(super::Gossip),
        #[prost(message, tag = "2")]
        Request(super::Request),
        #[prost(message, tag = "3")]
        NewPeer(super::NewPeer),
        #[prost(message, tag = "4")]
        Result(super::CallResult),
        #[prost(message, tag = "5")]
        NodeIdentity(super::NodeIdentity),
        #[prost(message, tag = "6")]
        Tracer(super::Tracer),
    }
}

/// A gossipsub message awaiting host validation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Gossip {
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(bytes = "vec", tag = "2")]
    pub handler: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub msg_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub message: Vec<u8>,
}

/// An inbound request/response stream awaiting a host reply.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(string, tag = "1")]
    pub protocol_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub handler: Vec<u8>,
    #[prost(string, tag = "3")]
    pub request_id: String,
    #[prost(bytes = "vec", tag = "4")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewPeer {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
}

/// The outcome of a host command, correlated by `from`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallResult {
    #[prost(bytes = "vec", tag = "1")]
    pub from: Vec<u8>,
    #[prost(oneof = "call_result::R", tags = "2, 3")]
    pub r: Option<call_result::R>,
}

pub mod call_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum R {
        #[prost(message, tag = "2")]
        Ok(super::ResultMessage),
        #[prost(message, tag = "3")]
        Error(super::ResultMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultMessage {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub message: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeIdentity {
    #[prost(bytes = "vec", tag = "1")]
    pub from: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub peer_id: Vec<u8>,
    /// `enr:`-prefixed text encoding of the local node record; empty when
    /// discovery is disabled.
    #[prost(string, tag = "3")]
    pub enr: String,
    #[prost(string, repeated, tag = "4")]
    pub p2p_addresses: Vec<String>,
    #[prost(string, repeated, tag = "5")]
    pub discovery_addresses: Vec<String>,
}

/// Pubsub internals surfaced to the host, one variant per event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tracer {
    #[prost(oneof = "tracer::T", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub t: Option<tracer::T>,
}

pub mod tracer {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum T {
        #[prost(message, tag = "1")]
        PeerAdded(super::PeerAdded),
        #[prost(message, tag = "2")]
        PeerRemoved(super::PeerRemoved),
        #[prost(message, tag = "3")]
        Joined(super::TopicEvent),
        #[prost(message, tag = "4")]
        Left(super::TopicEvent),
        #[prost(message, tag = "5")]
        Grafted(super::TopicEvent),
        #[prost(message, tag = "6")]
        Pruned(super::TopicEvent),
        #[prost(message, tag = "7")]
        ValidateMessage(super::TopicEvent),
        #[prost(message, tag = "8")]
        DeliverMessage(super::TopicEvent),
        #[prost(message, tag = "9")]
        UndeliverableMessage(super::TopicEvent),
        #[prost(message, tag = "10")]
        RejectMessage(super::TopicEvent),
        #[prost(message, tag = "11")]
        DuplicateMessage(super::TopicEvent),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerAdded {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerRemoved {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TopicEvent {
    #[prost(string, tag = "1")]
    pub topic: String,
}

/// Successful result carrying zero or more payloads.
pub fn result_ok(from: Vec<u8>, message: Vec<Vec<u8>>) -> Notification {
    Notification {
        n: Some(notification::N::Result(CallResult {
            from,
            r: Some(call_result::R::Ok(ResultMessage { message })),
        })),
    }
}

/// Failed result carrying the error text.
pub fn result_error(from: Vec<u8>, error: impl ToString) -> Notification {
    Notification {
        n: Some(notification::N::Result(CallResult {
            from,
            r: Some(call_result::R::Error(ResultMessage {
                message: vec![error.to_string().into_bytes()],
            })),
        })),
    }
}

pub fn gossip_notification(
    topic: &str,
    handler: &[u8],
    msg_id: &[u8],
    message: &[u8],
) -> Notification {
    Notification {
        n: Some(notification::N::Gossip(Gossip {
            topic: topic.to_owned(),
            handler: handler.to_vec(),
            msg_id: msg_id.to_vec(),
            message: message.to_vec(),
        })),
    }
}

pub fn request_notification(
    protocol_id: &str,
    handler: &[u8],
    request_id: &str,
    message: Vec<u8>,
) -> Notification {
    Notification {
        n: Some(notification::N::Request(Request {
            protocol_id: protocol_id.to_owned(),
            handler: handler.to_vec(),
            request_id: request_id.to_owned(),
            message,
        })),
    }
}

pub fn new_peer_notification(peer_id: Vec<u8>) -> Notification {
    Notification {
        n: Some(notification::N::NewPeer(NewPeer { peer_id })),
    }
}

pub fn node_identity_notification(
    from: Vec<u8>,
    peer_id: Vec<u8>,
    enr: String,
    p2p_addresses: Vec<String>,
    discovery_addresses: Vec<String>,
) -> Notification {
    Notification {
        n: Some(notification::N::NodeIdentity(NodeIdentity {
            from,
            peer_id,
            enr,
            p2p_addresses,
            discovery_addresses,
        })),
    }
}

pub fn tracer_notification(event: tracer::T) -> Notification {
    Notification {
        n: Some(notification::N::Tracer(Tracer { t: Some(event) })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn command_round_trips_through_the_wire_encoding() {
        let cmd = Command {
            from: b"q1".to_vec(),
            c: Some(command::C::SendRequest(SendRequest {
                peer_id: vec![1, 2, 3],
                protocol_id: "/echo/1".into(),
                message: b"hello".to_vec(),
            })),
        };

        let encoded = cmd.encode_to_vec();
        let decoded = Command::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn result_constructors_set_the_right_variant() {
        let ok = result_ok(b"a".to_vec(), vec![b"payload".to_vec()]);
        let Some(notification::N::Result(res)) = ok.n else {
            panic!("expected result notification");
        };
        assert_eq!(res.from, b"a");
        assert!(matches!(res.r, Some(call_result::R::Ok(_))));

        let err = result_error(b"b".to_vec(), "boom");
        let Some(notification::N::Result(res)) = err.n else {
            panic!("expected result notification");
        };
        let Some(call_result::R::Error(msg)) = res.r else {
            panic!("expected error result");
        };
        assert_eq!(msg.message, vec![b"boom".to_vec()]);
    }

    #[test]
    fn tracer_event_carries_its_topic() {
        let n = tracer_notification(tracer::T::DeliverMessage(TopicEvent {
            topic: "beacon_block".into(),
        }));
        let encoded = n.encode_to_vec();
        let decoded = Notification::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, n);
    }
}
