//! Request/response engine over raw libp2p streams.
//!
//! Inbound: one accept loop per registered protocol; each stream is read to
//! EOF, surfaced to the host as a `Request` notification, and answered once
//! the host sends the matching `SendResponse`. Outbound: each `SendRequest`
//! runs on its own task and reports exactly one `Result` notification.

use crate::node::{CommandSender, Node, SwarmCommand};
use crate::port::NotificationSender;
use crate::proto;
use dashmap::DashMap;
use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, Stream, StreamProtocol};
use libp2p_stream as stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Fixed deadline for opening an outbound request stream. There is no host
/// mechanism to override it.
const RESP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ReqRespError {
    #[error("invalid peer id")]
    InvalidPeerId,

    #[error("invalid protocol id {0:?}")]
    InvalidProtocol(String),

    #[error("handler already registered for {0:?}")]
    HandlerExists(String),

    #[error("unknown request id {0:?}")]
    UnknownRequest(String),

    #[error("request timed out")]
    Timeout,

    #[error("stream open failed: {0}")]
    OpenFailed(String),

    #[error("stream I/O error: {0}")]
    StreamIo(#[from] std::io::Error),
}

/// Host-facing request/response facade bound to the running libp2p host.
#[derive(Clone)]
pub struct Listener {
    peer_id: PeerId,
    commands: CommandSender,
    control: stream::Control,
    pending_responses: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
    next_request_id: Arc<AtomicU64>,
    notifications: NotificationSender,
}

impl Listener {
    pub fn new(node: &Node, notifications: NotificationSender) -> Self {
        Self {
            peer_id: node.peer_id,
            commands: node.commands.clone(),
            control: node.control.clone(),
            pending_responses: Arc::new(DashMap::new()),
            next_request_id: Arc::new(AtomicU64::new(0)),
            notifications,
        }
    }

    /// The local peer id.
    pub fn host_peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Listen multiaddrs with `/p2p/<peer-id>` appended.
    pub async fn listen_addresses(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(SwarmCommand::ListenAddresses { reply });
        let addrs = rx.await.unwrap_or_default();
        addrs
            .into_iter()
            .map(|addr| addr.with(Protocol::P2p(self.peer_id)).to_string())
            .collect()
    }

    /// Record a peer's addresses and dial it best-effort. Invalid addresses
    /// are dropped silently; if at least one parses, a `NewPeer` notification
    /// is emitted. The TTL is advisory.
    pub async fn add_peer(&self, id: &[u8], addrs: &[String], ttl: i64) {
        let Ok(peer_id) = PeerId::from_bytes(id) else {
            debug!("discarding AddPeer with malformed peer id");
            return;
        };

        let parsed: Vec<Multiaddr> = addrs
            .iter()
            .filter_map(|addr| match addr.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    debug!(addr = %addr, error = %e, "dropping invalid peer address");
                    None
                }
            })
            .collect();
        if parsed.is_empty() {
            return;
        }

        trace!(peer = %peer_id, addrs = parsed.len(), ttl, "adding peer");
        self.commands.send(SwarmCommand::Dial {
            peer_id,
            addrs: parsed,
        });
        self.notifications
            .send(&proto::new_peer_notification(id.to_vec()))
            .await;
    }

    /// Register a stream handler for a protocol. Each inbound stream is
    /// handled on its own task and parked until the host replies.
    pub fn set_handler(&self, protocol_id: String, handler: Vec<u8>) -> Result<(), ReqRespError> {
        let protocol = StreamProtocol::try_from_owned(protocol_id.clone())
            .map_err(|_| ReqRespError::InvalidProtocol(protocol_id.clone()))?;

        let mut incoming = self
            .control
            .clone()
            .accept(protocol)
            .map_err(|_| ReqRespError::HandlerExists(protocol_id.clone()))?;

        let listener = self.clone();
        tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                trace!(peer = %peer, protocol = %protocol_id, "inbound stream");
                let listener = listener.clone();
                let protocol_id = protocol_id.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    listener.handle_inbound(protocol_id, handler, stream).await;
                });
            }
            debug!("accept loop finished");
        });
        Ok(())
    }

    async fn handle_inbound(&self, protocol_id: String, handler: Vec<u8>, mut stream: Stream) {
        let mut request = Vec::new();
        if let Err(e) = stream.read_to_end(&mut request).await {
            debug!(protocol = %protocol_id, error = %e, "dropping inbound stream on read error");
            return;
        }

        let request_id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_responses.insert(request_id.clone(), tx);

        self.notifications
            .send(&proto::request_notification(
                &protocol_id,
                &handler,
                &request_id,
                request,
            ))
            .await;

        // Parked until the host's SendResponse; a non-response is a host
        // liveness bug.
        let Ok(response) = rx.await else {
            return;
        };
        if let Err(e) = stream.write_all(&response).await {
            debug!(protocol = %protocol_id, error = %e, "response write failed");
            return;
        }
        let _ = stream.close().await;
    }

    /// Deliver the host's reply for a parked inbound stream.
    pub fn send_response(&self, request_id: &str, message: Vec<u8>) -> Result<(), ReqRespError> {
        match self.pending_responses.remove(request_id) {
            Some((_, tx)) => {
                // A dropped receiver means the stream already died; the entry
                // is gone either way.
                let _ = tx.send(message);
                Ok(())
            }
            None => Err(ReqRespError::UnknownRequest(request_id.to_owned())),
        }
    }

    /// Fire an outbound request on its own task. The outcome arrives as a
    /// `Result` notification correlated by `from`.
    pub fn send_request(
        &self,
        from: Vec<u8>,
        peer_id: Vec<u8>,
        protocol_id: String,
        message: Vec<u8>,
    ) {
        let control = self.control.clone();
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            let notification = match request(control, &peer_id, protocol_id, &message).await {
                Ok(response) => proto::result_ok(from, vec![response]),
                Err(e) => proto::result_error(from, e),
            };
            notifications.send(&notification).await;
        });
    }

    /// Number of inbound streams currently parked awaiting a host reply.
    pub fn pending_len(&self) -> usize {
        self.pending_responses.len()
    }
}

/// One outbound exchange: open (bounded by the fixed deadline), write, close
/// the write half, read the full response.
async fn request(
    mut control: stream::Control,
    peer_id: &[u8],
    protocol_id: String,
    message: &[u8],
) -> Result<Vec<u8>, ReqRespError> {
    let peer = PeerId::from_bytes(peer_id).map_err(|_| ReqRespError::InvalidPeerId)?;
    let protocol = StreamProtocol::try_from_owned(protocol_id.clone())
        .map_err(|_| ReqRespError::InvalidProtocol(protocol_id))?;

    let mut stream = tokio::time::timeout(RESP_TIMEOUT, control.open_stream(peer, protocol))
        .await
        .map_err(|_| ReqRespError::Timeout)?
        .map_err(|e| ReqRespError::OpenFailed(format!("{e:?}")))?;

    stream.write_all(message).await?;
    stream.close().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_listener() -> Listener {
        let behaviour = stream::Behaviour::new();
        let (commands, _rx) = crate::node::command_channel();
        let (notifications, _frames) = NotificationSender::pair();
        Listener {
            peer_id: PeerId::random(),
            commands,
            control: behaviour.new_control(),
            pending_responses: Arc::new(DashMap::new()),
            next_request_id: Arc::new(AtomicU64::new(0)),
            notifications,
        }
    }

    #[tokio::test]
    async fn set_handler_rejects_duplicate_registration() {
        let listener = test_listener();
        listener
            .set_handler("/echo/1".into(), b"h".to_vec())
            .unwrap();
        assert!(matches!(
            listener.set_handler("/echo/1".into(), b"h".to_vec()),
            Err(ReqRespError::HandlerExists(_))
        ));
    }

    #[tokio::test]
    async fn set_handler_rejects_malformed_protocol_ids() {
        let listener = test_listener();
        assert!(matches!(
            listener.set_handler("echo-without-slash".into(), vec![]),
            Err(ReqRespError::InvalidProtocol(_))
        ));
    }

    #[tokio::test]
    async fn send_response_removes_the_pending_entry_exactly_once() {
        let listener = test_listener();
        let (tx, mut rx) = oneshot::channel();
        listener.pending_responses.insert("7".into(), tx);

        listener.send_response("7", b"pong".to_vec()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"pong");
        assert_eq!(listener.pending_len(), 0);

        assert!(matches!(
            listener.send_response("7", b"pong".to_vec()),
            Err(ReqRespError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let listener = test_listener();
        let a = listener.next_request_id.fetch_add(1, Ordering::Relaxed);
        let b = listener.next_request_id.fetch_add(1, Ordering::Relaxed);
        assert_ne!(a, b);
    }
}
