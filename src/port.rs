//! Framed stdio transport between the daemon and its host process.
//!
//! # Wire format
//!
//! ```text
//! [4-byte big-endian length][protobuf-encoded message]
//! ```
//!
//! The dispatcher is the only reader. Writes are serialized through a single
//! background task fed by a bounded queue, so any task may emit notifications
//! without interleaving frames; a full queue blocks the producer rather than
//! dropping.

use crate::proto::{Command, InitArgs, Notification};
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the notification queue drained by the writer task.
const NOTIFICATION_QUEUE_CAPACITY: usize = 100;

/// Upper bound on a single frame: the gossipsub maximum plus envelope slack.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors from the stdio port.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("frame decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Read one length-prefixed frame. Returns `None` on clean EOF at a frame
/// boundary; EOF inside a frame is an error.
pub async fn read_delimited<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, PortError> {
    let mut len_bytes = [0u8; 4];
    if reader.read(&mut len_bytes[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_bytes[1..]).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(PortError::TooLarge(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

/// Encode a message as a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M) -> Bytes {
    let len = msg.encoded_len();
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32(len as u32);
    msg.encode(&mut buf)
        .expect("BytesMut has reserved capacity");
    buf.freeze()
}

/// Cloneable producer handle feeding the serialized writer task.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Bytes>,
}

impl NotificationSender {
    /// Enqueue a notification. Blocks when the writer queue is full; a closed
    /// queue means the daemon is shutting down and the frame is dropped.
    pub async fn send(&self, notification: &Notification) {
        if self.tx.send(encode_frame(notification)).await.is_err() {
            debug!("notification writer gone, dropping frame");
        }
    }

    /// Detached sender/receiver pair carrying raw frames. Used by tests to
    /// observe the notification stream without touching stdout.
    pub fn pair() -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }
}

/// The daemon side of the host connection: exclusive reader over stdin plus
/// the shared notification sender.
pub struct Port {
    reader: BufReader<Stdin>,
    sender: NotificationSender,
}

impl Port {
    /// Open the port over this process's stdin/stdout and start the writer
    /// task.
    pub fn new() -> Self {
        let (sender, rx) = NotificationSender::pair();
        spawn_writer(rx);
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            sender,
        }
    }

    pub fn sender(&self) -> NotificationSender {
        self.sender.clone()
    }

    /// Read the startup arguments. `None` means the host closed stdin before
    /// sending them.
    pub async fn read_init_args(&mut self) -> Result<Option<InitArgs>, PortError> {
        match read_delimited(&mut self.reader).await? {
            Some(frame) => Ok(Some(InitArgs::decode(frame.as_slice())?)),
            None => Ok(None),
        }
    }

    /// Read the next command. `None` means clean EOF: the host is done and
    /// the daemon should exit.
    pub async fn read_command(&mut self) -> Result<Option<Command>, PortError> {
        match read_delimited(&mut self.reader).await? {
            Some(frame) => Ok(Some(Command::decode(frame.as_slice())?)),
            None => Ok(None),
        }
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_writer(mut rx: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            if stdout.write_all(&frame).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
        debug!("notification writer exiting");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;

    #[tokio::test]
    async fn frames_round_trip() {
        let notification = proto::new_peer_notification(vec![1, 2, 3]);
        let frame = encode_frame(&notification);

        let mut reader = frame.as_ref();
        let body = read_delimited(&mut reader).await.unwrap().unwrap();
        let decoded = Notification::decode(body.as_slice()).unwrap();
        assert_eq!(decoded, notification);
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut reader: &[u8] = &[];
        assert!(read_delimited(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        // Length prefix says 8 bytes, only 2 follow.
        let mut reader: &[u8] = &[0, 0, 0, 8, 1, 2];
        assert!(read_delimited(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut reader = frame.as_slice();
        assert!(matches!(
            read_delimited(&mut reader).await,
            Err(PortError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn sender_preserves_frame_order() {
        let (sender, mut rx) = NotificationSender::pair();
        for i in 0..5u8 {
            sender
                .send(&proto::new_peer_notification(vec![i]))
                .await;
        }
        for i in 0..5u8 {
            let frame = rx.recv().await.unwrap();
            let decoded = Notification::decode(&frame[4..]).unwrap();
            assert_eq!(decoded, proto::new_peer_notification(vec![i]));
        }
    }

    #[tokio::test]
    async fn consecutive_frames_decode_in_sequence() {
        let a = encode_frame(&proto::new_peer_notification(vec![1]));
        let b = encode_frame(&proto::new_peer_notification(vec![2]));
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut reader = stream.as_slice();
        let first = read_delimited(&mut reader).await.unwrap().unwrap();
        let second = read_delimited(&mut reader).await.unwrap().unwrap();
        assert!(read_delimited(&mut reader).await.unwrap().is_none());

        assert_eq!(
            Notification::decode(first.as_slice()).unwrap(),
            proto::new_peer_notification(vec![1])
        );
        assert_eq!(
            Notification::decode(second.as_slice()).unwrap(),
            proto::new_peer_notification(vec![2])
        );
    }
}
