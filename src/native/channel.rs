//! Framed JSON channel over a byte pipe (the helper's stdin/stdout).
//!
//! The write half is shared behind one async lock so concurrent senders
//! never interleave partial frames. The read half runs on its own task
//! and hands parsed messages to the owner over an unbounded channel.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::ChannelError;
use super::codec::{Frame, FrameCodec, MAX_FRAME_LEN};

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// What the read task observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent<T> {
    Message(T),
    /// The peer closed the pipe. No further events follow.
    Closed,
}

/// Cloneable handle to the write half.
#[derive(Clone)]
pub struct FrameSender {
    sink: Arc<Mutex<FramedWrite<BoxedWriter, FrameCodec>>>,
}

impl FrameSender {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(writer, FrameCodec))),
        }
    }

    /// Serialize `message` and write it as one frame.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(message)?;
        if body.len() > MAX_FRAME_LEN as usize {
            return Err(ChannelError::Oversized(body.len()));
        }

        let mut sink = self.sink.lock().await;
        sink.send(Bytes::from(body)).await?;
        Ok(())
    }
}

/// Spawn the read loop over `reader`.
///
/// Rejected lengths and unparseable bodies are logged and skipped. The
/// loop ends on end-of-stream or a read error, after emitting
/// [`ChannelEvent::Closed`].
pub fn spawn_reader<R, T>(reader: R) -> (UnboundedReceiver<ChannelEvent<T>>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, FrameCodec);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Payload(body)) => match serde_json::from_slice::<T>(&body) {
                    Ok(message) => {
                        if tx.send(ChannelEvent::Message(message)).is_err() {
                            // Owner is gone; nobody left to tell.
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, len = body.len(), "dropping unparseable frame");
                    }
                },
                Ok(Frame::Rejected { len }) => {
                    tracing::warn!(len, max = MAX_FRAME_LEN, "invalid frame length, skipping prefix");
                }
                Err(e) => {
                    tracing::error!(error = %e, "read from extension pipe failed");
                    break;
                }
            }
        }

        let _ = tx.send(ChannelEvent::Closed);
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::protocol::{ExtensionMessage, HostMessage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn sender_writes_prefixed_json() {
        let (ours, mut theirs) = duplex(1024);
        let sender = FrameSender::new(ours);
        sender.send(&HostMessage::Ready).await.unwrap();

        let mut prefix = [0u8; 4];
        theirs.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_le_bytes(prefix) as usize;
        let mut body = vec![0u8; len];
        theirs.read_exact(&mut body).await.unwrap();

        assert_eq!(body, br#"{"action":"ready"}"#);
    }

    #[tokio::test]
    async fn concurrent_senders_do_not_interleave() {
        let (ours, theirs) = duplex(64);
        let sender = FrameSender::new(ours);
        let (mut rx, _reader) = spawn_reader::<_, HostMessage>(theirs);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                let msg = HostMessage::cycle(
                    crate::bus::message::CycleDirection::Next,
                    i % 2 == 0,
                    true,
                );
                sender.send(&msg).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for _ in 0..16 {
            match rx.recv().await.unwrap() {
                ChannelEvent::Message(HostMessage::CycleNext { .. }) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn bad_frames_are_skipped_and_channel_stays_open() {
        let (mut ours, theirs) = duplex(4096);
        let (mut rx, _reader) = spawn_reader::<_, ExtensionMessage>(theirs);

        // Zero length, oversized length, malformed JSON, unknown action,
        // then a good frame.
        ours.write_all(&0u32.to_le_bytes()).await.unwrap();
        ours.write_all(&(MAX_FRAME_LEN + 1).to_le_bytes()).await.unwrap();
        ours.write_all(&frame(b"{not json")).await.unwrap();
        ours.write_all(&frame(br#"{"action":"launch_rockets"}"#)).await.unwrap();
        ours.write_all(&frame(br#"{"action":"ping"}"#)).await.unwrap();

        assert_eq!(rx.recv().await, Some(ChannelEvent::Message(ExtensionMessage::Ping)));
    }

    #[tokio::test]
    async fn eof_reports_closed() {
        let (mut ours, theirs) = duplex(64);
        let (mut rx, reader) = spawn_reader::<_, ExtensionMessage>(theirs);

        // Two bytes of a length prefix, then hang up.
        ours.write_all(&[1, 0]).await.unwrap();
        drop(ours);

        assert_eq!(rx.recv().await, Some(ChannelEvent::Closed));
        reader.await.unwrap();
    }
}
