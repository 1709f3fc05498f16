//! Duplex multiplexed call channel over one pipe connection.
//!
//! Architecture:
//! - A writer task drains an unbounded queue into the framed stream.
//! - A reader task routes inbound frames: `Request`s are dispatched to the
//!   local [`RpcHandler`] on their own tasks, `Response`/`Error` frames
//!   resolve pending outbound calls.
//! - Disconnect (EOF or I/O fault) fails every pending call and trips the
//!   closed token; the channel is not reusable afterwards.

use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::protocol::{CallId, Frame};

/// Errors surfaced by channel establishment and calls.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("timed out connecting to pipe {0}")]
    ConnectionTimeout(String),

    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection dropped mid-session; in-flight calls are lost.
    #[error("channel disconnected")]
    Disconnected,

    /// The remote handler failed; carries the remote error text.
    #[error("remote call failed: {0}")]
    Remote(String),
}

/// Handler for calls arriving from the remote side of a channel.
///
/// `Err` is a fault and surfaces to the remote caller as a failed call;
/// expected negative outcomes belong in the `Ok` payload.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

type PendingCalls = Arc<DashMap<CallId, oneshot::Sender<Result<serde_json::Value, ChannelError>>>>;

/// A live duplex call channel. Owned by whichever side established it;
/// destroyed on disconnect or [`RpcChannel::close`].
pub struct RpcChannel {
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: PendingCalls,
    closed: CancellationToken,
}

impl RpcChannel {
    /// Adopt a connected stream, exposing `handler` to the remote side.
    pub fn spawn(stream: UnixStream, handler: Arc<dyn RpcHandler>) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, JsonCodec::<Frame>::new());
        let mut writer = FramedWrite::new(write_half, JsonCodec::<Frame>::new());

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
        let pending: PendingCalls = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    frame = outgoing_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = writer.send(frame).await {
                                tracing::debug!(error = %e, "Channel write failed");
                                writer_closed.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        let channel = Arc::new(Self {
            outgoing: outgoing.clone(),
            pending: Arc::clone(&pending),
            closed: closed.clone(),
        });

        let reader_handler = handler;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = closed.cancelled() => break,
                    frame = reader.next() => frame,
                };
                match frame {
                    Some(Ok(Frame::Request { id, method, params })) => {
                        let handler = Arc::clone(&reader_handler);
                        let reply = outgoing.clone();
                        tokio::spawn(async move {
                            let frame = match handler.handle(&method, params).await {
                                Ok(result) => Frame::Response { id, result },
                                Err(message) => {
                                    tracing::debug!(%method, error = %message, "Inbound call failed");
                                    Frame::Error { id, message }
                                }
                            };
                            let _ = reply.send(frame);
                        });
                    }
                    Some(Ok(Frame::Response { id, result })) => {
                        if let Some((_, tx)) = pending.remove(&id) {
                            let _ = tx.send(Ok(result));
                        } else {
                            tracing::warn!(%id, "Response for unknown call");
                        }
                    }
                    Some(Ok(Frame::Error { id, message })) => {
                        if let Some((_, tx)) = pending.remove(&id) {
                            let _ = tx.send(Err(ChannelError::Remote(message)));
                        } else {
                            tracing::warn!(%id, "Error for unknown call");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Channel read failed");
                        break;
                    }
                    None => {
                        tracing::debug!("Channel closed by remote");
                        break;
                    }
                }
            }

            // Cancel first so late callers observe the closed token, then
            // fail whatever was still in flight.
            closed.cancel();
            let stale: Vec<CallId> = pending.iter().map(|entry| *entry.key()).collect();
            for id in stale {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(Err(ChannelError::Disconnected));
                }
            }
        });

        channel
    }

    /// Call a remote operation and await its completion.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Disconnected);
        }

        let id = CallId::new();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // Re-check after insert: the reader drains pending entries after
        // cancelling, so an entry registered post-drain must bail here.
        if self.closed.is_cancelled() {
            self.pending.remove(&id);
            return Err(ChannelError::Disconnected);
        }

        let frame = Frame::Request {
            id,
            method: method.to_string(),
            params,
        };
        if self.outgoing.send(frame).is_err() {
            self.pending.remove(&id);
            return Err(ChannelError::Disconnected);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Disconnected),
        }
    }

    /// Tear the channel down. Both I/O tasks exit and the stream is dropped;
    /// in-flight calls fail with [`ChannelError::Disconnected`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the channel is disconnected, whichever side initiated it.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, String> {
            match method {
                "echo" => Ok(params),
                "slow-echo" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(params)
                }
                "block" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(serde_json::Value::Null)
                }
                "fail" => Err("boom".to_string()),
                other => Err(format!("unknown method: {other}")),
            }
        }
    }

    fn channel_pair() -> (Arc<RpcChannel>, Arc<RpcChannel>) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            RpcChannel::spawn(left, Arc::new(EchoHandler)),
            RpcChannel::spawn(right, Arc::new(EchoHandler)),
        )
    }

    #[tokio::test]
    async fn call_roundtrip() {
        let (a, _b) = channel_pair();
        let result = a.call("echo", serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn remote_handler_error_surfaces_to_caller() {
        let (a, _b) = channel_pair();
        let err = a.call("fail", serde_json::Value::Null).await.unwrap_err();
        match err {
            ChannelError::Remote(message) => assert_eq!(message, "boom"),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_a_remote_fault() {
        let (a, _b) = channel_pair();
        let err = a.call("bogus", serde_json::Value::Null).await.unwrap_err();
        match err {
            ChannelError::Remote(message) => assert!(message.contains("bogus")),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn both_sides_call_concurrently() {
        let (a, b) = channel_pair();
        let from_a = a.call("slow-echo", serde_json::json!("from-a"));
        let from_b = b.call("slow-echo", serde_json::json!("from-b"));
        let (ra, rb) = tokio::join!(from_a, from_b);
        assert_eq!(ra.unwrap(), serde_json::json!("from-a"));
        assert_eq!(rb.unwrap(), serde_json::json!("from-b"));
    }

    #[tokio::test]
    async fn calls_multiplex_on_one_connection() {
        let (a, _b) = channel_pair();
        let calls: Vec<_> = (0..8)
            .map(|i| a.call("slow-echo", serde_json::json!(i)))
            .collect();
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), serde_json::json!(i));
        }
    }

    #[tokio::test]
    async fn disconnect_fails_pending_calls() {
        let (a, b) = channel_pair();
        let pending = tokio::spawn({
            let a = Arc::clone(&a);
            async move { a.call("block", serde_json::Value::Null).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        b.close();

        let err = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected));
    }

    #[tokio::test]
    async fn close_is_observed_by_remote() {
        let (a, b) = channel_pair();
        a.close();
        tokio::time::timeout(Duration::from_secs(2), b.closed())
            .await
            .expect("remote side should observe the disconnect");
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn call_after_close_fails_fast() {
        let (a, _b) = channel_pair();
        a.close();
        let err = a.call("echo", serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected));
    }
}
