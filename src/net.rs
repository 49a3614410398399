//! Websocket plumbing shared by the control and video paths

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::registry::FrameSink;

/// A server-side websocket connection
pub type WsStream = WebSocketStream<TcpStream>;

/// Write half of a split websocket connection
pub type WsSink = SplitSink<WsStream, Message>;

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(Message::text(text))
            .await
            .map_err(|e| Error::SocketGone(e.to_string()))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        self.send(Message::binary(data))
            .await
            .map_err(|e| Error::SocketGone(e.to_string()))
    }
}

/// Shorten a udid for log output
pub(crate) fn censor_udid(udid: &str) -> String {
    if udid.len() <= 4 {
        return udid.to_string();
    }
    format!("***{}", &udid[udid.len() - 4..])
}

/// In-memory stand-in for a websocket, for tests
#[cfg(test)]
pub(crate) mod testing {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures_util::{Sink, Stream};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    pub(crate) struct FakeSocket {
        incoming: mpsc::UnboundedReceiver<Message>,
        outgoing: mpsc::UnboundedSender<Message>,
    }

    impl FakeSocket {
        /// Returns the socket plus handles to feed its read side and
        /// observe its write side
        pub(crate) fn pair() -> (
            Self,
            mpsc::UnboundedSender<Message>,
            mpsc::UnboundedReceiver<Message>,
        ) {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            (
                Self {
                    incoming: in_rx,
                    outgoing: out_tx,
                },
                in_tx,
                out_rx,
            )
        }
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, WsError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.incoming.poll_recv(cx).map(|msg| msg.map(Ok))
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            self.get_mut()
                .outgoing
                .send(item)
                .map_err(|_| WsError::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }
}
