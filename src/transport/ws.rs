//! WebSocket implementation of the channel contract.
//!
//! Wraps tokio-tungstenite so a [`CorrelatedClient`](super::CorrelatedClient)
//! can talk to real peers. Binary frames and ping/pong are handled by
//! the library; this layer only surfaces text frames.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::channel::{Channel, ChannelReader, ChannelWriter, Connector};

// ============================================================================
// Types
// ============================================================================

/// The underlying stream type produced by `connect_async`.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WsConnector
// ============================================================================

/// Opens WebSocket channels to a fixed URL.
pub struct WsConnector {
    /// Peer endpoint, validated at construction.
    url: Url,
}

impl WsConnector {
    /// Creates a connector for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the URL does not parse.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::connection(format!("invalid url: {e}")))?;
        Ok(Self { url })
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn open(&self) -> Result<Self::Channel> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "WebSocket channel opened");
        Ok(WsChannel { stream })
    }
}

// ============================================================================
// WsChannel
// ============================================================================

/// An open WebSocket channel.
pub struct WsChannel {
    /// The upgraded stream.
    stream: WsStream,
}

impl Channel for WsChannel {
    type Writer = WsWriter;
    type Reader = WsReader;

    fn split(self) -> (Self::Writer, Self::Reader) {
        let (sink, stream) = self.stream.split();
        (WsWriter { sink }, WsReader { stream })
    }
}

// ============================================================================
// WsWriter / WsReader
// ============================================================================

/// Write half of a [`WsChannel`].
pub struct WsWriter {
    /// Outbound sink.
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl ChannelWriter for WsWriter {
    async fn write(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half of a [`WsChannel`].
pub struct WsReader {
    /// Inbound stream.
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl ChannelReader for WsReader {
    async fn read(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(_) => {} // Binary, Ping, Pong, Frame
                Err(error) => return Some(Err(error.into())),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
