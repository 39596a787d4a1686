use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use bytes::Bytes;
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::listener::ProxyConfig;
use crate::origin::DIAL_ORIGIN;
use crate::rewrite::rewrite_connect_token;

/// WebSocket connection to the gateway.
pub type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised while setting up or driving a relay session.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Dial(tungstenite::Error),

    #[error("handshake timed out after {}s", .0.as_secs())]
    HandshakeTimeout(Duration),

    #[error("client connection: {0}")]
    Client(#[from] axum::Error),

    #[error("gateway connection: {0}")]
    Gateway(#[from] tungstenite::Error),
}

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// A single WebSocket message in flight, independent of which side it was
/// read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Short name of the frame type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close(_) => "close",
        }
    }

    /// Size of the payload in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close(reason) => reason.as_ref().map_or(0, |r| 2 + r.reason.len()),
        }
    }

    /// Convert a message read from the gateway. Raw frames never surface on
    /// reads and are dropped.
    pub fn from_gateway(msg: Message) -> Option<Self> {
        let frame = match msg {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(close) => Frame::Close(close.map(|c| CloseReason {
                code: u16::from(c.code),
                reason: c.reason.as_str().to_owned(),
            })),
            Message::Frame(_) => return None,
        };
        Some(frame)
    }

    pub fn into_gateway(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close(close) => Message::Close(close.map(|c| CloseFrame {
                code: CloseCode::from(c.code),
                reason: c.reason.into(),
            })),
        }
    }

    pub fn into_client(self) -> ws::Message {
        match self {
            Frame::Text(text) => ws::Message::Text(retag(text)),
            Frame::Binary(data) => ws::Message::Binary(data),
            Frame::Ping(data) => ws::Message::Ping(data),
            Frame::Pong(data) => ws::Message::Pong(data),
            Frame::Close(close) => ws::Message::Close(close.map(|c| ws::CloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }
}

impl From<ws::Message> for Frame {
    fn from(msg: ws::Message) -> Self {
        match msg {
            ws::Message::Text(text) => Frame::Text(retag(text)),
            ws::Message::Binary(data) => Frame::Binary(data),
            ws::Message::Ping(data) => Frame::Ping(data),
            ws::Message::Pong(data) => Frame::Pong(data),
            ws::Message::Close(close) => Frame::Close(close.map(|c| CloseReason {
                code: c.code,
                reason: c.reason.as_str().to_owned(),
            })),
        }
    }
}

/// Move a text payload between the axum and tungstenite wrappers, sharing the
/// underlying buffer. Both sides already hold validated UTF-8, so the lossy
/// branch only guards the type boundary.
fn retag<T, U>(text: T) -> U
where
    Bytes: From<T>,
    U: TryFrom<Bytes> + From<String>,
{
    let bytes = Bytes::from(text);
    match U::try_from(bytes.clone()) {
        Ok(text) => text,
        Err(_) => U::from(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Direction of message flow through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Browser -> gateway
    ClientToGateway,
    /// Gateway -> browser
    GatewayToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToGateway => write!(f, "client->gateway"),
            Direction::GatewayToClient => write!(f, "gateway->client"),
        }
    }
}

/// Why a forwarding loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source stream ended without a close frame.
    SourceEnded,
    /// A close frame was read and forwarded.
    Closed(Option<u16>),
    /// Reading from the source failed.
    ReadFailed,
    /// Writing to the destination failed.
    WriteFailed,
    /// The opposite loop stopped first.
    Cancelled,
}

/// One browser connection paired with one gateway connection.
pub struct RelaySession {
    id: Uuid,
    remote_addr: SocketAddr,
    client: WebSocket,
    gateway: GatewayStream,
    token: Arc<str>,
}

impl RelaySession {
    /// Dial the gateway on behalf of an upgraded client connection.
    ///
    /// On failure the client receives a single JSON error frame and is
    /// closed before the error is returned.
    pub async fn establish(
        mut client: WebSocket,
        remote_addr: SocketAddr,
        config: &ProxyConfig,
    ) -> Result<Self, RelayError> {
        let id = Uuid::new_v4();

        match dial_gateway(&config.gateway_url, config.handshake_timeout).await {
            Ok(gateway) => {
                tracing::info!(
                    session_id = %id,
                    %remote_addr,
                    gateway = %config.gateway_url,
                    "gateway connected"
                );
                Ok(Self {
                    id,
                    remote_addr,
                    client,
                    gateway,
                    token: Arc::from(config.gateway_token.as_str()),
                })
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %id,
                    %remote_addr,
                    gateway = %config.gateway_url,
                    %err,
                    "gateway connection failed"
                );
                report_dial_failure(&mut client, &err).await;
                Err(err)
            }
        }
    }

    /// Relay frames in both directions until either side goes away.
    ///
    /// Returns once both forwarding loops have exited and both connections
    /// have been closed.
    pub async fn run(self) {
        let Self {
            id,
            remote_addr,
            client,
            gateway,
            token,
        } = self;

        let (client_sink, client_stream) = client.split();
        let (gateway_sink, gateway_stream) = gateway.split();
        let cancel = CancellationToken::new();

        let client_stream =
            client_stream.map(|msg| msg.map(Frame::from).map_err(RelayError::from));
        let gateway_stream = gateway_stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => Frame::from_gateway(msg).map(Ok),
                Err(err) => Some(Err(RelayError::from(err))),
            })
        });
        let client_sink = client_sink
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_client())));
        let gateway_sink = gateway_sink
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_gateway())));

        let upstream = tokio::spawn(forward(
            client_stream,
            gateway_sink,
            Direction::ClientToGateway,
            Some(token),
            cancel.clone(),
            id,
        ));
        let downstream = tokio::spawn(forward(
            gateway_stream,
            client_sink,
            Direction::GatewayToClient,
            None,
            cancel.clone(),
            id,
        ));

        let (upstream, downstream) = tokio::join!(upstream, downstream);

        for (direction, result) in [
            (Direction::ClientToGateway, upstream),
            (Direction::GatewayToClient, downstream),
        ] {
            match result {
                Ok(termination) => {
                    tracing::debug!(
                        session_id = %id,
                        %direction,
                        ?termination,
                        "relay loop finished"
                    );
                }
                Err(err) => {
                    tracing::error!(session_id = %id, %direction, %err, "relay task failed");
                }
            }
        }

        tracing::info!(session_id = %id, %remote_addr, "connection closed");
    }
}

/// Open the gateway connection with a bounded handshake.
async fn dial_gateway(url: &str, timeout: Duration) -> Result<GatewayStream, RelayError> {
    let mut request = url.into_client_request().map_err(RelayError::Dial)?;
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static(DIAL_ORIGIN));

    let handshake = tokio_tungstenite::connect_async(request);
    let (stream, _response) = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| RelayError::HandshakeTimeout(timeout))?
        .map_err(RelayError::Dial)?;

    Ok(stream)
}

/// Tell the client why its gateway connection could not be opened, then
/// close it.
async fn report_dial_failure(client: &mut WebSocket, err: &RelayError) {
    let body = serde_json::json!({
        "type": "error",
        "message": format!("Failed to connect to gateway: {err}"),
    });

    if let Err(send_err) = client.send(ws::Message::Text(body.to_string().into())).await {
        tracing::debug!(%send_err, "could not deliver gateway error to client");
    }
    if let Err(close_err) = SinkExt::close(client).await {
        tracing::debug!(%close_err, "error closing client after failed dial");
    }
}

/// Returns `true` for close codes that indicate an ordinary shutdown.
fn is_expected_close(code: Option<u16>) -> bool {
    matches!(code, None | Some(1000) | Some(1001) | Some(1006))
}

/// Apply the configured token to a client text frame.
fn inject_token(frame: Frame, token: &str, session_id: Uuid) -> Frame {
    match frame {
        Frame::Text(text) => {
            let rewritten = match rewrite_connect_token(text.as_str(), token) {
                Cow::Owned(rewritten) => Some(rewritten),
                Cow::Borrowed(_) => None,
            };

            match rewritten {
                Some(rewritten) => {
                    tracing::info!(%session_id, "injected gateway token into connect request");
                    Frame::Text(rewritten.into())
                }
                None => Frame::Text(text),
            }
        }
        other => other,
    }
}

/// Copy frames from `source` to `sink` until either fails, a close frame
/// passes through, or `cancel` fires.
///
/// Whatever the reason for stopping, `cancel` is triggered so the opposite
/// loop stops too, and `sink` is closed.
pub async fn forward<R, W>(
    mut source: R,
    mut sink: W,
    direction: Direction,
    token: Option<Arc<str>>,
    cancel: CancellationToken,
    session_id: Uuid,
) -> Termination
where
    R: Stream<Item = Result<Frame, RelayError>> + Unpin,
    W: Sink<Frame, Error = RelayError> + Unpin,
{
    let termination = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = source.next() => Some(next),
        };

        let Some(next) = next else {
            break Termination::Cancelled;
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                tracing::debug!(%session_id, %direction, %err, "read error, closing relay");
                break Termination::ReadFailed;
            }
            None => break Termination::SourceEnded,
        };

        let frame = match (&token, direction) {
            (Some(token), Direction::ClientToGateway) => inject_token(frame, token, session_id),
            _ => frame,
        };

        let close_code = match &frame {
            Frame::Close(reason) => Some(reason.as_ref().map(|r| r.code)),
            _ => None,
        };

        tracing::debug!(
            %session_id,
            %direction,
            kind = frame.kind(),
            bytes = frame.payload_len(),
            "forwarding frame"
        );

        if let Err(err) = sink.send(frame).await {
            tracing::debug!(%session_id, %direction, %err, "write error, closing relay");
            break Termination::WriteFailed;
        }

        if let Some(code) = close_code {
            if is_expected_close(code) {
                tracing::debug!(%session_id, %direction, ?code, "peer closed connection");
            } else {
                tracing::warn!(%session_id, %direction, ?code, "unexpected close");
            }
            break Termination::Closed(code);
        }
    };

    cancel.cancel();

    if let Err(err) = sink.close().await {
        tracing::debug!(%session_id, %direction, %err, "error closing destination");
    }

    termination
}
