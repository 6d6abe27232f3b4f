//! WebTransport server implementation
//!
//! Each client opens one bidirectional stream. A reader loop feeds frames to
//! the [`GameSession`] in arrival order and a writer task drains the
//! connection's outbound queue, so a slow client never stalls anyone else.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use wtransport::endpoint::IncomingSession;
use wtransport::{Endpoint, VarInt};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::net::connection::ConnectionHandle;
use crate::net::framing::{FrameReader, FrameWriter, FramingError};
use crate::net::game_session::GameSession;
use crate::net::hub::Frame;
use crate::net::tls::TlsConfig;

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    session: Arc<GameSession>,
}

impl WebTransportServer {
    pub async fn new(config: ServerConfig, session: Arc<GameSession>) -> anyhow::Result<Self> {
        let tls_config =
            TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;

        Ok(Self {
            config,
            tls_config,
            session,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    /// Accept connections until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        let builder = wtransport::ServerConfig::builder();
        // Unspecified address: bind dual-stack so both IPv4 and IPv6 clients get in
        let builder = if self.config.bind_address.is_unspecified() {
            builder.with_bind_default(self.config.port)
        } else {
            builder.with_bind_address(self.config.socket_addr())
        };
        let server_config = builder.with_identity(self.tls_config.identity).build();

        let server = Endpoint::server(server_config)?;

        info!("WebTransport server listening on {}", self.config.socket_addr());

        loop {
            let incoming = server.accept().await;
            let session = self.session.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, session).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection from handshake to teardown
async fn handle_connection(incoming: IncomingSession, session: Arc<GameSession>) -> anyhow::Result<()> {
    let request = incoming.await?;
    debug!(
        "Session request from {:?}, path: {}",
        request.authority(),
        request.path()
    );
    let connection = request.accept().await?;
    let remote = connection.remote_address();

    let (handle, outbound) = match session.connect(Some(remote)) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("Rejecting {}: {}", remote, e);
            connection.close(VarInt::from_u32(1), b"server full");
            return Ok(());
        }
    };

    let stream = tokio::select! {
        stream = connection.accept_bi() => stream,
        _ = handle.closed() => {
            session.disconnect(handle.id);
            connection.close(VarInt::from_u32(0), b"idle");
            return Ok(());
        }
    };

    let (send, recv) = match stream {
        Ok(stream) => stream,
        Err(e) => {
            session.disconnect(handle.id);
            return Err(e.into());
        }
    };

    let writer = tokio::spawn(write_frames(send, outbound, session.metrics().clone()));
    let reason = read_frames(recv, &session, &handle).await;

    session.disconnect(handle.id);
    writer.abort();
    if reason == CloseReason::Idle {
        connection.close(VarInt::from_u32(0), b"idle");
    }
    Ok(())
}

/// Why a reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream or the stream failed
    Closed,
    /// The registry asked this connection to close
    Idle,
}

/// Feed inbound frames to the session until the stream ends or a close is requested
pub async fn read_frames<R>(recv: R, session: &GameSession, handle: &ConnectionHandle) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    let mut reader = FrameReader::new(recv);
    loop {
        tokio::select! {
            frame = reader.next_frame() => match frame {
                Ok(data) => session.handle_frame(handle.id, data),
                Err(FramingError::ConnectionClosed) => return CloseReason::Closed,
                Err(e) => {
                    debug!("Stream error on {}: {}", handle.id, e);
                    return CloseReason::Closed;
                }
            },
            _ = handle.closed() => return CloseReason::Idle,
        }
    }
}

/// Write queued frames in order until the queue is closed or a write fails
pub async fn write_frames<W>(send: W, mut outbound: UnboundedReceiver<Frame>, metrics: Arc<Metrics>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = FrameWriter::new(send);
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.send(&frame).await {
            debug!("Write failed, dropping outbound queue: {}", e);
            break;
        }
        metrics.record_sent(frame.len());
    }
}
