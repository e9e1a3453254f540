// Transport and network-interface collaborator contracts
//
// The agent never opens sockets or handles TLS itself; the embedding
// application supplies a publish/subscribe transport and a link-state
// signal. One transport carries at most one logical session at a time.

use std::fmt;
use std::time::Duration;

use crate::config::{BrokerAddress, TlsCredentials};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ConnectFailed(String),
    NotConnected,
    Io(String),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            TransportError::NotConnected => write!(f, "not connected"),
            TransportError::Io(msg) => write!(f, "transport i/o error: {}", msg),
            TransportError::Timeout => write!(f, "transport timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One message received from a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session to the broker. TLS credential material is
/// passed through as opaque bytes.
pub trait Transport: Send {
    fn connect(
        &mut self,
        broker: &BrokerAddress,
        client_id: &str,
        credentials: Option<&TlsCredentials>,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Blocks up to `timeout` for the next message on any subscribed
    /// topic. `Ok(None)` means the wait elapsed with nothing received.
    fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError>;

    /// Must be idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Link-layer state signal. Connect attempts fail fast while the
/// interface reports down; the agent never manages the association
/// itself.
pub trait NetworkInterface: Send {
    fn is_up(&self) -> bool;
}

/// A network interface that is always up, for hosts where link state is
/// handled elsewhere.
pub struct AlwaysUp;

impl NetworkInterface for AlwaysUp {
    fn is_up(&self) -> bool {
        true
    }
}
