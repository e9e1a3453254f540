//! Device-side OTA update agent.
//!
//! Periodically asks an update publisher, over a publish/subscribe
//! transport, whether new firmware is available, downloads the image in
//! framed chunks, writes it through a storage collaborator, and reports
//! the result back. The embedding application supplies the transport,
//! network link state, storage, and an observer that is consulted on
//! every state transition; this crate contains no sockets, TLS, or
//! flash drivers of its own.
//!
//! ```no_run
//! use ota_mqtt_agent::{
//!     AgentConfig, BrokerAddress, LogObserver, MemoryStorage, OtaAgent,
//!     SessionIdentity, UpdateFlow,
//! };
//! # use ota_mqtt_agent::{AlwaysUp, Transport};
//! # fn transport() -> Box<dyn Transport> { unimplemented!() }
//! # fn main() -> anyhow::Result<()> {
//! let identity = SessionIdentity::new(
//!     BrokerAddress::new("test.mosquitto.org", 1883),
//!     "CY_IOT_DEVICE",
//!     "unique_1234",
//!     UpdateFlow::Job,
//! )?;
//! let config = AgentConfig::new(identity);
//! let version = "1.0.0".parse().map_err(anyhow::Error::msg)?;
//! let agent = OtaAgent::new(
//!     config,
//!     transport(),
//!     Box::new(AlwaysUp),
//!     Box::new(MemoryStorage::new(version)),
//!     Box::new(LogObserver),
//! )?;
//! let handle = agent.spawn()?;
//! handle.check_now()?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod version;

pub use agent::{AgentExit, CycleOutcome, OtaAgent, OtaAgentHandle, TransferProgress, UpdateState};
pub use config::{
    AgentConfig, BrokerAddress, DeviceInfo, SessionIdentity, TimingPolicy, TlsCredentials,
    UpdateFlow,
};
pub use error::OtaError;
pub use observer::{CallbackEvent, CallbackReason, Decision, LogObserver, OtaObserver};
pub use protocol::{ChunkHeader, DeviceMessage, JobDocument, ResultMessage, TopicConfig, UpdateOutcome};
pub use storage::{MemoryStorage, OtaStorage, StorageError};
pub use transport::{AlwaysUp, InboundMessage, NetworkInterface, Transport, TransportError};
pub use version::FirmwareVersion;
