// Wire protocol: topic composition, outbound JSON bodies, the inbound
// job document, and the binary chunk payload header.

pub mod chunk;
pub mod job;
pub mod messages;
pub mod topics;

pub use chunk::ChunkHeader;
pub use job::JobDocument;
pub use messages::{DeviceMessage, ResultMessage, UpdateOutcome};
pub use topics::TopicConfig;
