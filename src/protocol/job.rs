// Inbound job document
//
// The publisher answers an availability query with a small JSON document
// describing where and how to fetch the image. A document that does not
// parse cleanly is rejected whole; nothing is partially applied.

use serde::{Deserialize, Serialize};

use crate::config::{BrokerAddress, SessionIdentity};
use crate::error::OtaError;
use crate::version::FirmwareVersion;

/// The only transfer the agent speaks.
const CONNECTION_MQTT: &str = "MQTT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "ManufacturerID")]
    pub manufacturer_id: String,
    #[serde(rename = "ProductID")]
    pub product_id: String,
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Board")]
    pub board: String,
    #[serde(rename = "Connection")]
    pub connection: String,
    #[serde(rename = "Broker")]
    pub broker: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "UniqueTopicName", default)]
    pub unique_topic_name: Option<String>,
}

impl JobDocument {
    /// Parses and checks a job document. Any shape violation is
    /// `MalformedDocument`.
    pub fn parse(doc: &str) -> Result<Self, OtaError> {
        let job: JobDocument = serde_json::from_str(doc)
            .map_err(|e| OtaError::MalformedDocument(e.to_string()))?;
        if job.connection != CONNECTION_MQTT {
            return Err(OtaError::MalformedDocument(format!(
                "unsupported connection type '{}'",
                job.connection
            )));
        }
        if job.broker.is_empty() {
            return Err(OtaError::MalformedDocument("empty broker host".to_string()));
        }
        // The version must at least be well formed even though the device
        // does not gate the download on it.
        job.version
            .parse::<FirmwareVersion>()
            .map_err(OtaError::MalformedDocument)?;
        Ok(job)
    }

    pub fn available_version(&self) -> FirmwareVersion {
        // parse() already checked the field.
        self.version.parse().unwrap_or(FirmwareVersion::new(0, 0, 0))
    }

    /// Where the image download should connect.
    pub fn data_broker(&self) -> BrokerAddress {
        BrokerAddress::new(self.broker.clone(), self.port)
    }

    /// True when the document points somewhere other than the session's
    /// current broker, i.e. the job is a redirect.
    pub fn redirects_from(&self, identity: &SessionIdentity) -> bool {
        self.broker != identity.broker.host || self.port != identity.broker.port
    }
}
