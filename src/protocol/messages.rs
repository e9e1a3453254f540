// Outbound JSON message bodies
//
// Field names are fixed by the publisher side of the protocol
// (PascalCase), so every struct carries explicit serde renames.

use serde::{Deserialize, Serialize};

use crate::config::DeviceInfo;
use crate::version::FirmwareVersion;

pub const MSG_UPDATE_AVAILABILITY: &str = "Update Availability";
pub const MSG_REQUEST_UPDATE: &str = "Request Update";
pub const MSG_SEND_DIRECT_UPDATE: &str = "Send Direct Update";

pub const RESULT_SUCCESS: &str = "Success";
pub const RESULT_FAILURE: &str = "Failure";

/// Query or request sent by the device to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMessage {
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
    #[serde(rename = "BoardName")]
    pub board_name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "UniqueTopicName", skip_serializing_if = "Option::is_none")]
    pub unique_topic_name: Option<String>,
}

impl DeviceMessage {
    fn new(
        message: &str,
        device: &DeviceInfo,
        version: FirmwareVersion,
        unique_topic_name: Option<&str>,
    ) -> Self {
        Self {
            message: message.to_string(),
            manufacturer: device.manufacturer.clone(),
            manufacturer_id: device.manufacturer_id.clone(),
            product_id: device.product_id.clone(),
            serial_number: device.serial_number.clone(),
            board_name: device.board_name.clone(),
            version: version.to_string(),
            unique_topic_name: unique_topic_name.map(str::to_string),
        }
    }

    /// "Update Availability" query, job flow.
    pub fn update_availability(
        device: &DeviceInfo,
        version: FirmwareVersion,
        unique_topic: &str,
    ) -> Self {
        Self::new(MSG_UPDATE_AVAILABILITY, device, version, Some(unique_topic))
    }

    /// "Request Update" body, job flow.
    pub fn request_update(
        device: &DeviceInfo,
        version: FirmwareVersion,
        unique_topic: &str,
    ) -> Self {
        Self::new(MSG_REQUEST_UPDATE, device, version, Some(unique_topic))
    }

    /// "Send Direct Update" body, direct flow.
    pub fn direct_update(device: &DeviceInfo, version: FirmwareVersion) -> Self {
        Self::new(MSG_SEND_DIRECT_UPDATE, device, version, None)
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success,
    Failure,
}

impl UpdateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateOutcome::Success => RESULT_SUCCESS,
            UpdateOutcome::Failure => RESULT_FAILURE,
        }
    }
}

/// Result body published after a download attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "UniqueTopicName")]
    pub unique_topic_name: String,
}

impl ResultMessage {
    pub fn new(outcome: UpdateOutcome, unique_topic: &str) -> Self {
        Self {
            message: outcome.as_str().to_string(),
            unique_topic_name: unique_topic.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
