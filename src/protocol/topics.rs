// Topic strings are three segments: <company-prefix>/<board-name>/<suffix>

use serde::{Deserialize, Serialize};

use crate::error::OtaError;

/// Suffix the publisher listens on for job-flow requests.
pub const PUBLISHER_LISTEN_SUFFIX: &str = "publish_notify";
/// Suffix the publisher listens on for direct-download requests.
pub const PUBLISHER_DIRECT_SUFFIX: &str = "OTAImage";

/// The device never holds more than this many live subscriptions.
pub const MAX_SUBSCRIBED_TOPICS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub company_prefix: String,
    pub board_name: String,
    pub listen_suffix: String,
    pub direct_suffix: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            company_prefix: "MyUniqueTopic".to_string(),
            board_name: "CY8CPROTO_062_4343W".to_string(),
            listen_suffix: PUBLISHER_LISTEN_SUFFIX.to_string(),
            direct_suffix: PUBLISHER_DIRECT_SUFFIX.to_string(),
        }
    }
}

impl TopicConfig {
    pub fn validate(&self) -> Result<(), OtaError> {
        for (name, segment) in [
            ("company_prefix", &self.company_prefix),
            ("board_name", &self.board_name),
            ("listen_suffix", &self.listen_suffix),
            ("direct_suffix", &self.direct_suffix),
        ] {
            if segment.is_empty() || segment.contains('/') {
                return Err(OtaError::InvalidConfig(format!(
                    "topic segment {} must be non-empty and free of '/'",
                    name
                )));
            }
        }
        Ok(())
    }

    fn compose(&self, suffix: &str) -> String {
        format!("{}/{}/{}", self.company_prefix, self.board_name, suffix)
    }

    /// Topic the publisher listens on for availability/update requests.
    pub fn publisher_listen_topic(&self) -> String {
        self.compose(&self.listen_suffix)
    }

    /// Topic the publisher listens on for direct image requests.
    pub fn publisher_direct_topic(&self) -> String {
        self.compose(&self.direct_suffix)
    }

    /// Per-device topic the publisher answers on.
    pub fn unique_topic(&self, suffix: &str) -> String {
        self.compose(suffix)
    }
}
