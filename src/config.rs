// Agent configuration: timing/retry policy, broker and device identity,
// topic segments, TLS material, and agent behavior flags.
//
// All values are supplied once at agent construction; there is no runtime
// reconfiguration surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OtaError;

/// Time before the first update check after the agent starts.
pub const INITIAL_CHECK_SECS: u64 = 10;
/// Time between update checks.
pub const CHECK_INTERVAL_SECS: u64 = 10;
/// Time between retries after a failed check.
pub const RETRY_INTERVAL_SECS: u64 = 5;
/// How long the agent stays connected looking for a download per cycle.
pub const ACTIVE_WINDOW_SECS: u64 = 10 * 60;
/// How long to wait for the job document.
pub const JOB_CHECK_TIMEOUT_SECS: u64 = 30;
/// How long to wait for the image download to complete.
pub const DATA_CHECK_TIMEOUT_SECS: u64 = 5 * 60;
/// Retry count for the overall update session.
pub const SESSION_RETRIES: u32 = 3;
/// Retry count for broker connect attempts.
pub const CONNECT_RETRIES: u32 = 3;
/// Retry count for image download attempts.
pub const DOWNLOAD_RETRIES: u32 = 3;

/// Longest plausible timer value accepted by validation.
const MAX_TIMER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// MQTT client identifiers are capped below 17 characters.
pub const MAX_CLIENT_ID_LEN: usize = 16;

/// All duration and retry-count parameters for one agent instance.
///
/// A zero timeout means that check is disabled. Immutable once the agent
/// is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPolicy {
    pub initial_check: Duration,
    pub check_interval: Duration,
    pub retry_interval: Duration,
    pub active_window: Duration,
    /// Maximum gap between successive download chunks. Zero disables.
    pub packet_interval: Duration,
    pub job_check_timeout: Duration,
    pub data_check_timeout: Duration,
    pub session_retries: u32,
    pub connect_retries: u32,
    pub download_retries: u32,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            initial_check: Duration::from_secs(INITIAL_CHECK_SECS),
            check_interval: Duration::from_secs(CHECK_INTERVAL_SECS),
            retry_interval: Duration::from_secs(RETRY_INTERVAL_SECS),
            active_window: Duration::from_secs(ACTIVE_WINDOW_SECS),
            packet_interval: Duration::ZERO,
            job_check_timeout: Duration::from_secs(JOB_CHECK_TIMEOUT_SECS),
            data_check_timeout: Duration::from_secs(DATA_CHECK_TIMEOUT_SECS),
            session_retries: SESSION_RETRIES,
            connect_retries: CONNECT_RETRIES,
            download_retries: DOWNLOAD_RETRIES,
        }
    }
}

impl TimingPolicy {
    pub fn validate(&self) -> Result<(), OtaError> {
        let timers = [
            ("initial_check", self.initial_check),
            ("check_interval", self.check_interval),
            ("retry_interval", self.retry_interval),
            ("active_window", self.active_window),
            ("packet_interval", self.packet_interval),
            ("job_check_timeout", self.job_check_timeout),
            ("data_check_timeout", self.data_check_timeout),
        ];
        for (name, value) in timers {
            if value > MAX_TIMER {
                return Err(OtaError::InvalidConfig(format!(
                    "{} of {:?} is implausibly large",
                    name, value
                )));
            }
        }
        // A zero recheck interval would spin the agent without sleeping.
        if self.check_interval.is_zero() {
            return Err(OtaError::InvalidConfig(
                "check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which discovery flow a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateFlow {
    /// Fetch a job document first, then download from wherever it points.
    Job,
    /// The image location is already known; download directly.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

/// Who this device is to the broker, and which flow it speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub broker: BrokerAddress,
    pub client_id: heapless::String<MAX_CLIENT_ID_LEN>,
    pub unique_topic_suffix: String,
    pub flow: UpdateFlow,
}

impl SessionIdentity {
    /// Rejects oversized client identifiers and empty topic suffixes
    /// rather than truncating them.
    pub fn new(
        broker: BrokerAddress,
        client_id: &str,
        unique_topic_suffix: impl Into<String>,
        flow: UpdateFlow,
    ) -> Result<Self, OtaError> {
        let client_id: heapless::String<MAX_CLIENT_ID_LEN> =
            client_id.try_into().map_err(|_| {
                OtaError::InvalidConfig(format!(
                    "client identifier '{}' exceeds {} characters",
                    client_id, MAX_CLIENT_ID_LEN
                ))
            })?;
        let unique_topic_suffix = unique_topic_suffix.into();
        if unique_topic_suffix.is_empty() {
            return Err(OtaError::InvalidConfig(
                "unique topic suffix must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            broker,
            client_id,
            unique_topic_suffix,
            flow,
        })
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        if self.broker.host.is_empty() {
            return Err(OtaError::InvalidConfig(
                "broker host must be non-empty".to_string(),
            ));
        }
        if self.unique_topic_suffix.is_empty() {
            return Err(OtaError::InvalidConfig(
                "unique topic suffix must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity strings embedded in every outbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub manufacturer_id: String,
    pub product_id: String,
    pub serial_number: String,
    pub board_name: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "Infineon".to_string(),
            manufacturer_id: "ABCD123".to_string(),
            product_id: "EFGH456".to_string(),
            serial_number: "ABC213450001".to_string(),
            board_name: "CY8CPROTO_062_4343W".to_string(),
        }
    }
}

/// TLS material handed to the transport unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCredentials {
    pub root_ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Everything the agent needs, supplied once at start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub timing: TimingPolicy,
    pub identity: SessionIdentity,
    pub topics: crate::protocol::TopicConfig,
    pub device: DeviceInfo,
    pub credentials: Option<TlsCredentials>,
    /// Application/image slot handed to the storage collaborator.
    pub app_id: u8,
    /// Ask the embedding application to reboot after a successful update.
    pub reboot_on_completion: bool,
    /// Confirm the running image with storage at agent start so a fresh
    /// update is not rolled back.
    pub validate_after_reboot: bool,
    /// Publish the Success/Failure result message after a download.
    pub send_result: bool,
}

impl AgentConfig {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            timing: TimingPolicy::default(),
            identity,
            topics: crate::protocol::TopicConfig::default(),
            device: DeviceInfo::default(),
            credentials: None,
            app_id: 0,
            reboot_on_completion: false,
            validate_after_reboot: true,
            send_result: true,
        }
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        self.timing.validate()?;
        self.identity.validate()?;
        self.topics.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity() -> SessionIdentity {
        SessionIdentity::new(
            BrokerAddress::new("test.mosquitto.org", 1883),
            "CY_IOT_DEVICE",
            "unique_1234",
            UpdateFlow::Job,
        )
        .unwrap()
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(TimingPolicy::default().validate().is_ok());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AgentConfig::new(identity()).validate().is_ok());
    }

    #[test]
    fn implausibly_large_timer_is_rejected() {
        let mut policy = TimingPolicy::default();
        policy.data_check_timeout = Duration::from_secs(365 * 24 * 60 * 60);
        assert!(matches!(
            policy.validate(),
            Err(OtaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let mut policy = TimingPolicy::default();
        policy.check_interval = Duration::ZERO;
        assert!(matches!(
            policy.validate(),
            Err(OtaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_client_id_is_rejected() {
        let err = SessionIdentity::new(
            BrokerAddress::new("broker", 1883),
            "this_identifier_is_much_too_long",
            "unique",
            UpdateFlow::Direct,
        );
        assert!(matches!(err, Err(OtaError::InvalidConfig(_))));
    }

    #[test]
    fn empty_topic_suffix_is_rejected() {
        let err = SessionIdentity::new(
            BrokerAddress::new("broker", 1883),
            "dev",
            "",
            UpdateFlow::Direct,
        );
        assert!(matches!(err, Err(OtaError::InvalidConfig(_))));
    }

    proptest! {
        // Any policy whose timers all fit inside the plausible window and
        // whose check interval is non-zero must validate.
        #[test]
        fn plausible_policies_validate(
            initial in 0u64..86_400,
            interval in 1u64..86_400,
            retry in 0u64..86_400,
            window in 0u64..86_400,
            packet in 0u64..3_600,
            job in 0u64..3_600,
            data in 0u64..86_400,
            retries in 0u32..100,
        ) {
            let policy = TimingPolicy {
                initial_check: Duration::from_secs(initial),
                check_interval: Duration::from_secs(interval),
                retry_interval: Duration::from_secs(retry),
                active_window: Duration::from_secs(window),
                packet_interval: Duration::from_secs(packet),
                job_check_timeout: Duration::from_secs(job),
                data_check_timeout: Duration::from_secs(data),
                session_retries: retries,
                connect_retries: retries,
                download_retries: retries,
            };
            prop_assert!(policy.validate().is_ok());
        }
    }
}
