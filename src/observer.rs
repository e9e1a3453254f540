// Observer contract: how the embedding application watches and steers
// the update agent.
//
// Every state transition produces exactly one event, delivered on the
// agent's own thread before the next transition is attempted. The
// returned decision can abort the cycle at any connect or parse state.

use crate::agent::state::UpdateState;
use crate::agent::progress::TransferProgress;
use crate::config::BrokerAddress;
use crate::error::OtaError;

/// Why an event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReason {
    StateChange,
    Success,
    Failure,
}

/// What the observer wants the agent to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed with the state's own handling.
    Continue,
    /// End the current update session cleanly.
    Stop,
    /// The application completed this step itself, successfully. The
    /// agent takes this as a go-ahead and still performs its own
    /// handling of the step; there is no delegated-step mode where the
    /// application owns the connection or parse.
    AppSuccess,
    /// The application completed this step itself and it failed. Fails
    /// the cycle at connect and parse states; elsewhere it is treated
    /// as `Continue`.
    AppFailure,
}

/// Immutable snapshot handed to the observer on each transition.
///
/// `broker` and `unique_topic` are set for connect states, `json_doc`
/// for transfer/parse states, and `progress` for write states.
#[derive(Debug, Clone)]
pub struct CallbackEvent<'a> {
    pub reason: CallbackReason,
    pub state: UpdateState,
    pub error: Option<OtaError>,
    pub broker: Option<&'a BrokerAddress>,
    pub unique_topic: Option<&'a str>,
    pub json_doc: Option<&'a str>,
    pub progress: Option<TransferProgress>,
}

impl<'a> CallbackEvent<'a> {
    pub fn new(reason: CallbackReason, state: UpdateState) -> Self {
        Self {
            reason,
            state,
            error: None,
            broker: None,
            unique_topic: None,
            json_doc: None,
            progress: None,
        }
    }

    pub fn with_error(mut self, error: OtaError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_broker(mut self, broker: &'a BrokerAddress) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_unique_topic(mut self, topic: &'a str) -> Self {
        self.unique_topic = Some(topic);
        self
    }

    pub fn with_json_doc(mut self, doc: &'a str) -> Self {
        self.json_doc = Some(doc);
        self
    }

    pub fn with_progress(mut self, progress: TransferProgress) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Receives one event per state transition.
///
/// Called synchronously on the agent's thread: an observer that blocks
/// stalls the whole update cycle, so implementations must return
/// promptly. Returning `Stop` is always safe; the agent releases its
/// connection and storage resources before exiting the cycle.
pub trait OtaObserver: Send {
    fn on_event(&mut self, event: &CallbackEvent<'_>) -> Decision;
}

/// Presentation observer that reports agent activity through `log`.
/// Keeps the state machine free of any printing of its own.
pub struct LogObserver;

impl OtaObserver for LogObserver {
    fn on_event(&mut self, event: &CallbackEvent<'_>) -> Decision {
        match event.reason {
            CallbackReason::Success => {
                log::info!("OTA SUCCESS state: {}", event.state.as_str());
            }
            CallbackReason::Failure => {
                let error = event
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "none".to_string());
                log::warn!(
                    "OTA FAILURE state: {} last_error: {}",
                    event.state.as_str(),
                    error
                );
            }
            CallbackReason::StateChange => match event.state {
                UpdateState::JobConnect
                | UpdateState::DataConnect
                | UpdateState::ResultConnect => {
                    if let Some(broker) = event.broker {
                        log::info!(
                            "OTA {}: broker {}:{} topic '{}'",
                            event.state.as_str(),
                            broker.host,
                            broker.port,
                            event.unique_topic.unwrap_or("")
                        );
                    }
                }
                UpdateState::JobDownload
                | UpdateState::JobParse
                | UpdateState::DataDownload
                | UpdateState::ResultSend => {
                    log::info!(
                        "OTA {}: '{}'",
                        event.state.as_str(),
                        event.json_doc.unwrap_or("")
                    );
                }
                UpdateState::StorageWrite => {
                    if let Some(progress) = event.progress {
                        log::info!(
                            "OTA storage write {}% ({} of {})",
                            progress.percentage,
                            progress.bytes_written,
                            progress.total_size
                        );
                    }
                }
                _ => {
                    log::debug!("OTA state change: {}", event.state.as_str());
                }
            },
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_observer_always_continues() {
        let mut observer = LogObserver;
        for state in [
            UpdateState::StartUpdate,
            UpdateState::JobConnect,
            UpdateState::StorageWrite,
            UpdateState::OtaComplete,
        ] {
            let event = CallbackEvent::new(CallbackReason::StateChange, state);
            assert_eq!(observer.on_event(&event), Decision::Continue);
        }
    }

    #[test]
    fn failure_event_carries_last_error() {
        let event = CallbackEvent::new(CallbackReason::Failure, UpdateState::JobConnect)
            .with_error(OtaError::TransferTimeout);
        assert_eq!(event.error, Some(OtaError::TransferTimeout));
    }
}
