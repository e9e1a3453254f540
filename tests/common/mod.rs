// Test doubles shared by the integration tests: a scripted in-memory
// broker/publisher, a failure-injecting storage, and an observer that
// records every event it is handed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use ota_mqtt_agent::{
    BrokerAddress, CallbackEvent, CallbackReason, Decision, FirmwareVersion, InboundMessage,
    OtaError, OtaObserver, OtaStorage, StorageError, TransferProgress, Transport, TransportError,
    UpdateState,
};

/// Shared state of the fake broker plus the publisher behind it.
#[derive(Default)]
pub struct BrokerState {
    /// Outcome of each successive connect attempt; exhausted entries
    /// default to success.
    pub connect_results: VecDeque<Result<(), TransportError>>,
    /// JSON document sent back on the device's unique topic when an
    /// "Update Availability" query arrives. `None` leaves the query
    /// unanswered.
    pub job_response: Option<String>,
    /// Chunk payloads sent when an update request arrives.
    pub chunks: Vec<Vec<u8>>,
    /// Answer the first update request with one unparseable payload
    /// instead of the chunks; later requests get the real chunks.
    pub corrupt_first_data_response: bool,
    /// Fallback topic for chunk delivery when the request body carries
    /// no unique topic, as in the direct flow.
    pub direct_topic: String,
    inbox: VecDeque<InboundMessage>,
    pub connects: u32,
    pub disconnects: u32,
    /// Host of each broker a connect attempt was made against.
    pub connected_hosts: Vec<String>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
    connected: bool,
}

impl BrokerState {
    fn respond_to(&mut self, body: &str) {
        let Ok(doc) = serde_json::from_str::<Value>(body) else {
            return;
        };
        let unique_topic = doc
            .get("UniqueTopicName")
            .and_then(Value::as_str)
            .map(str::to_string);
        match doc.get("Message").and_then(Value::as_str) {
            Some("Update Availability") => {
                if let (Some(topic), Some(job)) = (unique_topic, self.job_response.clone()) {
                    self.inbox.push_back(InboundMessage {
                        topic,
                        payload: job.into_bytes(),
                    });
                }
            }
            Some("Request Update") | Some("Send Direct Update") => {
                let topic = unique_topic.unwrap_or_else(|| self.direct_topic.clone());
                if self.corrupt_first_data_response {
                    self.corrupt_first_data_response = false;
                    self.inbox.push_back(InboundMessage {
                        topic,
                        payload: vec![0u8; 40],
                    });
                    return;
                }
                for chunk in self.chunks.clone() {
                    self.inbox.push_back(InboundMessage {
                        topic: topic.clone(),
                        payload: chunk,
                    });
                }
            }
            _ => {}
        }
    }
}

/// Transport double backed by shared `BrokerState`. Clones share the
/// broker so tests can inspect it after the agent consumes the box.
#[derive(Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn with_state(f: impl FnOnce(&mut BrokerState)) -> Self {
        let broker = Self::new();
        f(&mut broker.state.lock().unwrap());
        broker
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

impl Transport for FakeBroker {
    fn connect(
        &mut self,
        broker: &BrokerAddress,
        _client_id: &str,
        _credentials: Option<&ota_mqtt_agent::TlsCredentials>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connected_hosts.push(broker.host.clone());
        let result = state.connect_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.connects += 1;
            state.connected = true;
        }
        result
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let body = String::from_utf8_lossy(payload).into_owned();
        state.published.push((topic.to_string(), body.clone()));
        state.respond_to(&body);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        let message = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.inbox.pop_front()
        };
        if message.is_none() {
            // Keep empty waits cheap without spinning the caller's
            // deadline loop hot.
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(message)
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

#[derive(Default)]
pub struct StorageState {
    pub image: Vec<u8>,
    pub opens: u32,
    pub closes: u32,
    pub writes: u32,
    /// Fail the nth write (1-based) with `WriteFailed`.
    pub fail_write_at: Option<u32>,
    pub verify_result: bool,
    open: bool,
}

/// Storage double with failure injection and call accounting.
#[derive(Clone)]
pub struct FakeStorage {
    state: Arc<Mutex<StorageState>>,
    app_version: FirmwareVersion,
}

impl FakeStorage {
    pub fn new(app_version: FirmwareVersion) -> Self {
        let state = StorageState {
            verify_result: true,
            ..StorageState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            app_version,
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, StorageState> {
        self.state.lock().unwrap()
    }
}

impl OtaStorage for FakeStorage {
    fn open(&mut self, _app_id: u8) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        state.open = true;
        state.image.clear();
        Ok(())
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let state = self.state.lock().unwrap();
        let offset = offset as usize;
        if offset >= state.image.len() {
            return Ok(0);
        }
        let n = buf.len().min(state.image.len() - offset);
        buf[..n].copy_from_slice(&state.image[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(StorageError::NotOpen);
        }
        state.writes += 1;
        if state.fail_write_at == Some(state.writes) {
            return Err(StorageError::WriteFailed("injected".to_string()));
        }
        let offset = offset as usize;
        let end = offset + data.len();
        if end > state.image.len() {
            state.image.resize(end, 0xff);
        }
        state.image[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn verify(&mut self) -> Result<bool, StorageError> {
        Ok(self.state.lock().unwrap().verify_result)
    }

    fn validate_image(&mut self, _app_id: u8) -> Result<(), StorageError> {
        Ok(())
    }

    fn app_info(&self) -> Result<FirmwareVersion, StorageError> {
        Ok(self.app_version)
    }
}

/// One recorded observer event, with only the owned parts kept.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub reason: CallbackReason,
    pub state: UpdateState,
    pub error: Option<OtaError>,
    pub progress: Option<TransferProgress>,
}

#[derive(Default)]
pub struct ObserverState {
    pub events: Vec<RecordedEvent>,
    /// Decision returned the first time this state is entered.
    pub decide_at: Option<(UpdateState, Decision)>,
}

/// Observer double that records everything and can script one decision.
#[derive(Clone)]
pub struct RecordingObserver {
    state: Arc<Mutex<ObserverState>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ObserverState::default())),
        }
    }

    pub fn deciding(state: UpdateState, decision: Decision) -> Self {
        let observer = Self::new();
        observer.state.lock().unwrap().decide_at = Some((state, decision));
        observer
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// States of the recorded `StateChange` events, in order.
    pub fn visited_states(&self) -> Vec<UpdateState> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == CallbackReason::StateChange)
            .map(|e| e.state)
            .collect()
    }

    pub fn failure_count_at(&self, state: UpdateState) -> usize {
        self.events()
            .iter()
            .filter(|e| e.reason == CallbackReason::Failure && e.state == state)
            .count()
    }
}

impl OtaObserver for RecordingObserver {
    fn on_event(&mut self, event: &CallbackEvent<'_>) -> Decision {
        let mut state = self.state.lock().unwrap();
        state.events.push(RecordedEvent {
            reason: event.reason,
            state: event.state,
            error: event.error.clone(),
            progress: event.progress,
        });
        if event.reason == CallbackReason::StateChange {
            if let Some((at, decision)) = state.decide_at {
                if at == event.state {
                    state.decide_at = None;
                    return decision;
                }
            }
        }
        Decision::Continue
    }
}
