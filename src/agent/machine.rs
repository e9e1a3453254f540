// Update cycle driver
//
// Walks one check cycle through the job or direct flow, owns the
// deadlines and retry budgets, and reports every transition to the
// observer before the next one is attempted. All collaborator calls are
// sequential; the machine never holds more than one in-flight network or
// storage operation.

use std::thread;
use std::time::Duration;

use crate::config::{AgentConfig, BrokerAddress, DeviceInfo, SessionIdentity, TimingPolicy, UpdateFlow};
use crate::connection::{ConnectionManager, Deadline};
use crate::error::OtaError;
use crate::observer::{CallbackEvent, CallbackReason, Decision, OtaObserver};
use crate::protocol::messages::UpdateOutcome;
use crate::protocol::{ChunkHeader, DeviceMessage, JobDocument, ResultMessage, TopicConfig};
use crate::storage::OtaStorage;
use crate::transport::{NetworkInterface, Transport};
use crate::version::FirmwareVersion;

use super::progress::{AttemptCounters, TransferProgress};
use super::state::UpdateState;

/// How long one receive call blocks when every timeout is disabled.
const RECEIVE_POLL: Duration = Duration::from_secs(1);

/// What one update cycle came to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An image was downloaded, written, and verified.
    Applied,
    /// The observer requested a stop; the cycle ended cleanly.
    Stopped,
    /// The cycle failed with the given terminal error.
    Failed(OtaError),
}

/// State-specific payload attached to a transition event. All fields
/// borrow from the cycle's own locals, never from the machine.
#[derive(Default)]
struct Payload<'a> {
    broker: Option<&'a BrokerAddress>,
    topic: Option<&'a str>,
    doc: Option<&'a str>,
    progress: Option<TransferProgress>,
}

pub(crate) struct UpdateMachine {
    config: AgentConfig,
    connection: ConnectionManager,
    storage: Box<dyn OtaStorage>,
    observer: Box<dyn OtaObserver>,
    state: UpdateState,
    last_error: Option<OtaError>,
    counters: AttemptCounters,
    progress: TransferProgress,
    storage_open: bool,
}

impl UpdateMachine {
    pub(crate) fn new(
        config: AgentConfig,
        transport: Box<dyn Transport>,
        network: Box<dyn NetworkInterface>,
        storage: Box<dyn OtaStorage>,
        observer: Box<dyn OtaObserver>,
    ) -> Self {
        let connection = ConnectionManager::new(transport, network, &config.timing);
        Self {
            config,
            connection,
            storage,
            observer,
            state: UpdateState::NotInitialized,
            last_error: None,
            counters: AttemptCounters::default(),
            progress: TransferProgress::default(),
            storage_open: false,
        }
    }

    pub(crate) fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> UpdateState {
        self.state
    }

    pub(crate) fn last_error(&self) -> Option<&OtaError> {
        self.last_error.as_ref()
    }

    pub(crate) fn storage_mut(&mut self) -> &mut dyn OtaStorage {
        self.storage.as_mut()
    }

    pub(crate) fn enter_started(&mut self) -> Result<(), OtaError> {
        self.transition(UpdateState::Initializing, Payload::default())?;
        self.transition(UpdateState::AgentStarted, Payload::default())
    }

    pub(crate) fn enter_waiting(&mut self) -> Result<(), OtaError> {
        self.transition(UpdateState::AgentWaiting, Payload::default())
    }

    pub(crate) fn enter_exiting(&mut self) {
        if self.state != UpdateState::Exiting {
            self.state = UpdateState::Exiting;
            let event = CallbackEvent::new(CallbackReason::StateChange, UpdateState::Exiting);
            let _ = self.observer.on_event(&event);
        }
    }

    /// Drives one full cycle. Resources held by the cycle are released on
    /// every path before this returns.
    pub(crate) fn run_cycle(&mut self) -> CycleOutcome {
        if self.state == UpdateState::Exiting {
            return CycleOutcome::Failed(OtaError::SessionExhausted);
        }

        self.counters.start_cycle();
        // Redirects rewrite this copy only; the configured identity is
        // restored at the next cycle.
        let mut cycle = self.config.identity.clone();
        let result = self.drive_cycle(&mut cycle);

        self.connection.close();
        if self.storage_open {
            if let Err(e) = self.storage.close() {
                log::error!("storage close failed: {}", e);
            }
            self.storage_open = false;
        }

        match result {
            Ok(()) => {
                self.counters.session_succeeded();
                self.last_error = None;
                CycleOutcome::Applied
            }
            Err(OtaError::ObserverStop) => {
                self.last_error = Some(OtaError::ObserverStop);
                let _ = self.notify_failure(&OtaError::ObserverStop);
                CycleOutcome::Stopped
            }
            Err(error) => {
                self.counters.record_session_failure();
                self.last_error = Some(error.clone());
                let _ = self.notify_failure(&error);
                // A zero budget still allows the one cycle that just ran.
                if self.counters.session >= self.config.timing.session_retries.max(1) {
                    log::error!(
                        "session retry budget exhausted after {} failed cycles",
                        self.counters.session
                    );
                    self.state = UpdateState::Exiting;
                    let event =
                        CallbackEvent::new(CallbackReason::StateChange, UpdateState::Exiting)
                            .with_error(error);
                    let _ = self.observer.on_event(&event);
                    return CycleOutcome::Failed(OtaError::SessionExhausted);
                }
                CycleOutcome::Failed(error)
            }
        }
    }

    fn drive_cycle(&mut self, cycle: &mut SessionIdentity) -> Result<(), OtaError> {
        let timing = self.config.timing.clone();
        let device = self.config.device.clone();
        let topics = self.config.topics.clone();
        let app_id = self.config.app_id;
        let cycle_deadline = Deadline::after(timing.active_window);

        self.transition(UpdateState::StartUpdate, Payload::default())?;
        let version = self.storage.app_info().map_err(OtaError::from)?;
        let unique_topic = topics.unique_topic(&cycle.unique_topic_suffix);

        if cycle.flow == UpdateFlow::Job {
            self.job_phase(cycle, &device, version, &topics, &unique_topic, &timing, &cycle_deadline)?;
        }

        let broker = cycle.broker.clone();
        let client_id = cycle.client_id.clone();
        self.connect_state(
            UpdateState::DataConnect,
            &broker,
            client_id.as_str(),
            &unique_topic,
            &cycle_deadline,
        )?;

        self.transition(UpdateState::StorageOpen, Payload::default())?;
        self.storage.open(app_id).map_err(OtaError::from)?;
        self.storage_open = true;

        self.download(cycle, &device, version, &topics, &unique_topic, &cycle_deadline)?;

        self.transition(UpdateState::StorageClose, Payload::default())?;
        self.storage.close().map_err(OtaError::from)?;
        self.storage_open = false;

        self.transition(UpdateState::DataDisconnect, Payload::default())?;
        self.connection.close();

        self.transition(UpdateState::Verify, Payload::default())?;
        if !self.storage.verify().map_err(OtaError::from)? {
            return Err(OtaError::Storage("image verification failed".to_string()));
        }

        if self.config.send_result {
            self.report_result(cycle, &topics, &unique_topic, UpdateOutcome::Success, &cycle_deadline)?;
        }

        self.state = UpdateState::OtaComplete;
        let event = CallbackEvent::new(CallbackReason::Success, UpdateState::OtaComplete);
        if self.observer.on_event(&event) == Decision::Stop {
            return Err(OtaError::ObserverStop);
        }
        log::info!("OTA image {} applied", version);
        Ok(())
    }

    /// Fetch and parse the job document, applying a redirect if the
    /// document points elsewhere.
    #[allow(clippy::too_many_arguments)]
    fn job_phase(
        &mut self,
        cycle: &mut SessionIdentity,
        device: &DeviceInfo,
        version: FirmwareVersion,
        topics: &TopicConfig,
        unique_topic: &str,
        timing: &TimingPolicy,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        let broker = cycle.broker.clone();
        let client_id = cycle.client_id.clone();
        self.connect_state(
            UpdateState::JobConnect,
            &broker,
            client_id.as_str(),
            unique_topic,
            cycle_deadline,
        )?;

        let request = DeviceMessage::update_availability(device, version, unique_topic).to_json();
        self.transition(
            UpdateState::JobDownload,
            Payload {
                topic: Some(unique_topic),
                doc: Some(&request),
                ..Default::default()
            },
        )?;
        self.connection.subscribe(unique_topic).map_err(OtaError::from)?;
        self.connection
            .publish(&topics.publisher_listen_topic(), request.as_bytes())
            .map_err(OtaError::from)?;
        let job_doc =
            self.wait_for_document(unique_topic, timing.job_check_timeout, cycle_deadline)?;

        self.transition(UpdateState::JobDisconnect, Payload::default())?;
        self.connection.close();

        self.transition(
            UpdateState::JobParse,
            Payload {
                doc: Some(&job_doc),
                ..Default::default()
            },
        )?;
        let job = JobDocument::parse(&job_doc)?;
        log::info!(
            "job offers version {} from {}:{}",
            job.available_version(),
            job.broker,
            job.port
        );

        if job.redirects_from(cycle) {
            let target = job.data_broker();
            self.transition(
                UpdateState::JobRedirect,
                Payload {
                    broker: Some(&target),
                    ..Default::default()
                },
            )?;
            cycle.broker = target;
        }
        Ok(())
    }

    /// Waits for a single JSON document on `topic`, bounded by both the
    /// document timeout and the cycle's active window.
    fn wait_for_document(
        &mut self,
        topic: &str,
        timeout: Duration,
        cycle_deadline: &Deadline,
    ) -> Result<String, OtaError> {
        let deadline = Deadline::after(timeout);
        loop {
            if deadline.expired() || cycle_deadline.expired() {
                return Err(OtaError::TransferTimeout);
            }
            let mut wait = RECEIVE_POLL;
            for bound in [&deadline, cycle_deadline] {
                if let Some(remaining) = bound.remaining() {
                    wait = wait.min(remaining);
                }
            }
            match self.connection.receive(wait).map_err(OtaError::from)? {
                Some(message) if message.topic == topic => {
                    return String::from_utf8(message.payload).map_err(|_| {
                        OtaError::MalformedDocument("document is not valid UTF-8".to_string())
                    });
                }
                Some(other) => {
                    log::debug!("ignoring message on unexpected topic '{}'", other.topic);
                }
                None => {}
            }
        }
    }

    /// Downloads the image, retrying whole attempts up to the download
    /// budget. Storage errors are never retried.
    fn download(
        &mut self,
        cycle: &SessionIdentity,
        device: &DeviceInfo,
        version: FirmwareVersion,
        topics: &TopicConfig,
        unique_topic: &str,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        let timing = self.config.timing.clone();
        let (subscribe_topic, request) = match cycle.flow {
            UpdateFlow::Job => (
                unique_topic.to_string(),
                DeviceMessage::request_update(device, version, unique_topic).to_json(),
            ),
            UpdateFlow::Direct => (
                topics.publisher_direct_topic(),
                DeviceMessage::direct_update(device, version).to_json(),
            ),
        };
        let publish_topic = topics.publisher_listen_topic();

        let attempts = timing.download_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.counters.download = attempt;
            match self.download_once(&subscribe_topic, &publish_topic, &request, &timing, cycle_deadline)
            {
                Ok(()) => return Ok(()),
                // Resuming a partial flash write is not safe; surface
                // storage errors without another attempt.
                Err(err @ (OtaError::ObserverStop | OtaError::Storage(_))) => return Err(err),
                Err(err) => {
                    if self.notify_failure(&err) == Decision::Stop {
                        return Err(OtaError::ObserverStop);
                    }
                    if attempt >= attempts || cycle_deadline.expired() {
                        return Err(err);
                    }
                    log::warn!(
                        "download attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        attempts,
                        err,
                        timing.retry_interval
                    );
                    thread::sleep(timing.retry_interval);
                }
            }
        }
    }

    fn download_once(
        &mut self,
        subscribe_topic: &str,
        publish_topic: &str,
        request: &str,
        timing: &TimingPolicy,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        self.progress = TransferProgress::default();
        self.transition(
            UpdateState::DataDownload,
            Payload {
                topic: Some(subscribe_topic),
                doc: Some(request),
                ..Default::default()
            },
        )?;
        self.connection.subscribe(subscribe_topic).map_err(OtaError::from)?;
        self.connection
            .publish(publish_topic, request.as_bytes())
            .map_err(OtaError::from)?;

        let data_deadline = Deadline::after(timing.data_check_timeout);
        let mut received: Vec<bool> = Vec::new();
        let mut expected: Option<(u32, u16)> = None;

        loop {
            if cycle_deadline.expired() || data_deadline.expired() {
                return Err(OtaError::TransferTimeout);
            }

            let mut wait = if timing.packet_interval.is_zero() {
                RECEIVE_POLL
            } else {
                timing.packet_interval
            };
            for deadline in [cycle_deadline, &data_deadline] {
                if let Some(remaining) = deadline.remaining() {
                    wait = wait.min(remaining);
                }
            }

            let message = match self.connection.receive(wait).map_err(OtaError::from)? {
                Some(message) => message,
                None => {
                    // A bounded inter-packet gap has now been exceeded;
                    // otherwise keep waiting against the deadlines.
                    if !timing.packet_interval.is_zero() {
                        return Err(OtaError::TransferTimeout);
                    }
                    continue;
                }
            };
            if message.topic != subscribe_topic {
                log::debug!("ignoring message on unexpected topic '{}'", message.topic);
                continue;
            }

            let (header, data) = ChunkHeader::parse(&message.payload)?;
            match expected {
                None => {
                    expected = Some((header.total_size, header.total_num_payloads));
                    self.progress = TransferProgress::start(header.total_size as u64);
                    received = vec![false; header.total_num_payloads as usize];
                    log::info!(
                        "downloading {} bytes in {} chunks",
                        header.total_size,
                        header.total_num_payloads
                    );
                }
                Some((total_size, payloads)) => {
                    if header.total_size != total_size || header.total_num_payloads != payloads {
                        return Err(OtaError::MalformedDocument(
                            "chunk header disagrees with the download in progress".to_string(),
                        ));
                    }
                }
            }

            self.storage
                .write(header.image_offset as u64, data)
                .map_err(OtaError::from)?;
            let index = header.this_payload_index as usize;
            if !received[index] {
                received[index] = true;
                self.progress.record(data.len() as u64);
            }
            let progress = self.progress;
            self.transition(
                UpdateState::StorageWrite,
                Payload {
                    progress: Some(progress),
                    ..Default::default()
                },
            )?;

            if received.iter().all(|landed| *landed) {
                return Ok(());
            }
        }
    }

    /// Publishes the cycle outcome. Best-effort: a result that cannot be
    /// delivered is logged, not treated as a failed cycle, since the
    /// image is already applied.
    fn report_result(
        &mut self,
        cycle: &SessionIdentity,
        topics: &TopicConfig,
        unique_topic: &str,
        outcome: UpdateOutcome,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        if cycle.broker != self.config.identity.broker {
            let broker = cycle.broker.clone();
            self.transition(
                UpdateState::ResultRedirect,
                Payload {
                    broker: Some(&broker),
                    ..Default::default()
                },
            )?;
        }
        match self.try_report(cycle, topics, unique_topic, outcome, cycle_deadline) {
            Ok(()) => Ok(()),
            Err(OtaError::ObserverStop) => Err(OtaError::ObserverStop),
            Err(err) => {
                log::warn!("result report failed: {}", err);
                self.connection.close();
                Ok(())
            }
        }
    }

    fn try_report(
        &mut self,
        cycle: &SessionIdentity,
        topics: &TopicConfig,
        unique_topic: &str,
        outcome: UpdateOutcome,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        let broker = cycle.broker.clone();
        let client_id = cycle.client_id.clone();
        self.connect_state(
            UpdateState::ResultConnect,
            &broker,
            client_id.as_str(),
            unique_topic,
            cycle_deadline,
        )?;

        let body = ResultMessage::new(outcome, unique_topic).to_json();
        self.transition(
            UpdateState::ResultSend,
            Payload {
                doc: Some(&body),
                ..Default::default()
            },
        )?;
        self.connection
            .publish(&topics.publisher_listen_topic(), body.as_bytes())
            .map_err(OtaError::from)?;

        self.transition(UpdateState::ResultResponse, Payload::default())?;
        let mut wait = self.config.timing.job_check_timeout;
        if let Some(remaining) = cycle_deadline.remaining() {
            wait = wait.min(remaining);
        }
        if !wait.is_zero() {
            // A publisher that never acknowledges is tolerated; the
            // result was already delivered to the broker.
            match self.connection.receive(wait) {
                Ok(Some(_)) => log::info!("result acknowledged"),
                Ok(None) => log::debug!("no result response within {:?}", wait),
                Err(err) => log::debug!("result response wait failed: {}", err),
            }
        }

        self.transition(UpdateState::ResultDisconnect, Payload::default())?;
        self.connection.close();
        Ok(())
    }

    /// Enters a connect state and opens the session with the connect
    /// retry budget, notifying the observer once per failed attempt.
    fn connect_state(
        &mut self,
        state: UpdateState,
        broker: &BrokerAddress,
        client_id: &str,
        unique_topic: &str,
        cycle_deadline: &Deadline,
    ) -> Result<(), OtaError> {
        self.transition(
            state,
            Payload {
                broker: Some(broker),
                topic: Some(unique_topic),
                ..Default::default()
            },
        )?;

        let credentials = self.config.credentials.clone();
        let connection = &mut self.connection;
        let observer = &mut self.observer;
        let counters = &mut self.counters;
        connection.open(
            broker,
            client_id,
            credentials.as_ref(),
            cycle_deadline,
            |attempt, err| {
                counters.connect = attempt;
                let event =
                    CallbackEvent::new(CallbackReason::Failure, state).with_error(err.clone());
                observer.on_event(&event)
            },
        )
    }

    /// Moves to `state` and delivers exactly one transition event. The
    /// observer can stop the cycle here, or veto connection parameters
    /// and parsed documents at the states that accept app decisions.
    fn transition(&mut self, state: UpdateState, payload: Payload<'_>) -> Result<(), OtaError> {
        self.state = state;
        let mut event = CallbackEvent::new(CallbackReason::StateChange, state);
        event.error = self.last_error.clone();
        event.broker = payload.broker;
        event.unique_topic = payload.topic;
        event.json_doc = payload.doc;
        event.progress = payload.progress;
        match self.observer.on_event(&event) {
            Decision::Stop => Err(OtaError::ObserverStop),
            Decision::AppFailure if state.accepts_app_decision() => {
                Err(if state.is_connect() {
                    OtaError::Connect("application rejected connection parameters".to_string())
                } else {
                    OtaError::MalformedDocument(
                        "application rejected the job document".to_string(),
                    )
                })
            }
            _ => Ok(()),
        }
    }

    fn notify_failure(&mut self, error: &OtaError) -> Decision {
        let event =
            CallbackEvent::new(CallbackReason::Failure, self.state).with_error(error.clone());
        self.observer.on_event(&event)
    }
}
