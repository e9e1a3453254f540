// Connection manager: one logical broker session at a time, with the
// connect retry budget applied here so every *Connect state behaves the
// same way.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::{BrokerAddress, TimingPolicy, TlsCredentials};
use crate::error::OtaError;
use crate::observer::Decision;
use crate::transport::{InboundMessage, NetworkInterface, Transport, TransportError};

/// Wall-clock deadline computed at state/cycle entry. A zero window
/// means the deadline is disabled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(window: Duration) -> Self {
        if window.is_zero() {
            Self(None)
        } else {
            Self(Some(Instant::now() + window))
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    network: Box<dyn NetworkInterface>,
    connect_retries: u32,
    retry_interval: Duration,
    /// Connect/disconnect call balance, used to guarantee sessions are
    /// released on every exit path.
    open: bool,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn Transport>,
        network: Box<dyn NetworkInterface>,
        timing: &TimingPolicy,
    ) -> Self {
        Self {
            transport,
            network,
            connect_retries: timing.connect_retries,
            retry_interval: timing.retry_interval,
            open: false,
        }
    }

    /// Opens a session, retrying up to the connect budget with the fixed
    /// retry interval between attempts. `give_up_at` caps the whole
    /// retry loop; when it expires the open fails with
    /// `TransferTimeout`. `on_attempt_failure` is invoked after each
    /// failed attempt; returning `Decision::Stop` aborts the remaining
    /// attempts with `ObserverStop`.
    pub(crate) fn open(
        &mut self,
        broker: &BrokerAddress,
        client_id: &str,
        credentials: Option<&TlsCredentials>,
        give_up_at: &Deadline,
        mut on_attempt_failure: impl FnMut(u32, &OtaError) -> Decision,
    ) -> Result<(), OtaError> {
        if self.open {
            self.close();
        }
        // One initial attempt plus `connect_retries` retries.
        let attempts = self.connect_retries + 1;
        let mut last_error = OtaError::Connect("no connect attempt made".to_string());
        for attempt in 1..=attempts {
            if give_up_at.expired() {
                return Err(OtaError::TransferTimeout);
            }
            if !self.network.is_up() {
                last_error = OtaError::Connect("network interface is down".to_string());
            } else {
                match self.transport.connect(broker, client_id, credentials) {
                    Ok(()) => {
                        log::info!(
                            "connected to {}:{} on attempt {}/{}",
                            broker.host,
                            broker.port,
                            attempt,
                            attempts
                        );
                        self.open = true;
                        return Ok(());
                    }
                    Err(e) => last_error = e.into(),
                }
            }

            log::warn!(
                "connect to {}:{} failed (attempt {}/{}): {}",
                broker.host,
                broker.port,
                attempt,
                attempts,
                last_error
            );
            if on_attempt_failure(attempt, &last_error) == Decision::Stop {
                return Err(OtaError::ObserverStop);
            }
            if attempt < attempts {
                thread::sleep(self.retry_interval);
            }
        }
        Err(last_error)
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.open {
            self.transport.disconnect();
            self.open = false;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.transport.subscribe(topic)
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.transport.publish(topic, payload)
    }

    pub fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.transport.receive(timeout)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
