// Agent front end
//
// `OtaAgent` wraps the update machine for synchronous use; `spawn` moves
// it onto a named worker thread driven by the timing policy and a small
// command channel. The library never reboots or touches hardware itself;
// the exit reason tells the embedding application what to do next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;

use crate::config::AgentConfig;
use crate::error::OtaError;
use crate::observer::OtaObserver;
use crate::storage::OtaStorage;
use crate::transport::{NetworkInterface, Transport};

mod machine;
pub mod progress;
pub mod state;

pub use machine::CycleOutcome;
pub use progress::TransferProgress;
pub use state::UpdateState;

use machine::UpdateMachine;

enum AgentCommand {
    CheckNow,
    Stop,
}

/// Why a spawned agent thread finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// `stop` was called, or the observer returned `Stop`.
    Stopped,
    /// An update applied and the configuration asks for a reboot. The
    /// embedding application performs the reboot itself.
    RebootRequested,
    /// The session retry budget ran out.
    SessionExhausted,
}

/// One OTA update agent instance.
///
/// Construction validates the configuration; nothing touches the network
/// until `run_once` or the spawned thread's first scheduled check.
pub struct OtaAgent {
    machine: UpdateMachine,
    started: bool,
}

impl OtaAgent {
    pub fn new(
        config: AgentConfig,
        transport: Box<dyn Transport>,
        network: Box<dyn NetworkInterface>,
        storage: Box<dyn OtaStorage>,
        observer: Box<dyn OtaObserver>,
    ) -> Result<Self, OtaError> {
        config.validate()?;
        let mut machine = UpdateMachine::new(config, transport, network, storage, observer);
        // Confirm the running image right away so a freshly booted
        // update is not rolled back while the agent sits idle.
        if machine.config().validate_after_reboot {
            let app_id = machine.config().app_id;
            machine
                .storage_mut()
                .validate_image(app_id)
                .map_err(OtaError::from)?;
            log::info!("running image in slot {} confirmed", app_id);
        }
        Ok(Self {
            machine,
            started: false,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.machine.state()
    }

    pub fn last_error(&self) -> Option<&OtaError> {
        self.machine.last_error()
    }

    /// Runs exactly one check cycle, synchronously, on the caller's
    /// thread. The first call also performs agent start-up.
    pub fn run_once(&mut self) -> CycleOutcome {
        if let Err(err) = self.start_up() {
            return CycleOutcome::Failed(err);
        }
        self.machine.run_cycle()
    }

    /// Moves the agent onto its own worker thread.
    pub fn spawn(self) -> anyhow::Result<OtaAgentHandle> {
        let (commands, inbox) = mpsc::channel();
        let cycle_active = Arc::new(AtomicBool::new(false));
        let active = Arc::clone(&cycle_active);
        let thread = std::thread::Builder::new()
            .name("ota-agent".to_string())
            .spawn(move || self.run(inbox, active))
            .context("failed to spawn OTA agent thread")?;
        Ok(OtaAgentHandle {
            commands,
            cycle_active,
            thread: Some(thread),
        })
    }

    /// One-time start-up, the Initializing/AgentStarted transitions.
    fn start_up(&mut self) -> Result<(), OtaError> {
        if self.started {
            return Ok(());
        }
        self.machine.enter_started()?;
        self.started = true;
        Ok(())
    }

    fn run(mut self, inbox: Receiver<AgentCommand>, active: Arc<AtomicBool>) -> AgentExit {
        if let Err(err) = self.start_up() {
            log::error!("agent start-up failed: {}", err);
            self.machine.enter_exiting();
            return AgentExit::Stopped;
        }

        let timing = self.machine.config().timing.clone();
        let reboot_on_completion = self.machine.config().reboot_on_completion;
        let mut wait = timing.initial_check;
        loop {
            if self.machine.enter_waiting().is_err() {
                self.machine.enter_exiting();
                return AgentExit::Stopped;
            }
            match inbox.recv_timeout(wait) {
                Ok(AgentCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.machine.enter_exiting();
                    return AgentExit::Stopped;
                }
                // A queued check and an elapsed timer start the same cycle.
                Ok(AgentCommand::CheckNow) | Err(RecvTimeoutError::Timeout) => {}
            }

            active.store(true, Ordering::SeqCst);
            let outcome = self.machine.run_cycle();
            active.store(false, Ordering::SeqCst);

            match outcome {
                CycleOutcome::Applied => {
                    if reboot_on_completion {
                        log::info!("update applied, handing control back for reboot");
                        return AgentExit::RebootRequested;
                    }
                    wait = timing.check_interval;
                }
                CycleOutcome::Stopped => {
                    self.machine.enter_exiting();
                    return AgentExit::Stopped;
                }
                CycleOutcome::Failed(OtaError::SessionExhausted) => {
                    // The machine already entered Exiting.
                    return AgentExit::SessionExhausted;
                }
                CycleOutcome::Failed(err) => {
                    log::warn!("check cycle failed: {}, next attempt in {:?}", err, timing.retry_interval);
                    wait = timing.retry_interval;
                }
            }
        }
    }
}

/// Control handle for a spawned agent. Dropping the handle asks the
/// agent to stop but does not wait for it.
pub struct OtaAgentHandle {
    commands: Sender<AgentCommand>,
    cycle_active: Arc<AtomicBool>,
    thread: Option<JoinHandle<AgentExit>>,
}

impl OtaAgentHandle {
    /// Schedules a check cycle ahead of the timer. Rejected while a
    /// cycle is already in flight.
    pub fn check_now(&self) -> Result<(), OtaError> {
        if self.cycle_active.load(Ordering::SeqCst) {
            return Err(OtaError::AlreadyRunning);
        }
        if self.commands.send(AgentCommand::CheckNow).is_err() {
            log::warn!("check requested after the agent exited");
        }
        Ok(())
    }

    pub fn is_cycle_active(&self) -> bool {
        self.cycle_active.load(Ordering::SeqCst)
    }

    /// Asks the agent to stop after any in-flight cycle completes.
    pub fn stop(&self) {
        let _ = self.commands.send(AgentCommand::Stop);
    }

    /// Stops the agent and waits for the thread to finish.
    pub fn join(mut self) -> AgentExit {
        self.stop();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(exit) => exit,
                Err(_) => {
                    log::error!("OTA agent thread panicked");
                    AgentExit::Stopped
                }
            },
            None => AgentExit::Stopped,
        }
    }
}

impl Drop for OtaAgentHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}
