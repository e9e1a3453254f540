// Update agent states
//
// The fixed set of states an update agent walks through. Declaration
// order matches the protocol's state numbering; execution order within a
// cycle is driven by the machine (job or direct flow).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateState {
    NotInitialized,
    Initializing,
    AgentStarted,
    /// Idle between checks, timer running.
    AgentWaiting,
    StartUpdate,
    JobConnect,
    JobDownload,
    JobDisconnect,
    JobParse,
    JobRedirect,
    DataConnect,
    DataDownload,
    DataDisconnect,
    Verify,
    StorageOpen,
    StorageWrite,
    StorageClose,
    ResultConnect,
    ResultSend,
    ResultResponse,
    ResultDisconnect,
    ResultRedirect,
    OtaComplete,
    /// Terminal. Requires an external restart.
    Exiting,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateState::NotInitialized => "Not Initialized",
            UpdateState::Initializing => "Initializing",
            UpdateState::AgentStarted => "Agent Started",
            UpdateState::AgentWaiting => "Agent Waiting",
            UpdateState::StartUpdate => "Start Update",
            UpdateState::JobConnect => "Job Connect",
            UpdateState::JobDownload => "Job Download",
            UpdateState::JobDisconnect => "Job Disconnect",
            UpdateState::JobParse => "Job Parse",
            UpdateState::JobRedirect => "Job Redirect",
            UpdateState::DataConnect => "Data Connect",
            UpdateState::DataDownload => "Data Download",
            UpdateState::DataDisconnect => "Data Disconnect",
            UpdateState::Verify => "Verify",
            UpdateState::StorageOpen => "Storage Open",
            UpdateState::StorageWrite => "Storage Write",
            UpdateState::StorageClose => "Storage Close",
            UpdateState::ResultConnect => "Result Connect",
            UpdateState::ResultSend => "Result Send",
            UpdateState::ResultResponse => "Result Response",
            UpdateState::ResultDisconnect => "Result Disconnect",
            UpdateState::ResultRedirect => "Result Redirect",
            UpdateState::OtaComplete => "OTA Complete",
            UpdateState::Exiting => "Exiting",
        }
    }

    /// States where the observer's decision may veto connection
    /// parameters or a parsed document before they are used.
    pub fn accepts_app_decision(self) -> bool {
        matches!(
            self,
            UpdateState::JobConnect
                | UpdateState::DataConnect
                | UpdateState::ResultConnect
                | UpdateState::JobParse
        )
    }

    pub fn is_connect(self) -> bool {
        matches!(
            self,
            UpdateState::JobConnect | UpdateState::DataConnect | UpdateState::ResultConnect
        )
    }
}
