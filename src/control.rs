//! Operator control commands relayed from the viewer to the frame producer.
//!
//! Commands are fire-and-forget. Unknown command strings are ignored so that
//! newer viewers can talk to older daemons.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const START_SAVING: &str = "start_saving";
pub const STOP_SAVING: &str = "stop_saving";

/// Wire form of a control command: `{"command": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub command: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    StartSaving,
    StopSaving,
    Other(String),
}

impl ControlCommand {
    pub fn parse(command: &str) -> Self {
        match command.trim() {
            START_SAVING => ControlCommand::StartSaving,
            STOP_SAVING => ControlCommand::StopSaving,
            other => ControlCommand::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlCommand::StartSaving => START_SAVING,
            ControlCommand::StopSaving => STOP_SAVING,
            ControlCommand::Other(command) => command,
        }
    }

    pub fn to_message(&self) -> ControlMessage {
        ControlMessage {
            command: self.as_str().to_string(),
        }
    }
}

impl From<ControlMessage> for ControlCommand {
    fn from(message: ControlMessage) -> Self {
        ControlCommand::parse(&message.command)
    }
}

/// Shared "save full-resolution frames" switch.
///
/// Owned by the stream server's connection context and read by the stage that
/// decides whether to attach full-resolution images.
#[derive(Clone, Debug, Default)]
pub struct SaveFlag(Arc<AtomicBool>);

impl SaveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_saving(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, saving: bool) {
        self.0.store(saving, Ordering::SeqCst);
    }

    /// Apply a command. Returns false when the command is not recognised.
    pub fn apply(&self, command: &ControlCommand) -> bool {
        match command {
            ControlCommand::StartSaving => {
                self.set(true);
                true
            }
            ControlCommand::StopSaving => {
                self.set(false);
                true
            }
            ControlCommand::Other(_) => false,
        }
    }
}
