//! Held-control repeater
//!
//! Tracks which command is held and which timer owns its next re-emission.
//! Scheduling itself is done by the session controller.

use crate::domain::command::Command;
use crate::domain::session::TimerId;

const START_LABEL: &str = "Start";
const STOP_LABEL: &str = "Stop";

/// Result of letting go of the control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub command: Command,
    /// Timer that must be cancelled
    pub timer: Option<TimerId>,
}

#[derive(Debug, Default)]
pub struct CommandRepeater {
    active: Option<Command>,
    timer: Option<TimerId>,
    running: bool,
}

impl CommandRepeater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start repeating `command`
    ///
    /// Returns `false` when another command is already held; the new press
    /// is ignored.
    pub fn press(&mut self, command: Command) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(command);
        self.timer = None;
        true
    }

    /// Register the timer that will fire the next re-emission
    pub fn arm(&mut self, timer: TimerId) {
        if self.active.is_some() {
            self.timer = Some(timer);
        }
    }

    /// Whether `timer` should re-emit `command`
    pub fn should_fire(&self, timer: TimerId, command: Command) -> bool {
        self.timer == Some(timer) && self.active == Some(command)
    }

    /// Stop repeating, whichever command was held
    pub fn release(&mut self) -> Option<Released> {
        let command = self.active.take()?;
        Some(Released {
            command,
            timer: self.timer.take(),
        })
    }

    pub fn active(&self) -> Option<Command> {
        self.active
    }

    /// Flip the start/stop state and return the new caption
    pub fn toggle_start_stop(&mut self) -> &'static str {
        self.running = !self.running;
        self.start_stop_label()
    }

    pub fn start_stop_label(&self) -> &'static str {
        if self.running {
            STOP_LABEL
        } else {
            START_LABEL
        }
    }
}
