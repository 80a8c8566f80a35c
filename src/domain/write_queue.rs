//! Outgoing command serializer
//!
//! At most one write is ever in flight. The queue itself never talks to the
//! transport: it hands back the command to dispatch and the caller reports
//! the outcome through [`WriteQueue::complete`].

use crate::domain::command::Command;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Dispatching(Command),
}

/// What to do after a write completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Dispatch this command next
    Dispatch(Command),
    /// Nothing left to send
    Drained,
    /// Failure threshold reached, queue abandoned
    Saturated,
    /// No write was outstanding
    Unexpected,
}

#[derive(Debug)]
pub struct WriteQueue {
    pending: VecDeque<Command>,
    state: QueueState,
    failure_count: u32,
    max_failures: u32,
    enabled: bool,
}

impl WriteQueue {
    /// A new queue starts disabled until the session is ready
    pub fn new(max_failures: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            state: QueueState::Idle,
            failure_count: 0,
            max_failures: max_failures.max(1),
            enabled: false,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Drop everything and refuse further commands
    pub fn disable(&mut self) {
        self.enabled = false;
        self.pending.clear();
        self.state = QueueState::Idle;
        self.failure_count = 0;
    }

    /// Append a command
    ///
    /// Returns the command to dispatch right away when nothing was in
    /// flight. Commands offered to a disabled queue are dropped.
    pub fn enqueue(&mut self, command: Command) -> Option<Command> {
        if !self.enabled {
            return None;
        }
        self.pending.push_back(command);
        match self.state {
            QueueState::Idle => self.advance(),
            QueueState::Dispatching(_) => None,
        }
    }

    /// Record the outcome of the outstanding write
    pub fn complete(&mut self, success: bool) -> Completion {
        let QueueState::Dispatching(command) = self.state else {
            warn!("Write completion with no write in flight");
            return Completion::Unexpected;
        };
        self.state = QueueState::Idle;

        if success {
            self.failure_count = 0;
        } else {
            self.failure_count += 1;
            warn!(
                "Write of '{}' failed ({}/{})",
                command, self.failure_count, self.max_failures
            );
            if self.failure_count >= self.max_failures {
                self.pending.clear();
                self.failure_count = 0;
                return Completion::Saturated;
            }
        }

        match self.advance() {
            Some(next) => Completion::Dispatch(next),
            None => Completion::Drained,
        }
    }

    fn advance(&mut self) -> Option<Command> {
        let next = self.pending.pop_front()?;
        self.state = QueueState::Dispatching(next);
        Some(next)
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.state, QueueState::Dispatching(_))
    }

    pub fn in_flight(&self) -> Option<Command> {
        match self.state {
            QueueState::Dispatching(command) => Some(command),
            QueueState::Idle => None,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Commands waiting behind the in-flight write
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
