//! Finite state machine for one deployment run

use crate::models::task::TaskStatus;

/// Phase event driving a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Begin fetching the source resource
    Start,

    /// Source staged locally
    Downloaded,

    /// Content landed on the master; `has_slaves` selects SYNCING or
    /// EXECUTING next
    Uploaded { has_slaves: bool },

    /// Fan-out to slaves finished
    Synced,

    /// Every node ran its command list without error
    Completed,

    /// A phase failed
    Fail(String),

    /// Operator cancellation
    Cancel,
}

/// Run FSM
///
/// `IDLE → DOWNLOADING → UPLOADING → [SYNCING →] EXECUTING → SUCCESS`, with
/// a transition to `FAILED` from every non-terminal state. Terminal states
/// accept no events.
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: TaskStatus,
    error: Option<String>,
    cancelled: bool,
}

impl RunFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: TaskStatus::Idle,
            error: None,
            cancelled: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> TaskStatus {
        self.state
    }

    /// First failure recorded, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PhaseEvent) -> Result<TaskStatus, String> {
        let new_state = match (self.state, &event) {
            (TaskStatus::Idle, PhaseEvent::Start) => TaskStatus::Downloading,
            (TaskStatus::Downloading, PhaseEvent::Downloaded) => TaskStatus::Uploading,
            (TaskStatus::Uploading, PhaseEvent::Uploaded { has_slaves: true }) => TaskStatus::Syncing,
            (TaskStatus::Uploading, PhaseEvent::Uploaded { has_slaves: false }) => TaskStatus::Executing,
            (TaskStatus::Syncing, PhaseEvent::Synced) => TaskStatus::Executing,
            (TaskStatus::Executing, PhaseEvent::Completed) => TaskStatus::Success,

            (state, PhaseEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                TaskStatus::Failed
            }
            (state, PhaseEvent::Cancel) if !state.is_terminal() => {
                self.cancelled = true;
                self.error = Some("cancelled".to_string());
                TaskStatus::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_master_only_skips_syncing() {
        let mut fsm = RunFsm::new();
        fsm.process(PhaseEvent::Start).unwrap();
        fsm.process(PhaseEvent::Downloaded).unwrap();
        let next = fsm.process(PhaseEvent::Uploaded { has_slaves: false }).unwrap();
        assert_eq!(next, TaskStatus::Executing);
        assert_eq!(fsm.process(PhaseEvent::Completed).unwrap(), TaskStatus::Success);
    }

    #[test]
    fn test_fsm_terminal_is_final() {
        let mut fsm = RunFsm::new();
        fsm.process(PhaseEvent::Start).unwrap();
        fsm.process(PhaseEvent::Fail("svn: E170013".into())).unwrap();
        assert_eq!(fsm.state(), TaskStatus::Failed);

        assert!(fsm.process(PhaseEvent::Fail("second".into())).is_err());
        assert!(fsm.process(PhaseEvent::Downloaded).is_err());
        assert_eq!(fsm.error(), Some("svn: E170013"));
    }
}
