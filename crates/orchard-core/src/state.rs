use crate::errors::StateError;
use crate::model::{Task, TaskState};
use chrono::{DateTime, Utc};

/// Legal moves of the task lifecycle. Terminal states have no outgoing edges.
pub fn can_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    match (from, to) {
        (Created, Created) | (Running, Running) => true,
        (Created, Running | Failure | Canceled) => true,
        (Running, Completed | Failure | Canceled | Timeout) => true,
        _ => false,
    }
}

impl Task {
    pub fn transition(&mut self, to: TaskState, now: DateTime<Utc>) -> Result<(), StateError> {
        if !can_transition(self.state, to) {
            return Err(StateError::IllegalTransition {
                guid: self.guid.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated = now;
        if to.is_terminal() {
            self.completed = Some(now);
        }
        Ok(())
    }

    /// Moves to `to` unless the task already reached a terminal state.
    /// Returns whether the state changed.
    pub fn settle(&mut self, to: TaskState, now: DateTime<Utc>) -> Result<bool, StateError> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        self.transition(to, now)?;
        Ok(true)
    }

    pub fn set_job_id(&mut self, job_id: &str) -> Result<(), StateError> {
        if let Some(existing) = &self.job_id {
            return Err(StateError::JobIdAlreadySet {
                guid: self.guid.clone(),
                existing: existing.clone(),
            });
        }
        self.job_id = Some(job_id.to_string());
        Ok(())
    }
}
