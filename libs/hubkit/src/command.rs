//! Asynchronous command tracking.
//!
//! Every submitted command is a small state machine:
//!
//! ```text
//! Pending ──► Accepted ──► { Completed | Failed | Cancelled }
//!    └──────► Rejected
//! ```
//!
//! Terminal states (Completed, Failed, Rejected, Cancelled) admit no further
//! transition. Each transition produces a fresh status record that links back
//! to its predecessor, so the full audit trail of a command's progress stays
//! queryable.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type CommandId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Failed,
    Cancelled,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Rejected
                | CommandState::Completed
                | CommandState::Failed
                | CommandState::Cancelled
        )
    }
}

/// One link in a command's status chain.
#[derive(Clone, Debug)]
pub struct CommandStatus {
    pub id: CommandId,
    /// Module id the command targets.
    pub target: String,
    pub state: CommandState,
    pub sub_code: Option<String>,
    pub message: Option<String>,
    pub update_time: DateTime<Utc>,
    /// The immediately preceding status, if any.
    pub previous: Option<Arc<CommandStatus>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid command transition: {attempted} from {from:?}")]
    InvalidTransition {
        from: CommandState,
        attempted: &'static str,
    },
    #[error("unknown command id {id}")]
    UnknownCommand { id: CommandId },
}

struct CommandEntry {
    status: Arc<CommandStatus>,
    payload: serde_json::Value,
}

/// Tracks command records for any module exposing controllable actions.
///
/// Mutation is performed only by the module handling the command; records are
/// retained until explicitly cleared by the caller.
#[derive(Default)]
pub struct CommandTracker {
    commands: DashMap<CommandId, CommandEntry>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending record for a command aimed at `target`.
    pub fn submit(&self, target: impl Into<String>, payload: serde_json::Value) -> CommandId {
        let id = Uuid::now_v7();
        let status = Arc::new(CommandStatus {
            id,
            target: target.into(),
            state: CommandState::Pending,
            sub_code: None,
            message: None,
            update_time: Utc::now(),
            previous: None,
        });
        self.commands.insert(id, CommandEntry { status, payload });
        id
    }

    /// Latest status of a command, if known.
    pub fn status(&self, id: CommandId) -> Option<Arc<CommandStatus>> {
        self.commands.get(&id).map(|e| e.status.clone())
    }

    /// Payload as submitted (consumed by the handling module).
    pub fn payload(&self, id: CommandId) -> Option<serde_json::Value> {
        self.commands.get(&id).map(|e| e.payload.clone())
    }

    /// Full audit trail in chronological order (oldest first).
    pub fn history(&self, id: CommandId) -> Vec<Arc<CommandStatus>> {
        let Some(entry) = self.commands.get(&id) else {
            return Vec::new();
        };
        let mut chain = Vec::new();
        let mut cursor = Some(entry.status.clone());
        while let Some(status) = cursor {
            cursor = status.previous.clone();
            chain.push(status);
        }
        chain.reverse();
        chain
    }

    /// Drop a command record; returns whether it existed.
    pub fn clear(&self, id: CommandId) -> bool {
        self.commands.remove(&id).is_some()
    }

    /// # Errors
    /// `InvalidTransition` unless the command is Pending.
    pub fn accept(&self, id: CommandId) -> Result<Arc<CommandStatus>, CommandError> {
        self.transition(id, "accept", &[CommandState::Pending], CommandState::Accepted, None, None)
    }

    /// # Errors
    /// `InvalidTransition` unless the command is Pending.
    pub fn reject(
        &self,
        id: CommandId,
        message: Option<String>,
    ) -> Result<Arc<CommandStatus>, CommandError> {
        self.transition(id, "reject", &[CommandState::Pending], CommandState::Rejected, None, message)
    }

    /// # Errors
    /// `InvalidTransition` unless the command is Accepted.
    pub fn complete(
        &self,
        id: CommandId,
        message: Option<String>,
    ) -> Result<Arc<CommandStatus>, CommandError> {
        self.transition(id, "complete", &[CommandState::Accepted], CommandState::Completed, None, message)
    }

    /// # Errors
    /// `InvalidTransition` unless the command is Accepted.
    pub fn fail(
        &self,
        id: CommandId,
        sub_code: Option<String>,
        message: Option<String>,
    ) -> Result<Arc<CommandStatus>, CommandError> {
        self.transition(id, "fail", &[CommandState::Accepted], CommandState::Failed, sub_code, message)
    }

    /// # Errors
    /// `InvalidTransition` unless the command is Accepted.
    pub fn cancel(&self, id: CommandId) -> Result<Arc<CommandStatus>, CommandError> {
        self.transition(id, "cancel", &[CommandState::Accepted], CommandState::Cancelled, None, None)
    }

    fn transition(
        &self,
        id: CommandId,
        attempted: &'static str,
        allowed_from: &[CommandState],
        next: CommandState,
        sub_code: Option<String>,
        message: Option<String>,
    ) -> Result<Arc<CommandStatus>, CommandError> {
        let mut entry = self
            .commands
            .get_mut(&id)
            .ok_or(CommandError::UnknownCommand { id })?;

        let current = entry.status.state;
        if !allowed_from.contains(&current) {
            return Err(CommandError::InvalidTransition {
                from: current,
                attempted,
            });
        }

        let status = Arc::new(CommandStatus {
            id,
            target: entry.status.target.clone(),
            state: next,
            sub_code,
            message,
            update_time: Utc::now(),
            previous: Some(entry.status.clone()),
        });
        entry.status = status.clone();
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepted_command_completes() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({"action": "set_rate", "hz": 5}));

        tracker.accept(id).unwrap();
        let done = tracker.complete(id, Some("rate applied".to_owned())).unwrap();

        assert_eq!(done.state, CommandState::Completed);
        assert_eq!(done.target, "sensor1");
    }

    #[test]
    fn terminal_state_rejects_further_transitions() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({}));
        tracker.accept(id).unwrap();
        tracker.complete(id, None).unwrap();

        let err = tracker.fail(id, None, None).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidTransition { from: CommandState::Completed, attempted: "fail" }
        ));
        // Record unchanged by the failed attempt.
        assert_eq!(tracker.status(id).unwrap().state, CommandState::Completed);
    }

    #[test]
    fn complete_requires_prior_accept() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({}));
        let err = tracker.complete(id, None).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidTransition { from: CommandState::Pending, .. }
        ));
    }

    #[test]
    fn history_is_chronological() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({}));
        tracker.accept(id).unwrap();
        tracker.complete(id, None).unwrap();

        let states: Vec<_> = tracker.history(id).iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            [CommandState::Pending, CommandState::Accepted, CommandState::Completed]
        );
        for pair in tracker.history(id).windows(2) {
            assert!(pair[0].update_time <= pair[1].update_time);
        }
    }

    #[test]
    fn reject_is_terminal() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({}));
        tracker.reject(id, Some("unsupported".to_owned())).unwrap();
        assert!(tracker.accept(id).is_err());
        assert_eq!(tracker.status(id).unwrap().state, CommandState::Rejected);
    }

    #[test]
    fn unknown_command_is_reported() {
        let tracker = CommandTracker::new();
        let ghost = Uuid::now_v7();
        assert!(matches!(
            tracker.accept(ghost),
            Err(CommandError::UnknownCommand { .. })
        ));
        assert!(tracker.history(ghost).is_empty());
    }

    #[test]
    fn clear_drops_record() {
        let tracker = CommandTracker::new();
        let id = tracker.submit("sensor1", json!({}));
        assert!(tracker.clear(id));
        assert!(!tracker.clear(id));
        assert!(tracker.status(id).is_none());
    }
}
