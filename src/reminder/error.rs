use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::ReminderStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    NotFound(Ulid),
    InPast(NaiveDateTime),
    InvalidTransition {
        id: Ulid,
        from: ReminderStatus,
        to: ReminderStatus,
    },
}

impl std::fmt::Display for ReminderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderError::NotFound(id) => write!(f, "reminder not found: {id}"),
            ReminderError::InPast(at) => write!(f, "cannot schedule a reminder in the past: {at}"),
            ReminderError::InvalidTransition { id, from, to } => {
                write!(f, "reminder {id} cannot go from {from:?} to {to:?}")
            }
        }
    }
}

impl std::error::Error for ReminderError {}
