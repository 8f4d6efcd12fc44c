//! Task record: one submitted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TransitionError;
use super::{StorageLocation, TaskId, TaskStatus};

/// Metadata for one task.
///
/// Design:
/// - Fields are private; every mutation goes through a transition method that
///   checks the edge first and leaves the record untouched when it is illegal.
/// - `output_location` is `Some` iff `status == Finished`.
/// - `error_detail` is `Some` iff `status == Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    status: TaskStatus,
    progress: u8,
    input_location: Option<StorageLocation>,
    output_location: Option<StorageLocation>,
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh task in `Pending` with no input attached yet.
    pub fn new(id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            progress: 0,
            input_location: None,
            output_location: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn input_location(&self) -> Option<&StorageLocation> {
        self.input_location.as_ref()
    }

    pub fn output_location(&self) -> Option<&StorageLocation> {
        self.output_location.as_ref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record where the submitted artifact was persisted. Only once, only while `Pending`.
    pub fn attach_input(
        &mut self,
        location: StorageLocation,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Pending || self.input_location.is_some() {
            return Err(TransitionError::InputAlreadyAttached {
                task_id: self.id,
                status: self.status,
            });
        }
        self.input_location = Some(location);
        self.updated_at = now;
        Ok(())
    }

    /// Pending -> Processing.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(TaskStatus::Processing)?;
        if self.status == TaskStatus::Processing {
            return Err(self.illegal(TaskStatus::Processing));
        }
        self.status = TaskStatus::Processing;
        self.progress = 0;
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Processing with a new progress value.
    ///
    /// Values are clamped to 100. A value below the current progress is ignored so
    /// pollers never see progress go backwards. Returns whether the value was applied.
    pub fn set_progress(&mut self, percent: u8, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if self.status != TaskStatus::Processing {
            return Err(self.illegal(TaskStatus::Processing));
        }
        let percent = percent.min(100);
        if percent <= self.progress {
            return Ok(false);
        }
        self.progress = percent;
        self.updated_at = now;
        Ok(true)
    }

    /// Processing -> Finished.
    pub fn finish(
        &mut self,
        output: StorageLocation,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(TaskStatus::Finished)?;
        self.status = TaskStatus::Finished;
        self.progress = 100;
        self.output_location = Some(output);
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Error.
    pub fn fail(&mut self, detail: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(TaskStatus::Error)?;
        let detail = detail.into();
        self.status = TaskStatus::Error;
        self.error_detail = Some(if detail.trim().is_empty() {
            "unknown error".to_string()
        } else {
            detail
        });
        self.updated_at = now;
        Ok(())
    }

    fn check(&self, next: TaskStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(self.illegal(next))
        }
    }

    fn illegal(&self, to: TaskStatus) -> TransitionError {
        TransitionError::Illegal {
            task_id: self.id,
            from: self.status,
            to,
        }
    }
}
