use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorBody, SubtaskId, SubtaskStatus, TaskId};
use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} is not one of my tasks")]
    TaskNotFound(TaskId),

    #[error("subtask {0} is not one of my subtasks")]
    SubtaskNotFound(SubtaskId),

    #[error("task {0} already registered")]
    DuplicateTask(TaskId),

    /// Resultado duplicado o tardío: la subtarea ya no está en `Starting`.
    #[error("subtask {subtask_id} is {status:?}, result rejected")]
    StaleState {
        subtask_id: SubtaskId,
        status: SubtaskStatus,
    },

    #[error("verification of subtask {0} failed")]
    VerificationFailed(SubtaskId),

    #[error("task {task_id}: hook {hook} failed: {reason}")]
    Hook {
        task_id: TaskId,
        hook: &'static str,
        reason: String,
    },

    #[error("internal inconsistency: {0}")]
    Inconsistent(String),
}

impl SchedulerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SchedulerError::TaskNotFound(_) | SchedulerError::SubtaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::DuplicateTask(_) | SchedulerError::StaleState { .. } => {
                StatusCode::CONFLICT
            }
            SchedulerError::VerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SchedulerError::Hook { .. } | SchedulerError::Inconsistent(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (self.status_code(), body).into_response()
    }
}
