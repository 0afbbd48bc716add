use serde::{Deserialize, Serialize};

use crate::task::{TaskHeader, TaskId};

/// Alta de una tarea de wordcount sobre los archivos que hagan match con el glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    /// Patrón de archivos de entrada, ej: "/data/input/*.txt"
    pub input_glob: String,
    /// TTL de la tarea completa, en segundos
    pub timeout_secs: f64,
    /// TTL de cada subtarea, en segundos
    pub subtask_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub header: TaskHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeTimeoutsRequest {
    pub full_task_timeout: f64,
    pub subtask_timeout: f64,
    pub min_subtask_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
