use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TaskId = String;
pub type SubtaskId = String;
pub type NodeId = String;

/// Genera un id nuevo para tareas y subtareas.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Starting,
    Computing,
    Finished,
    Aborted,
    Paused,
}

impl TaskStatus {
    /// Sólo las tareas activas reparten subtareas y envejecen su TTL.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Computing | TaskStatus::Starting | TaskStatus::Waiting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Starting,
    Finished,
    Failure,
}

/// Cabecera pública de una tarea: lo que ve un proveedor antes de pedir trabajo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHeader {
    pub task_id: TaskId,
    pub owner_address: String,
    pub owner_port: u16,

    /// Tamaño de los recursos de entrada, en bytes
    pub resource_size: u64,
    /// Memoria estimada para una subtarea, en bytes
    pub estimated_memory: u64,

    /// TTL restante de la tarea completa, en segundos
    pub ttl: f64,
    #[serde(skip, default = "Instant::now")]
    pub last_checking: Instant,

    /// TTL inicial de cada subtarea, en segundos
    pub subtask_timeout: f64,
    /// Tiempo mínimo esperado de cómputo de una subtarea, en segundos
    pub min_subtask_time: f64,
}

impl TaskHeader {
    pub fn new(task_id: TaskId, ttl: f64, subtask_timeout: f64) -> Self {
        Self {
            task_id,
            owner_address: String::new(),
            owner_port: 0,
            resource_size: 0,
            estimated_memory: 0,
            ttl,
            last_checking: Instant::now(),
            subtask_timeout,
            min_subtask_time: 0.0,
        }
    }
}

/// Definición de una subtarea tal como se entrega al proveedor (ctd).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeTaskDef {
    pub subtask_id: SubtaskId,
    pub task_id: TaskId,
    pub performance: f64,
    pub extra_data: Value,
    pub short_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputerState {
    pub node_id: NodeId,
    pub performance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskState {
    pub subtask_id: SubtaskId,
    pub status: SubtaskStatus,
    pub computer: ComputerState,
    pub started_at: DateTime<Utc>,

    /// TTL restante en segundos
    pub ttl: f64,
    #[serde(skip, default = "Instant::now")]
    pub last_checking: Instant,

    pub progress: f64,
    pub remaining_time: f64,

    /// Datos opacos necesarios para reintentar la subtarea
    pub extra_data: Value,
    pub description: String,
}

impl SubtaskState {
    pub fn starting(node_id: &str, ctd: &ComputeTaskDef, ttl: f64) -> Self {
        Self {
            subtask_id: ctd.subtask_id.clone(),
            status: SubtaskStatus::Starting,
            computer: ComputerState {
                node_id: node_id.to_string(),
                performance: ctd.performance,
            },
            started_at: Utc::now(),
            ttl,
            last_checking: Instant::now(),
            progress: 0.0,
            remaining_time: 0.0,
            extra_data: ctd.extra_data.clone(),
            description: ctd.short_description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip, default = "Instant::now")]
    pub time_started: Instant,

    /// Segundos desde que arrancó (o se reinició) la tarea
    pub elapsed_time: f64,
    /// `None` mientras no hay progreso con el que estimar
    pub remaining_time: Option<f64>,
    pub progress: f64,

    pub subtask_states: HashMap<SubtaskId, SubtaskState>,
}

impl TaskState {
    pub fn waiting() -> Self {
        Self {
            status: TaskStatus::Waiting,
            started_at: Utc::now(),
            time_started: Instant::now(),
            elapsed_time: 0.0,
            remaining_time: None,
            progress: 0.0,
            subtask_states: HashMap::new(),
        }
    }
}

/// Foto del avance de una tarea local todavía incompleta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTaskStateSnapshot {
    pub task_id: TaskId,
    pub total_subtasks: usize,
    pub active_subtasks: usize,
    pub subtasks_left: usize,
    pub progress: f64,
    pub description: String,
}
