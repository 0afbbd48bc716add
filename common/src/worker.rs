use serde::{Deserialize, Serialize};

use crate::task::{ComputeTaskDef, NodeId, SubtaskId};

/// Petición de subtarea que hace un proveedor sobre una tarea concreta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRequest {
    pub node_id: NodeId,
    /// Rendimiento declarado por el proveedor
    pub performance: f64,
    /// Máximo tamaño de recursos que acepta, en KiB
    pub max_resource_size: u64,
    /// Máxima memoria disponible, en KiB
    pub max_memory_size: u64,
    pub num_cores: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResponse {
    pub ctd: Option<ComputeTaskDef>,
}

/// Resultado calculado que el proveedor devuelve al dueño de la tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReport {
    pub node_id: NodeId,
    /// Cuerpo del resultado (para wordcount, CSV "palabra,conteo")
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAck {
    pub subtask_id: SubtaskId,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub subtask_id: SubtaskId,
    pub valid: bool,
}

/// Recursos que el proveedor ya tiene en disco.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceHeader {
    pub files: Vec<String>,
}

/// Recursos que le faltan al proveedor para calcular la tarea.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsDelayResponse {
    /// `None` cuando la tarea no usa retraso de aceptación
    pub delay: Option<f64>,
}
