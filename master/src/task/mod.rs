//! Contrato que una tarea concreta le ofrece al planificador.
//!
//! El `TaskManager` sólo conoce `Arc<dyn Task>`; el tipo concreto se elige
//! al crear la tarea. Los métodos toman `&self`, así que cada
//! implementación guarda su estado mutable detrás de su propio lock y puede
//! ejecutarse en el pool de hooks sin sacarla del registro.

pub mod wordcount;

use common::{ComputeTaskDef, ResourceDelta, ResourceHeader, TaskHeader, TaskState};
use serde_json::Value;

use crate::dirs::DirManager;

pub trait Task: Send + Sync {
    /// Cabecera inicial; el planificador se queda con una copia y la mantiene.
    fn header(&self) -> TaskHeader;

    fn initialize(&self, _dirs: &DirManager) -> anyhow::Result<()> {
        Ok(())
    }

    fn needs_computation(&self) -> bool;

    /// Reserva la siguiente unidad de trabajo para un proveedor.
    fn query_extra_data(&self, performance: f64, num_cores: u32) -> anyhow::Result<ComputeTaskDef>;

    fn verify_subtask(&self, subtask_id: &str) -> anyhow::Result<bool>;

    fn verify_task(&self) -> anyhow::Result<bool>;

    fn computation_finished(
        &self,
        subtask_id: &str,
        result: &str,
        dirs: &DirManager,
    ) -> anyhow::Result<()>;

    /// `computation_finished` volvió después de vencido su plazo y el
    /// planificador ya dio la subtarea por fallida: hay que olvidar lo que
    /// haya guardado. El trabajo sólo vuelve a la cola con `restart_subtask`.
    fn discard_result(&self, _subtask_id: &str) {}

    fn finished_computation(&self) -> bool;

    fn restart(&self);

    fn restart_subtask(&self, subtask_id: &str);

    fn abort(&self);

    /// La subtarea venció; la tarea puede volver a encolar su trabajo.
    fn subtask_failed(&self, subtask_id: &str, extra_data: &Value);

    fn progress(&self) -> f64;

    fn short_extra_data_repr(&self, performance: f64) -> String;

    fn prepare_resource_delta(&self, header: &ResourceHeader) -> anyhow::Result<ResourceDelta>;

    /// `None` si la tarea no usa retraso para aceptar resultados.
    fn accept_results_delay(&self) -> Option<f64> {
        None
    }

    fn total_subtasks(&self) -> usize;

    fn active_subtasks(&self) -> usize;

    fn subtasks_left(&self) -> usize;

    /// Permite a la tarea completar el estado que devuelve `query_task_state`.
    fn update_task_state(&self, _state: &mut TaskState) {}
}
