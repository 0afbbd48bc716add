use std::sync::Arc;

use common::{SubtaskStatus, TaskStatus};
use tracing::{debug, error, info, warn};

use super::TaskManager;
use crate::error::{SchedulerError, SchedulerResult};

impl TaskManager {
    /// Procesa el resultado de una subtarea.
    ///
    /// Sólo una subtarea en `Starting` acepta resultado; cualquier otro
    /// estado es un reporte duplicado o tardío y se rechaza sin tocar nada.
    /// Un hook de verificación que falla, entra en pánico o vence el plazo
    /// cuenta como verificación fallida.
    pub async fn computed_task_received(
        &mut self,
        subtask_id: &str,
        result: String,
    ) -> SchedulerResult<()> {
        let (task_id, task, status) = match self.registry.resolve(subtask_id) {
            Ok((task_id, entry)) => (
                task_id.clone(),
                Arc::clone(&entry.task),
                entry.state.subtask_states[subtask_id].status,
            ),
            Err(e) => {
                error!("la subtarea {} no es mía", subtask_id);
                return Err(e);
            }
        };

        if status != SubtaskStatus::Starting {
            warn!(
                "resultado para la subtarea {} con estado {:?}",
                subtask_id, status
            );
            self.events.task_updated(&task_id);
            return Err(SchedulerError::StaleState {
                subtask_id: subtask_id.to_string(),
                status,
            });
        }

        let finished = {
            let task = Arc::clone(&task);
            let dirs = self.dirs.clone();
            let late_task = Arc::clone(&task);
            let sid = subtask_id.to_string();
            let late_sid = sid.clone();
            // un resultado guardado después del plazo no debe contar
            self.hooks
                .run_or_recover(
                    move || task.computation_finished(&sid, &result, &dirs),
                    move |()| {
                        warn!("computation_finished de {} terminó tarde", late_sid);
                        late_task.discard_result(&late_sid);
                    },
                )
                .await
        };

        {
            let ss = self.registry.subtask_mut(&task_id, subtask_id)?;
            ss.progress = 1.0;
            ss.remaining_time = 0.0;
            ss.status = SubtaskStatus::Finished;
        }

        let accepted = match finished {
            Ok(()) => {
                let task = Arc::clone(&task);
                let sid = subtask_id.to_string();
                match self.hooks.run(move || task.verify_subtask(&sid)).await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!("verify_subtask de {} falló: {}", subtask_id, e);
                        false
                    }
                }
            }
            Err(e) => {
                warn!("computation_finished de {} falló: {}", subtask_id, e);
                false
            }
        };

        if !accepted {
            debug!("subtarea {} no aceptada", subtask_id);
            self.registry.subtask_mut(&task_id, subtask_id)?.status = SubtaskStatus::Failure;
            self.events.task_updated(&task_id);
            self.events.subtask_updated(subtask_id);
            return Err(SchedulerError::VerificationFailed(subtask_id.to_string()));
        }

        let still_active = self
            .registry
            .get(&task_id)
            .map(|e| e.state.status.is_active())
            .unwrap_or(false);

        if still_active {
            let next_status = if !task.finished_computation() {
                Some(TaskStatus::Computing)
            } else {
                let verifier = Arc::clone(&task);
                match self.hooks.run(move || verifier.verify_task()).await {
                    Ok(true) => {
                        info!("tarea {} aceptada", task_id);
                        Some(TaskStatus::Finished)
                    }
                    Ok(false) => {
                        info!("tarea {} no aceptada", task_id);
                        None
                    }
                    Err(e) => {
                        warn!("verify_task de {} falló: {}", task_id, e);
                        None
                    }
                }
            };

            if let (Some(status), Some(entry)) = (next_status, self.registry.get_mut(&task_id)) {
                entry.state.status = status;
            }
        }

        self.events.task_updated(&task_id);
        self.events.subtask_updated(subtask_id);
        Ok(())
    }

    /// Consulta la verificación de la tarea dueña sin modificar estado.
    /// `false` si la subtarea es desconocida o el hook falla.
    pub async fn verify_subtask(&self, subtask_id: &str) -> bool {
        let task = match self.registry.resolve(subtask_id) {
            Ok((_, entry)) => Arc::clone(&entry.task),
            Err(_) => return false,
        };
        let sid = subtask_id.to_string();
        match self.hooks.run(move || task.verify_subtask(&sid)).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("verify_subtask de {} falló: {}", subtask_id, e);
                false
            }
        }
    }
}
