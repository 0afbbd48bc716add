use std::{collections::HashMap, sync::Arc, time::Instant};

use common::{
    LocalTaskStateSnapshot, ResourceDelta, ResourceHeader, SubtaskStatus, TaskId, TaskState,
    TaskStatus,
};
use tracing::{error, info};

use super::TaskManager;
use crate::error::{SchedulerError, SchedulerResult};
use crate::hooks::guarded;

/// Rendimiento de referencia para la descripción corta en los snapshots.
const PROGRESS_REPR_PERFORMANCE: f64 = 2200.0;

impl TaskManager {
    pub fn restart_task(&mut self, task_id: &str) -> SchedulerResult<()> {
        let entry = self.entry_mut(task_id)?;
        info!("reiniciando tarea {}", task_id);
        guarded(task_id, "restart", || entry.task.restart());
        entry.state.status = TaskStatus::Waiting;
        entry.state.time_started = Instant::now();

        self.registry.drop_subtasks(task_id);
        self.dirs.clear_temporary(task_id);
        self.events.task_updated(task_id);
        Ok(())
    }

    pub fn restart_subtask(&mut self, subtask_id: &str) -> SchedulerResult<()> {
        let (task_id, task) = match self.registry.resolve(subtask_id) {
            Ok((task_id, entry)) => (task_id.clone(), Arc::clone(&entry.task)),
            Err(e) => {
                error!("subtarea {} desconocida, no se reinicia", subtask_id);
                return Err(e);
            }
        };

        guarded(&task_id, "restart_subtask", || task.restart_subtask(subtask_id));
        self.registry.subtask_mut(&task_id, subtask_id)?.status = SubtaskStatus::Failure;
        self.entry_mut(&task_id)?.state.status = TaskStatus::Computing;

        self.events.task_updated(&task_id);
        self.events.subtask_updated(subtask_id);
        Ok(())
    }

    /// Aborta la tarea. Es final: sus subtareas dejan de existir y no
    /// vuelve a repartir trabajo.
    pub fn abort_task(&mut self, task_id: &str) -> SchedulerResult<()> {
        let entry = self.entry_mut(task_id)?;
        info!("abortando tarea {}", task_id);
        guarded(task_id, "abort", || entry.task.abort());
        entry.state.status = TaskStatus::Aborted;

        self.registry.drop_subtasks(task_id);
        self.events.task_updated(task_id);
        Ok(())
    }

    pub fn pause_task(&mut self, task_id: &str) -> SchedulerResult<()> {
        self.entry_mut(task_id)?.state.status = TaskStatus::Paused;
        self.events.task_updated(task_id);
        Ok(())
    }

    pub fn resume_task(&mut self, task_id: &str) -> SchedulerResult<()> {
        self.entry_mut(task_id)?.state.status = TaskStatus::Starting;
        self.events.task_updated(task_id);
        Ok(())
    }

    pub fn delete_task(&mut self, task_id: &str) -> SchedulerResult<()> {
        self.entry_mut(task_id)?;
        self.registry.remove(task_id);
        self.dirs.remove_task_dirs(task_id);
        info!("tarea {} eliminada", task_id);
        self.events.task_updated(task_id);
        Ok(())
    }

    /// Recalcula progreso y tiempos y devuelve una copia del estado.
    pub fn query_task_state(&mut self, task_id: &str) -> SchedulerResult<TaskState> {
        let entry = self.entry_mut(task_id)?;
        let state = &mut entry.state;

        state.progress = entry.task.progress();
        state.elapsed_time = state.time_started.elapsed().as_secs_f64();
        state.remaining_time = if state.progress > 0.0 {
            Some(state.elapsed_time / state.progress - state.elapsed_time)
        } else {
            None
        };
        entry.task.update_task_state(state);

        Ok(state.clone())
    }

    /// Cambia los plazos de la tarea. El TTL nuevo de subtarea se aplica
    /// también a las subtareas ya repartidas, no sólo a las futuras.
    pub fn change_timeouts(
        &mut self,
        task_id: &str,
        full_task_timeout: f64,
        subtask_timeout: f64,
        min_subtask_time: f64,
    ) -> SchedulerResult<()> {
        let entry = self.entry_mut(task_id)?;
        let now = Instant::now();

        entry.header.ttl = full_task_timeout;
        entry.header.subtask_timeout = subtask_timeout;
        entry.header.min_subtask_time = min_subtask_time;
        entry.header.last_checking = now;

        for ss in entry.state.subtask_states.values_mut() {
            ss.ttl = subtask_timeout;
            ss.last_checking = now;
        }

        info!(
            "plazos de {}: tarea {}s, subtarea {}s",
            task_id, full_task_timeout, subtask_timeout
        );
        self.events.task_updated(task_id);
        Ok(())
    }

    /// Avance de las tareas que todavía no terminaron.
    pub fn get_progresses(&self) -> HashMap<TaskId, LocalTaskStateSnapshot> {
        self.registry
            .entries()
            .filter_map(|entry| {
                let progress = entry.task.progress();
                if progress >= 1.0 {
                    return None;
                }
                let task_id = entry.header.task_id.clone();
                let snapshot = LocalTaskStateSnapshot {
                    task_id: task_id.clone(),
                    total_subtasks: entry.task.total_subtasks(),
                    active_subtasks: entry.task.active_subtasks(),
                    subtasks_left: entry.task.subtasks_left(),
                    progress,
                    description: entry.task.short_extra_data_repr(PROGRESS_REPR_PERFORMANCE),
                };
                Some((task_id, snapshot))
            })
            .collect()
    }

    pub fn prepare_resource(
        &mut self,
        task_id: &str,
        header: &ResourceHeader,
    ) -> SchedulerResult<ResourceDelta> {
        let entry = self.entry_mut(task_id)?;
        entry
            .task
            .prepare_resource_delta(header)
            .map_err(|e| SchedulerError::Hook {
                task_id: task_id.to_string(),
                hook: "prepare_resource_delta",
                reason: e.to_string(),
            })
    }

    pub fn accept_results_delay(&mut self, task_id: &str) -> SchedulerResult<Option<f64>> {
        Ok(self.entry_mut(task_id)?.task.accept_results_delay())
    }
}
