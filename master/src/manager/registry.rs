use std::{collections::HashMap, sync::Arc};

use common::{ComputeTaskDef, SubtaskId, SubtaskState, TaskHeader, TaskId, TaskState};
use tracing::error;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::Task;

/// Todo lo que el planificador sabe de una tarea.
pub struct TaskEntry {
    pub task: Arc<dyn Task>,
    pub header: TaskHeader,
    pub state: TaskState,
}

/// Tareas registradas + índice inverso subtarea → tarea.
///
/// Invariante: cada entrada de `subtask_index` apunta a una tarea presente
/// en `tasks` y tiene su `SubtaskState` en esa tarea. Sólo los métodos de
/// este tipo tocan ambos mapas, y siempre juntos.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskEntry>,
    subtask_index: HashMap<SubtaskId, TaskId>,
}

impl TaskRegistry {
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskEntry> {
        self.tasks.get(task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskEntry> {
        self.tasks.get_mut(task_id)
    }

    pub fn insert(&mut self, entry: TaskEntry) {
        self.tasks.insert(entry.header.task_id.clone(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &TaskEntry> + '_ {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().cloned().collect()
    }

    pub fn owner_of(&self, subtask_id: &str) -> Option<&TaskId> {
        self.subtask_index.get(subtask_id)
    }

    /// Registra una subtarea recién repartida con el TTL de subtarea de su tarea.
    pub fn add_subtask(&mut self, node_id: &str, ctd: &ComputeTaskDef) -> SchedulerResult<()> {
        if self.subtask_index.contains_key(&ctd.subtask_id) {
            return Err(inconsistent(format!(
                "subtask id {} issued twice",
                ctd.subtask_id
            )));
        }
        let entry = self.tasks.get_mut(&ctd.task_id).ok_or_else(|| {
            inconsistent(format!(
                "ctd {} names unknown task {}",
                ctd.subtask_id, ctd.task_id
            ))
        })?;

        let ss = SubtaskState::starting(node_id, ctd, entry.header.subtask_timeout);
        entry.state.subtask_states.insert(ctd.subtask_id.clone(), ss);
        self.subtask_index
            .insert(ctd.subtask_id.clone(), ctd.task_id.clone());
        Ok(())
    }

    /// Resuelve una subtarea a su tarea. Un índice que apunta a algo que ya
    /// no existe se loguea como inconsistencia y se trata como desconocida.
    pub fn resolve(&self, subtask_id: &str) -> SchedulerResult<(&TaskId, &TaskEntry)> {
        let task_id = self
            .subtask_index
            .get(subtask_id)
            .ok_or_else(|| SchedulerError::SubtaskNotFound(subtask_id.to_string()))?;

        match self.tasks.get(task_id) {
            Some(entry) if entry.state.subtask_states.contains_key(subtask_id) => {
                Ok((task_id, entry))
            }
            _ => {
                let _ = inconsistent(format!(
                    "subtask {subtask_id} indexed under {task_id} but not tracked there"
                ));
                Err(SchedulerError::SubtaskNotFound(subtask_id.to_string()))
            }
        }
    }

    pub fn subtask_mut(&mut self, task_id: &str, subtask_id: &str) -> SchedulerResult<&mut SubtaskState> {
        self.tasks
            .get_mut(task_id)
            .and_then(|e| e.state.subtask_states.get_mut(subtask_id))
            .ok_or_else(|| inconsistent(format!("subtask {subtask_id} vanished from {task_id}")))
    }

    /// Olvida todas las subtareas de la tarea: índice y estados a la vez.
    pub fn drop_subtasks(&mut self, task_id: &str) {
        if let Some(entry) = self.tasks.get_mut(task_id) {
            for sid in entry.state.subtask_states.keys() {
                self.subtask_index.remove(sid);
            }
            entry.state.subtask_states.clear();
        }
    }

    /// Saca la tarea del registro junto con sus entradas de índice.
    pub fn remove(&mut self, task_id: &str) -> Option<TaskEntry> {
        self.drop_subtasks(task_id);
        self.tasks.remove(task_id)
    }

    #[cfg(test)]
    pub fn indexed_subtasks(&self) -> usize {
        self.subtask_index.len()
    }
}

/// Violación de invariante: falla fuerte en debug, error tipado en release.
pub(super) fn inconsistent(msg: String) -> SchedulerError {
    error!("inconsistencia interna: {}", msg);
    debug_assert!(false, "internal inconsistency: {msg}");
    SchedulerError::Inconsistent(msg)
}
