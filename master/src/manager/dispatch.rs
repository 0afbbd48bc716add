use std::sync::Arc;

use common::{ComputeTaskDef, TaskHeader};
use tracing::{debug, info, warn};

use super::{
    registry::{inconsistent, TaskEntry},
    TaskManager,
};
use crate::error::{SchedulerError, SchedulerResult};
use crate::hooks::guarded;

/// ¿Puede esta tarea darle trabajo a un proveedor con estos límites (KiB)?
fn has_subtasks(entry: &TaskEntry, max_resource_size: u64, max_memory_size: u64) -> bool {
    if !entry.state.status.is_active() {
        return false;
    }
    if !entry.task.needs_computation() {
        return false;
    }
    if entry.header.resource_size > max_resource_size.saturating_mul(1024) {
        return false;
    }
    if entry.header.estimated_memory > max_memory_size.saturating_mul(1024) {
        return false;
    }
    true
}

impl TaskManager {
    /// Reparte la siguiente subtarea de `task_id` al proveedor `node_id`.
    ///
    /// `Err(TaskNotFound)` si la tarea no es nuestra, `Ok(None)` si no hay
    /// trabajo para este proveedor (no se toca ningún estado).
    pub async fn get_next_subtask(
        &mut self,
        node_id: &str,
        task_id: &str,
        estimated_performance: f64,
        max_resource_size: u64,
        max_memory_size: u64,
        num_cores: u32,
    ) -> SchedulerResult<Option<ComputeTaskDef>> {
        let Some(entry) = self.registry.get(task_id) else {
            info!("no encuentro la tarea {} entre mis tareas", task_id);
            return Err(SchedulerError::TaskNotFound(task_id.to_string()));
        };

        if !has_subtasks(entry, max_resource_size, max_memory_size) {
            info!(
                "no hay subtarea de {} para rendimiento estimado {}",
                task_id, estimated_performance
            );
            return Ok(None);
        }

        let task = Arc::clone(&entry.task);
        let late_task = Arc::clone(&task);
        let late_id = task_id.to_string();
        // si el hook vence, la unidad que reserve tarde vuelve a la cola
        let ctd = self
            .hooks
            .run_or_recover(
                move || task.query_extra_data(estimated_performance, num_cores),
                move |ctd: ComputeTaskDef| {
                    warn!(
                        "subtarea {} de {} llegó tarde, se devuelve a la tarea",
                        ctd.subtask_id, late_id
                    );
                    guarded(&late_id, "subtask_failed", || {
                        late_task.subtask_failed(&ctd.subtask_id, &ctd.extra_data)
                    });
                },
            )
            .await
            .map_err(|e| SchedulerError::Hook {
                task_id: task_id.to_string(),
                hook: "query_extra_data",
                reason: e.to_string(),
            })?;

        if ctd.task_id != task_id {
            return Err(inconsistent(format!(
                "task {} produced ctd for task {}",
                task_id, ctd.task_id
            )));
        }

        self.registry.add_subtask(node_id, &ctd)?;
        debug!(
            "subtarea {} de {} asignada a {} (perf {})",
            ctd.subtask_id, task_id, node_id, estimated_performance
        );

        self.events.task_updated(task_id);
        self.events.subtask_updated(&ctd.subtask_id);
        Ok(Some(ctd))
    }

    /// Cabeceras de las tareas activas que todavía necesitan cómputo.
    /// Perezosa y de sólo lectura: cada llamada recorre el registro de nuevo.
    pub fn get_task_headers(&self) -> impl Iterator<Item = TaskHeader> + '_ {
        self.registry
            .entries()
            .filter(|e| e.task.needs_computation() && e.state.status.is_active())
            .map(|e| e.header.clone())
    }

    pub fn task_header(&self, task_id: &str) -> SchedulerResult<TaskHeader> {
        self.registry
            .get(task_id)
            .map(|e| e.header.clone())
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::*;
    use common::{SubtaskStatus, TaskStatus};

    use crate::error::SchedulerError;
    use crate::task::Task;

    #[tokio::test]
    async fn work_reserved_after_hook_timeout_goes_back_to_the_task() {
        let mut h = harness_with_hook_timeout(Duration::from_millis(30));
        let task = add(
            &mut h.manager,
            FakeTask::new(1).with_slow_dispatch(Duration::from_millis(150)),
        );

        let err = h
            .manager
            .get_next_subtask("p1", &task.id(), 1000.0, 1024, 1024, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Hook {
                hook: "query_extra_data",
                ..
            }
        ));
        assert_eq!(h.manager.registry.indexed_subtasks(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(Calls::get(&task.calls.subtask_failed), 1);
        assert!(task.needs_computation());
        let again = h
            .manager
            .get_next_subtask("p2", &task.id(), 1000.0, 1024, 1024, 1)
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let mut h = harness();

        let err = h
            .manager
            .get_next_subtask("p1", "no-existe", 1000.0, 1024, 1024, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn no_work_when_task_does_not_need_computation() {
        let mut h = harness();
        let task = add(&mut h.manager, FakeTask::new(0));
        let before = h.events.task_events();

        let ctd = h
            .manager
            .get_next_subtask("p1", &task.id(), 1000.0, 1024, 1024, 1)
            .await
            .unwrap();

        assert!(ctd.is_none());
        assert_eq!(h.manager.registry.indexed_subtasks(), 0);
        assert_eq!(h.events.task_events(), before);
    }

    #[tokio::test]
    async fn resource_and_memory_limits_are_in_kib() {
        let mut h = harness();
        // 2 KiB de recursos, 4 KiB de memoria
        let task = add(&mut h.manager, FakeTask::new(3).with_sizes(2048, 4096));

        let too_small_resources = h
            .manager
            .get_next_subtask("p1", &task.id(), 1.0, 1, 10, 1)
            .await
            .unwrap();
        assert!(too_small_resources.is_none());

        let too_small_memory = h
            .manager
            .get_next_subtask("p1", &task.id(), 1.0, 10, 3, 1)
            .await
            .unwrap();
        assert!(too_small_memory.is_none());

        let entry = h.manager.registry.get(&task.id()).unwrap();
        assert!(entry.state.subtask_states.is_empty());
        assert_eq!(task.subtasks_left(), 3);

        let exact = h
            .manager
            .get_next_subtask("p1", &task.id(), 1.0, 2, 4, 1)
            .await
            .unwrap();
        assert!(exact.is_some());
    }

    #[tokio::test]
    async fn two_dispatches_yield_distinct_subtasks_of_the_same_task() {
        let mut h = harness();
        let task = add(&mut h.manager, FakeTask::new(2).with_timeouts(100.0, 7.0));

        let c1 = h
            .manager
            .get_next_subtask("p1", &task.id(), 1500.0, 1024, 1024, 4)
            .await
            .unwrap()
            .unwrap();
        let c2 = h
            .manager
            .get_next_subtask("p2", &task.id(), 900.0, 1024, 1024, 2)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(c1.subtask_id, c2.subtask_id);
        assert_eq!(h.manager.registry.owner_of(&c1.subtask_id), Some(&task.id()));
        assert_eq!(h.manager.registry.owner_of(&c2.subtask_id), Some(&task.id()));

        let entry = h.manager.registry.get(&task.id()).unwrap();
        let ss = &entry.state.subtask_states[&c2.subtask_id];
        assert_eq!(ss.status, SubtaskStatus::Starting);
        assert_eq!(ss.ttl, 7.0);
        assert_eq!(ss.computer.node_id, "p2");
        assert_eq!(ss.computer.performance, 900.0);
        assert_eq!(entry.state.status, TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn paused_task_gives_no_work_and_is_hidden_from_headers() {
        let mut h = harness();
        let task = add(&mut h.manager, FakeTask::new(1));
        assert_eq!(h.manager.get_task_headers().count(), 1);

        h.manager.pause_task(&task.id()).unwrap();

        assert_eq!(h.manager.get_task_headers().count(), 0);
        let ctd = h
            .manager
            .get_next_subtask("p1", &task.id(), 1.0, 1024, 1024, 1)
            .await
            .unwrap();
        assert!(ctd.is_none());
    }

    #[tokio::test]
    async fn headers_skip_tasks_without_pending_work() {
        let mut h = harness();
        let busy = add(&mut h.manager, FakeTask::new(1));
        add(&mut h.manager, FakeTask::new(0));

        let headers: Vec<_> = h.manager.get_task_headers().collect();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].task_id, busy.id());

        // se puede volver a recorrer
        assert_eq!(h.manager.get_task_headers().count(), 1);
    }
}
