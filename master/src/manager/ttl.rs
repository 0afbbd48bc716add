use std::{sync::Arc, time::Instant};

use common::{SubtaskId, SubtaskStatus, TaskId};
use serde::Serialize;
use tracing::info;

use super::TaskManager;
use crate::hooks::guarded;

/// Lo que hizo una pasada del barrido de TTL.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub expired_tasks: Vec<TaskId>,
    pub failed_subtasks: Vec<SubtaskId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_tasks.is_empty() && self.failed_subtasks.is_empty()
    }
}

/// Descuenta del TTL el tiempo transcurrido desde la última revisión.
fn age(ttl: &mut f64, last_checking: &mut Instant, now: Instant) {
    *ttl -= now.saturating_duration_since(*last_checking).as_secs_f64();
    *last_checking = now;
}

impl TaskManager {
    pub fn remove_expired(&mut self) -> SweepReport {
        self.remove_expired_at(Instant::now())
    }

    /// Envejece tareas activas y subtareas en curso contra `now`.
    ///
    /// Una tarea vencida se borra entera. Una subtarea vencida pasa a
    /// `Failure` y la tarea recibe el aviso para volver a ofrecer ese
    /// trabajo; su entrada de índice se conserva, así que un resultado
    /// tardío se rechaza como duplicado.
    pub fn remove_expired_at(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for task_id in self.registry.task_ids() {
            let Some(entry) = self.registry.get_mut(&task_id) else {
                continue;
            };
            if !entry.state.status.is_active() {
                continue;
            }

            age(&mut entry.header.ttl, &mut entry.header.last_checking, now);
            if entry.header.ttl <= 0.0 {
                info!("tarea {} venció su TTL, se elimina", task_id);
                self.registry.remove(&task_id);
                self.dirs.remove_task_dirs(&task_id);
                self.events.task_updated(&task_id);
                report.expired_tasks.push(task_id);
                continue;
            }

            let task = Arc::clone(&entry.task);
            let mut failed = Vec::new();
            for (sid, ss) in entry.state.subtask_states.iter_mut() {
                if ss.status != SubtaskStatus::Starting {
                    continue;
                }
                age(&mut ss.ttl, &mut ss.last_checking, now);
                if ss.ttl <= 0.0 {
                    info!("subtarea {} de {} venció su TTL", sid, task_id);
                    ss.status = SubtaskStatus::Failure;
                    guarded(&task_id, "subtask_failed", || {
                        task.subtask_failed(sid, &ss.extra_data)
                    });
                    failed.push(sid.clone());
                }
            }

            if !failed.is_empty() {
                self.events.task_updated(&task_id);
                for sid in &failed {
                    self.events.subtask_updated(sid);
                }
                report.failed_subtasks.extend(failed);
            }
        }

        report
    }
}
