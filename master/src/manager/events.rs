use std::sync::Arc;

use tracing::{debug, error};

/// Observador de cambios de estado. Se invoca de forma síncrona dentro de
/// la sección exclusiva del planificador: tiene que ser rápido, no puede
/// fallar y no puede volver a llamar al `TaskManager`.
pub trait TaskEventListener: Send + Sync {
    fn task_status_updated(&self, task_id: &str);

    fn subtask_status_updated(&self, _subtask_id: &str) {}
}

#[derive(Default)]
pub struct EventNotifier {
    listeners: Vec<Arc<dyn TaskEventListener>>,
}

fn same_listener(a: &Arc<dyn TaskEventListener>, b: &Arc<dyn TaskEventListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl EventNotifier {
    pub fn register(&mut self, listener: Arc<dyn TaskEventListener>) -> bool {
        if self.listeners.iter().any(|l| same_listener(l, &listener)) {
            error!("listener ya registrado, se ignora");
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn unregister(&mut self, listener: &Arc<dyn TaskEventListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same_listener(l, listener));
        before != self.listeners.len()
    }

    pub fn task_updated(&self, task_id: &str) {
        for l in &self.listeners {
            l.task_status_updated(task_id);
        }
    }

    pub fn subtask_updated(&self, subtask_id: &str) {
        for l in &self.listeners {
            l.subtask_status_updated(subtask_id);
        }
    }
}

/// Listener que sólo deja rastro en el log; el master lo registra al arrancar.
pub struct LoggingListener;

impl TaskEventListener for LoggingListener {
    fn task_status_updated(&self, task_id: &str) {
        debug!("tarea {} actualizada", task_id);
    }

    fn subtask_status_updated(&self, subtask_id: &str) {
        debug!("subtarea {} actualizada", subtask_id);
    }
}
