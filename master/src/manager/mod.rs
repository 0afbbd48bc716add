//! Ciclo de vida de tareas y subtareas.
//!
//! `TaskManager` es el único dueño del registro de tareas, del índice de
//! subtareas y de los listeners. No es `Clone`: el master lo comparte como
//! `SharedTaskManager` y toda operación (reparto, resultados, barrido de
//! TTL, comandos) se hace con el lock tomado de punta a punta.

mod control;
mod dispatch;
pub mod events;
mod registry;
mod results;
mod ttl;

use std::{path::PathBuf, sync::Arc, time::Instant};

use common::{TaskId, TaskState};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::dirs::DirManager;
use crate::error::{SchedulerError, SchedulerResult};
use crate::hooks::HookRunner;
use crate::task::Task;

use events::{EventNotifier, TaskEventListener};
use registry::{TaskEntry, TaskRegistry};

pub type SharedTaskManager = Arc<Mutex<TaskManager>>;

pub struct TaskManager {
    node_id: String,
    listen_address: String,
    listen_port: u16,
    registry: TaskRegistry,
    dirs: DirManager,
    hooks: HookRunner,
    events: EventNotifier,
}

impl TaskManager {
    pub fn new(
        node_id: &str,
        listen_address: &str,
        listen_port: u16,
        dirs: DirManager,
        hooks: HookRunner,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            listen_address: listen_address.to_string(),
            listen_port,
            registry: TaskRegistry::default(),
            dirs,
            hooks,
            events: EventNotifier::default(),
        }
    }

    pub fn into_shared(self) -> SharedTaskManager {
        Arc::new(Mutex::new(self))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn register_listener(&mut self, listener: Arc<dyn TaskEventListener>) -> bool {
        self.events.register(listener)
    }

    pub fn unregister_listener(&mut self, listener: &Arc<dyn TaskEventListener>) -> bool {
        self.events.unregister(listener)
    }

    /// Cambia la raíz de los directorios de trabajo para las tareas nuevas.
    pub fn change_config(&mut self, root: impl Into<PathBuf>) {
        self.dirs = DirManager::new(root, &self.node_id);
    }

    /// Alta de una tarea: se completa la dirección del dueño en la cabecera,
    /// se inicializa, se limpia su temporal y queda en `Waiting`.
    pub fn create_task(&mut self, task: Arc<dyn Task>) -> SchedulerResult<TaskId> {
        let mut header = task.header();
        let task_id = header.task_id.clone();
        if self.registry.contains(&task_id) {
            return Err(SchedulerError::DuplicateTask(task_id));
        }

        header.owner_address = self.listen_address.clone();
        header.owner_port = self.listen_port;
        header.last_checking = Instant::now();

        task.initialize(&self.dirs)
            .map_err(|e| SchedulerError::Hook {
                task_id: task_id.clone(),
                hook: "initialize",
                reason: e.to_string(),
            })?;

        self.registry.insert(TaskEntry {
            task,
            header,
            state: TaskState::waiting(),
        });
        self.dirs.clear_temporary(&task_id);

        info!("tarea {} registrada", task_id);
        self.events.task_updated(&task_id);
        Ok(task_id)
    }

    /// Entrada de una tarea conocida; las desconocidas se loguean.
    fn entry_mut(&mut self, task_id: &str) -> SchedulerResult<&mut TaskEntry> {
        match self.registry.get_mut(task_id) {
            Some(entry) => Ok(entry),
            None => {
                error!("tarea {} no está entre mis tareas", task_id);
                Err(SchedulerError::TaskNotFound(task_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Tarea falsa con contadores y un `TaskManager` listo para tests.

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use common::{
        new_id, ComputeTaskDef, ResourceDelta, ResourceHeader, TaskHeader,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::events::TaskEventListener;
    use super::TaskManager;
    use crate::dirs::DirManager;
    use crate::hooks::HookRunner;
    use crate::task::Task;

    #[derive(Default)]
    pub struct Calls {
        pub computation_finished: AtomicUsize,
        pub subtask_failed: AtomicUsize,
        pub restart: AtomicUsize,
        pub restart_subtask: AtomicUsize,
        pub abort: AtomicUsize,
        pub verify_task: AtomicUsize,
        pub discard_result: AtomicUsize,
    }

    impl Calls {
        pub fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct FakeState {
        required: usize,
        remaining: usize,
        finished: usize,
        accept_subtasks: bool,
        accept_task: bool,
        broken_verification: bool,
        slow_verification: Option<Duration>,
        slow_dispatch: Option<Duration>,
        slow_finish: Option<Duration>,
        panicking_failure: bool,
    }

    pub struct FakeTask {
        header: TaskHeader,
        pub calls: Calls,
        state: Mutex<FakeState>,
    }

    impl FakeTask {
        pub fn new(required: usize) -> Self {
            Self {
                header: TaskHeader::new(new_id(), 3600.0, 60.0),
                calls: Calls::default(),
                state: Mutex::new(FakeState {
                    required,
                    remaining: required,
                    finished: 0,
                    accept_subtasks: true,
                    accept_task: true,
                    broken_verification: false,
                    slow_verification: None,
                    slow_dispatch: None,
                    slow_finish: None,
                    panicking_failure: false,
                }),
            }
        }

        pub fn with_sizes(mut self, resource_size: u64, estimated_memory: u64) -> Self {
            self.header.resource_size = resource_size;
            self.header.estimated_memory = estimated_memory;
            self
        }

        pub fn with_timeouts(mut self, ttl: f64, subtask_timeout: f64) -> Self {
            self.header.ttl = ttl;
            self.header.subtask_timeout = subtask_timeout;
            self
        }

        pub fn rejecting_subtasks(self) -> Self {
            self.state.lock().unwrap().accept_subtasks = false;
            self
        }

        pub fn rejecting_task(self) -> Self {
            self.state.lock().unwrap().accept_task = false;
            self
        }

        pub fn with_broken_verification(self) -> Self {
            self.state.lock().unwrap().broken_verification = true;
            self
        }

        pub fn with_slow_verification(self, delay: Duration) -> Self {
            self.state.lock().unwrap().slow_verification = Some(delay);
            self
        }

        /// Sólo el primer `query_extra_data` tarda `delay`.
        pub fn with_slow_dispatch(self, delay: Duration) -> Self {
            self.state.lock().unwrap().slow_dispatch = Some(delay);
            self
        }

        pub fn with_slow_finish(self, delay: Duration) -> Self {
            self.state.lock().unwrap().slow_finish = Some(delay);
            self
        }

        pub fn with_panicking_failure(self) -> Self {
            self.state.lock().unwrap().panicking_failure = true;
            self
        }

        pub fn id(&self) -> String {
            self.header.task_id.clone()
        }
    }

    impl Task for FakeTask {
        fn header(&self) -> TaskHeader {
            self.header.clone()
        }

        fn needs_computation(&self) -> bool {
            self.state.lock().unwrap().remaining > 0
        }

        fn query_extra_data(&self, performance: f64, _num_cores: u32) -> anyhow::Result<ComputeTaskDef> {
            let slow = self.state.lock().unwrap().slow_dispatch.take();
            if let Some(delay) = slow {
                std::thread::sleep(delay);
            }
            let mut st = self.state.lock().unwrap();
            anyhow::ensure!(st.remaining > 0, "nada pendiente");
            st.remaining -= 1;
            Ok(ComputeTaskDef {
                subtask_id: new_id(),
                task_id: self.header.task_id.clone(),
                performance,
                extra_data: json!({ "chunk": st.remaining }),
                short_description: "fake".to_string(),
            })
        }

        fn verify_subtask(&self, _subtask_id: &str) -> anyhow::Result<bool> {
            let (broken, slow, accept) = {
                let st = self.state.lock().unwrap();
                (st.broken_verification, st.slow_verification, st.accept_subtasks)
            };
            if let Some(delay) = slow {
                std::thread::sleep(delay);
            }
            anyhow::ensure!(!broken, "verificador roto");
            Ok(accept)
        }

        fn verify_task(&self) -> anyhow::Result<bool> {
            self.calls.verify_task.fetch_add(1, Ordering::SeqCst);
            Ok(self.state.lock().unwrap().accept_task)
        }

        fn computation_finished(&self, _subtask_id: &str, _result: &str, _dirs: &DirManager) -> anyhow::Result<()> {
            self.calls
                .computation_finished
                .fetch_add(1, Ordering::SeqCst);
            let slow = self.state.lock().unwrap().slow_finish;
            if let Some(delay) = slow {
                std::thread::sleep(delay);
            }
            self.state.lock().unwrap().finished += 1;
            Ok(())
        }

        fn discard_result(&self, _subtask_id: &str) {
            self.calls.discard_result.fetch_add(1, Ordering::SeqCst);
            let mut st = self.state.lock().unwrap();
            st.finished = st.finished.saturating_sub(1);
        }

        fn finished_computation(&self) -> bool {
            let st = self.state.lock().unwrap();
            st.finished >= st.required
        }

        fn restart(&self) {
            self.calls.restart.fetch_add(1, Ordering::SeqCst);
            let mut st = self.state.lock().unwrap();
            st.remaining = st.required;
            st.finished = 0;
        }

        fn restart_subtask(&self, _subtask_id: &str) {
            self.calls
                .restart_subtask
                .fetch_add(1, Ordering::SeqCst);
            self.state.lock().unwrap().remaining += 1;
        }

        fn abort(&self) {
            self.calls.abort.fetch_add(1, Ordering::SeqCst);
            self.state.lock().unwrap().remaining = 0;
        }

        fn subtask_failed(&self, _subtask_id: &str, _extra_data: &Value) {
            self.calls
                .subtask_failed
                .fetch_add(1, Ordering::SeqCst);
            let mut st = self.state.lock().unwrap();
            if st.panicking_failure {
                drop(st);
                panic!("subtask_failed roto");
            }
            st.remaining += 1;
        }

        fn progress(&self) -> f64 {
            let st = self.state.lock().unwrap();
            if st.required == 0 {
                return 1.0;
            }
            st.finished as f64 / st.required as f64
        }

        fn short_extra_data_repr(&self, performance: f64) -> String {
            format!("fake perf {performance:.0}")
        }

        fn prepare_resource_delta(&self, header: &ResourceHeader) -> anyhow::Result<ResourceDelta> {
            Ok(ResourceDelta {
                files: header.files.clone(),
            })
        }

        fn accept_results_delay(&self) -> Option<f64> {
            Some(2.5)
        }

        fn total_subtasks(&self) -> usize {
            self.state.lock().unwrap().required
        }

        fn active_subtasks(&self) -> usize {
            0
        }

        fn subtasks_left(&self) -> usize {
            self.state.lock().unwrap().remaining
        }
    }

    /// Guarda todos los eventos recibidos.
    #[derive(Default)]
    pub struct Recorder {
        pub tasks: Mutex<Vec<String>>,
        pub subtasks: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn task_events(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }
    }

    impl TaskEventListener for Recorder {
        fn task_status_updated(&self, task_id: &str) {
            self.tasks.lock().unwrap().push(task_id.to_string());
        }

        fn subtask_status_updated(&self, subtask_id: &str) {
            self.subtasks.lock().unwrap().push(subtask_id.to_string());
        }
    }

    pub struct Harness {
        pub manager: TaskManager,
        pub events: Arc<Recorder>,
        pub root: TempDir,
    }

    pub fn harness() -> Harness {
        harness_with_hook_timeout(Duration::from_secs(2))
    }

    pub fn harness_with_hook_timeout(timeout: Duration) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let dirs = DirManager::new(root.path(), "node-test");
        let mut manager = TaskManager::new(
            "node-test",
            "10.0.0.1",
            40102,
            dirs,
            HookRunner::new(timeout, 2),
        );
        let events = Arc::new(Recorder::default());
        manager.register_listener(events.clone());
        Harness {
            manager,
            events,
            root,
        }
    }

    /// Registra la tarea y devuelve el handle para inspeccionar contadores.
    pub fn add(manager: &mut TaskManager, task: FakeTask) -> Arc<FakeTask> {
        let task = Arc::new(task);
        manager.create_task(task.clone()).unwrap();
        task
    }
}
