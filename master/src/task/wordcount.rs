use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, bail, Context};
use common::{
    new_id,
    wordcount::{merge_counts, parse_counts, write_counts_file, WordCounts},
    ComputeTaskDef, ResourceDelta, ResourceHeader, SubtaskId, TaskHeader,
};
use serde_json::{json, Value};
use tracing::debug;

use super::Task;
use crate::dirs::DirManager;

/// Memoria estimada por subtarea respecto al archivo más grande.
const MEMORY_FACTOR: u64 = 4;

/// WordCount distribuido: una subtarea por archivo de entrada.
pub struct WordCountTask {
    header: TaskHeader,
    name: String,
    inputs: Vec<String>,
    parts: Mutex<Partitions>,
}

#[derive(Default)]
struct Partitions {
    pending: VecDeque<usize>,
    /// subtarea → partición, para todo lo repartido desde el último restart
    issued: HashMap<SubtaskId, usize>,
    in_flight: HashSet<SubtaskId>,
    received: HashMap<SubtaskId, WordCounts>,
    output_dir: Option<PathBuf>,
    aborted: bool,
}

impl Partitions {
    fn fresh(n: usize) -> Self {
        Self {
            pending: (0..n).collect(),
            ..Default::default()
        }
    }

    fn is_accepted(&self, subtask_id: &str) -> bool {
        self.received
            .get(subtask_id)
            .map(|counts| counts.values().all(|&c| c > 0))
            .unwrap_or(false)
    }

    /// Primer resultado aceptado de cada partición.
    fn accepted_by_partition(&self) -> HashMap<usize, &WordCounts> {
        let mut out = HashMap::new();
        for (sid, counts) in &self.received {
            if !self.is_accepted(sid) {
                continue;
            }
            if let Some(&p) = self.issued.get(sid) {
                out.entry(p).or_insert(counts);
            }
        }
        out
    }
}

impl WordCountTask {
    pub fn new(name: &str, inputs: Vec<String>, timeout: f64, subtask_timeout: f64) -> Self {
        let sizes: Vec<u64> = inputs
            .iter()
            .map(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0))
            .collect();

        let mut header = TaskHeader::new(new_id(), timeout, subtask_timeout);
        header.resource_size = sizes.iter().sum();
        header.estimated_memory = sizes.iter().copied().max().unwrap_or(0) * MEMORY_FACTOR;

        let n = inputs.len();
        Self {
            header,
            name: name.to_string(),
            inputs,
            parts: Mutex::new(Partitions::fresh(n)),
        }
    }

    /// Crea la tarea con todos los archivos que hagan match con `input_glob`.
    pub fn from_glob(
        name: &str,
        input_glob: &str,
        timeout: f64,
        subtask_timeout: f64,
    ) -> anyhow::Result<Self> {
        let mut inputs = Vec::new();
        for entry in glob::glob(input_glob).with_context(|| format!("patrón inválido: {input_glob}"))? {
            let path = entry?;
            if path.is_file() {
                inputs.push(path.to_string_lossy().to_string());
            }
        }
        inputs.sort();

        Ok(Self::new(name, inputs, timeout, subtask_timeout))
    }

    fn parts(&self) -> MutexGuard<'_, Partitions> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Task for WordCountTask {
    fn header(&self) -> TaskHeader {
        self.header.clone()
    }

    fn initialize(&self, dirs: &DirManager) -> anyhow::Result<()> {
        let out = dirs.task_output_dir(&self.header.task_id);
        fs::create_dir_all(&out)?;
        self.parts().output_dir = Some(out);
        Ok(())
    }

    fn needs_computation(&self) -> bool {
        let parts = self.parts();
        !parts.aborted && !parts.pending.is_empty()
    }

    fn query_extra_data(&self, performance: f64, _num_cores: u32) -> anyhow::Result<ComputeTaskDef> {
        let mut parts = self.parts();
        if parts.aborted {
            bail!("tarea {} abortada", self.header.task_id);
        }
        let partition = parts
            .pending
            .pop_front()
            .ok_or_else(|| anyhow!("no quedan particiones pendientes"))?;

        let subtask_id = new_id();
        parts.issued.insert(subtask_id.clone(), partition);
        parts.in_flight.insert(subtask_id.clone());

        let input_path = &self.inputs[partition];
        Ok(ComputeTaskDef {
            subtask_id,
            task_id: self.header.task_id.clone(),
            performance,
            extra_data: json!({ "partition": partition, "input_path": input_path }),
            short_description: format!("wordcount {input_path}"),
        })
    }

    fn verify_subtask(&self, subtask_id: &str) -> anyhow::Result<bool> {
        Ok(self.parts().is_accepted(subtask_id))
    }

    fn verify_task(&self) -> anyhow::Result<bool> {
        let parts = self.parts();
        let accepted = parts.accepted_by_partition();
        if accepted.len() < self.inputs.len() {
            return Ok(false);
        }

        let mut total = WordCounts::new();
        for counts in accepted.values() {
            merge_counts(&mut total, counts);
        }

        if let Some(dir) = &parts.output_dir {
            write_counts_file(&dir.join("wordcount.csv"), &total)?;
        }
        debug!(
            "wordcount {} verificado: {} palabras distintas",
            self.header.task_id,
            total.len()
        );
        Ok(true)
    }

    fn computation_finished(
        &self,
        subtask_id: &str,
        result: &str,
        dirs: &DirManager,
    ) -> anyhow::Result<()> {
        let mut parts = self.parts();
        let partition = *parts
            .issued
            .get(subtask_id)
            .ok_or_else(|| anyhow!("subtarea {subtask_id} no emitida por esta tarea"))?;
        parts.in_flight.remove(subtask_id);

        let counts = parse_counts(result)?;
        let out = dirs
            .task_output_dir(&self.header.task_id)
            .join(format!("part-{partition}.csv"));
        write_counts_file(&out, &counts)?;

        parts.received.insert(subtask_id.to_string(), counts);
        Ok(())
    }

    fn discard_result(&self, subtask_id: &str) {
        if self.parts().received.remove(subtask_id).is_some() {
            debug!("resultado tardío de {} descartado", subtask_id);
        }
    }

    fn finished_computation(&self) -> bool {
        let parts = self.parts();
        parts.pending.is_empty()
            && parts.in_flight.is_empty()
            && parts.accepted_by_partition().len() == self.inputs.len()
    }

    fn restart(&self) {
        let mut parts = self.parts();
        let output_dir = parts.output_dir.take();
        *parts = Partitions::fresh(self.inputs.len());
        parts.output_dir = output_dir;
    }

    fn restart_subtask(&self, subtask_id: &str) {
        let mut parts = self.parts();
        let Some(&partition) = parts.issued.get(subtask_id) else {
            return;
        };
        parts.in_flight.remove(subtask_id);
        parts.received.remove(subtask_id);
        if !parts.pending.contains(&partition) {
            parts.pending.push_back(partition);
        }
    }

    fn abort(&self) {
        let mut parts = self.parts();
        parts.aborted = true;
        parts.pending.clear();
    }

    fn subtask_failed(&self, subtask_id: &str, extra_data: &Value) {
        let mut parts = self.parts();
        if !parts.in_flight.remove(subtask_id) {
            return;
        }
        let partition = parts.issued.get(subtask_id).copied().or_else(|| {
            extra_data
                .get("partition")
                .and_then(Value::as_u64)
                .map(|p| p as usize)
        });
        if let Some(p) = partition {
            if !parts.aborted && !parts.pending.contains(&p) {
                parts.pending.push_back(p);
            }
        }
    }

    fn progress(&self) -> f64 {
        if self.inputs.is_empty() {
            return 1.0;
        }
        let done = self.parts().accepted_by_partition().len();
        done as f64 / self.inputs.len() as f64
    }

    fn short_extra_data_repr(&self, performance: f64) -> String {
        format!(
            "wordcount '{}': {} archivos (perf {:.0})",
            self.name,
            self.inputs.len(),
            performance
        )
    }

    fn prepare_resource_delta(&self, header: &ResourceHeader) -> anyhow::Result<ResourceDelta> {
        let files = self
            .inputs
            .iter()
            .filter(|f| !header.files.contains(f))
            .cloned()
            .collect();
        Ok(ResourceDelta { files })
    }

    fn total_subtasks(&self) -> usize {
        self.inputs.len()
    }

    fn active_subtasks(&self) -> usize {
        self.parts().in_flight.len()
    }

    fn subtasks_left(&self) -> usize {
        self.parts().pending.len()
    }
}
