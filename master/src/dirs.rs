use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::warn;

/// Directorios de trabajo por tarea: `<root>/<node_id>/<task_id>/{tmp,output}`.
#[derive(Debug, Clone)]
pub struct DirManager {
    root: PathBuf,
    node_id: String,
}

impl DirManager {
    pub fn new(root: impl Into<PathBuf>, node_id: &str) -> Self {
        Self {
            root: root.into(),
            node_id: node_id.to_string(),
        }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(&self.node_id).join(task_id)
    }

    pub fn task_temporary_dir(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("tmp")
    }

    pub fn task_output_dir(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("output")
    }

    /// Vacía el directorio temporal de la tarea. Idempotente; los errores
    /// sólo se loguean.
    pub fn clear_temporary(&self, task_id: &str) {
        let tmp = self.task_temporary_dir(task_id);
        if let Err(e) = recreate_dir(&tmp) {
            warn!("no se pudo limpiar {}: {}", tmp.display(), e);
        }
    }

    /// Borra todo el árbol de la tarea. Para tareas que dejan de existir.
    pub fn remove_task_dirs(&self, task_id: &str) {
        let dir = self.task_dir(task_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("no se pudo borrar {}: {}", dir.display(), e),
        }
    }
}

fn recreate_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)
}
