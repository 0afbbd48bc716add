use anyhow::{anyhow, Context, Result};
use common::{
    wordcount::{count_file, render_counts},
    ComputeTaskDef, ErrorBody, ResultAck, ResultReport, SubtaskRequest, SubtaskResponse,
    TaskHeader,
};
use reqwest::Client;
use serde_json::Value;
use std::{env, sync::Arc, time::Duration};
use sysinfo::{System, SystemExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_WORKER_CONCURRENCY: usize = 2;
const DEFAULT_WORKER_PERFORMANCE: f64 = 1000.0;
/// 1 GiB de recursos por defecto
const DEFAULT_MAX_RESOURCE_KIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub base_url: String,
    pub concurrency: usize,
    pub performance: f64,
    pub max_resource_kib: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            base_url: get("MASTER_BASE_URL").unwrap_or_else(|| "http://master:8080".to_string()),
            concurrency: parse_or(&get, "WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?.max(1),
            performance: parse_or(&get, "WORKER_PERFORMANCE", DEFAULT_WORKER_PERFORMANCE)?,
            max_resource_kib: parse_or(&get, "WORKER_MAX_RESOURCE_KIB", DEFAULT_MAX_RESOURCE_KIB)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow!("{key}: valor inválido {v:?}")),
        None => Ok(default),
    }
}

/// Id del proveedor: hostname + sufijo aleatorio, para poder correr varios
/// workers en la misma máquina.
fn node_id() -> String {
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", hostname, &suffix[..8])
}

fn input_path(ctd: &ComputeTaskDef) -> Result<String> {
    ctd.extra_data
        .get("input_path")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("subtarea {} sin input_path", ctd.subtask_id))
}

/// Loop principal del worker.
/// - Lee las cabeceras de tareas que reparten trabajo.
/// - Pide subtareas mientras tenga "slots" libres.
/// - Cuenta palabras en un hilo bloqueante y entrega el CSV.
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let cfg = WorkerConfig::from_env()?;
    let client = Client::new();
    let node_id = node_id();

    // System para leer núcleos y memoria
    let mut sys = System::new_all();
    let num_cores = sys.cpus().len().max(1) as u32;

    info!(
        "worker {} con concurrency={} perf={} contra {}",
        node_id, cfg.concurrency, cfg.performance, cfg.base_url
    );

    let sem = Arc::new(Semaphore::new(cfg.concurrency));

    loop {
        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        sys.refresh_memory();
        // sysinfo devuelve bytes; el master espera KiB
        let request = SubtaskRequest {
            node_id: node_id.clone(),
            performance: cfg.performance,
            max_resource_size: cfg.max_resource_kib,
            max_memory_size: sys.available_memory() / 1024,
            num_cores,
        };

        match find_work(&client, &cfg.base_url, &request).await {
            Ok(Some(ctd)) => {
                info!(
                    "tengo subtarea {} de la tarea {} ({})",
                    ctd.subtask_id, ctd.task_id, ctd.short_description
                );
                tokio::spawn(compute_and_report(
                    client.clone(),
                    cfg.base_url.clone(),
                    node_id.clone(),
                    ctd,
                    permit,
                ));
            }
            Ok(None) => {
                drop(permit);
                debug!("worker {} pidió trabajo pero no hay", node_id);
                sleep(Duration::from_secs(2)).await;
            }
            Err(e) => {
                drop(permit);
                warn!("no se pudo hablar con el master: {:#}", e);
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Recorre las tareas anunciadas y pide una subtarea a cada una hasta
/// que alguna tenga trabajo para nosotros.
async fn find_work(
    client: &Client,
    base_url: &str,
    request: &SubtaskRequest,
) -> Result<Option<ComputeTaskDef>> {
    let headers: Vec<TaskHeader> = client
        .get(format!("{}/api/v1/tasks", base_url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for header in headers {
        let url = format!("{}/api/v1/tasks/{}/subtasks/next", base_url, header.task_id);
        let resp = client.post(&url).json(request).send().await?;
        if !resp.status().is_success() {
            // la tarea pudo vencer o borrarse entre las dos llamadas
            debug!("tarea {} respondió {}", header.task_id, resp.status());
            continue;
        }
        let SubtaskResponse { ctd } = resp.json().await?;
        if ctd.is_some() {
            return Ok(ctd);
        }
    }
    Ok(None)
}

async fn compute_and_report(
    client: Client,
    base_url: String,
    node_id: String,
    ctd: ComputeTaskDef,
    permit: OwnedSemaphorePermit,
) {
    let subtask_id = ctd.subtask_id.clone();

    let computed: Result<String> = async {
        let path = input_path(&ctd)?;
        let handle = tokio::task::spawn_blocking(move || -> Result<String> {
            let counts = count_file(&path).with_context(|| format!("leyendo {path}"))?;
            Ok(render_counts(&counts)?)
        });
        handle.await.context("hilo de cómputo")?
    }
    .await;

    // Si el cómputo falla no se reporta nada: la subtarea vence en el master
    // y vuelve a la cola.
    let data = match computed {
        Ok(data) => data,
        Err(e) => {
            warn!("error procesando subtarea {}: {:#}", subtask_id, e);
            drop(permit);
            return;
        }
    };

    let url = format!("{}/api/v1/subtasks/{}/result", base_url, subtask_id);
    let report = ResultReport { node_id, data };
    match client.post(&url).json(&report).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<ResultAck>().await {
            Ok(ack) => info!("subtarea {} entregada (aceptada={})", ack.subtask_id, ack.accepted),
            Err(e) => warn!("respuesta inválida al entregar {}: {}", subtask_id, e),
        },
        Ok(resp) => {
            let status = resp.status();
            let reason = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_default();
            warn!("master rechazó {} ({}): {}", subtask_id, status, reason);
        }
        Err(e) => warn!("error HTTP entregando {}: {}", subtask_id, e),
    }

    // Liberar el "slot" de concurrencia al terminar
    drop(permit);
}
