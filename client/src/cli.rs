use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{
    ChangeTimeoutsRequest, CommandResponse, CreateTaskRequest, CreateTaskResponse, ErrorBody,
    LocalTaskStateSnapshot, TaskHeader, TaskState, VerifyResponse,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, env};

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crea una tarea de wordcount sobre los archivos del glob
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        #[arg(long, default_value = "/data/input/*")]
        input_glob: String,

        /// TTL de la tarea completa, en segundos
        #[arg(long, default_value_t = 3600.0)]
        timeout: f64,

        /// TTL de cada subtarea, en segundos
        #[arg(long, default_value_t = 120.0)]
        subtask_timeout: f64,
    },
    /// Lista las tareas que todavía reparten trabajo
    List,
    /// Avance de las tareas sin terminar
    Progress,
    /// Estado completo de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    Restart {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Marca una subtarea como fallida para que se vuelva a repartir
    RestartSubtask {
        #[arg(value_name = "SUBTASK_ID")]
        id: String,
    },
    Abort {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    Pause {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    Resume {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    Delete {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Cambia los plazos de una tarea (también los de subtareas ya repartidas)
    Timeouts {
        #[arg(value_name = "TASK_ID")]
        id: String,

        #[arg(long)]
        full: f64,

        #[arg(long)]
        subtask: f64,

        #[arg(long, default_value_t = 0.0)]
        min_subtask_time: f64,
    },
    /// Verifica el resultado de una subtarea sin tocar su estado
    Verify {
        #[arg(value_name = "SUBTASK_ID")]
        id: String,
    },
}

/// Devuelve el cuerpo parseado o el error que mandó el master.
async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let reason = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    bail!("{} ({})", reason, status)
}

async fn command(client: &Client, url: String) -> Result<()> {
    let CommandResponse { ok } = parse(client.post(&url).send().await?).await?;
    println!("ok: {ok}");
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();
    let tasks = format!("{}/api/v1/tasks", base_url);
    let subtasks = format!("{}/api/v1/subtasks", base_url);

    match cli.command {
        Commands::Submit {
            name,
            input_glob,
            timeout,
            subtask_timeout,
        } => {
            let req = CreateTaskRequest {
                name,
                input_glob,
                timeout_secs: timeout,
                subtask_timeout_secs: subtask_timeout,
            };
            let created: CreateTaskResponse =
                parse(client.post(&tasks).json(&req).send().await?).await?;

            println!("Tarea creada:");
            println!("  id: {}", created.task_id);
            println!(
                "  dueño: {}:{}",
                created.header.owner_address, created.header.owner_port
            );
            println!("  recursos: {} bytes", created.header.resource_size);
        }
        Commands::List => {
            let headers: Vec<TaskHeader> = parse(client.get(&tasks).send().await?).await?;
            if headers.is_empty() {
                println!("No hay tareas repartiendo trabajo");
            }
            for h in headers {
                println!(
                    "{}  ttl={:.0}s  subtask_timeout={:.0}s  recursos={}B",
                    h.task_id, h.ttl, h.subtask_timeout, h.resource_size
                );
            }
        }
        Commands::Progress => {
            let url = format!("{}/progress", tasks);
            let snaps: HashMap<String, LocalTaskStateSnapshot> =
                parse(client.get(&url).send().await?).await?;
            for s in snaps.values() {
                println!(
                    "{}  {:>5.1}%  total={} activas={} pendientes={}  {}",
                    s.task_id,
                    s.progress * 100.0,
                    s.total_subtasks,
                    s.active_subtasks,
                    s.subtasks_left,
                    s.description
                );
            }
        }
        Commands::Status { id } => {
            let url = format!("{}/{id}", tasks);
            let state: TaskState = parse(client.get(&url).send().await?).await?;

            println!("Tarea {id}:");
            println!("  estado: {:?}", state.status);
            println!("  progreso: {:.1}%", state.progress * 100.0);
            println!("  transcurrido: {:.1}s", state.elapsed_time);
            match state.remaining_time {
                Some(r) => println!("  restante: {:.1}s", r),
                None => println!("  restante: desconocido"),
            }
            for (sid, ss) in &state.subtask_states {
                println!(
                    "  - {sid}: {:?} en {} (ttl {:.0}s)",
                    ss.status, ss.computer.node_id, ss.ttl
                );
            }
        }
        Commands::Restart { id } => command(&client, format!("{}/{id}/restart", tasks)).await?,
        Commands::RestartSubtask { id } => {
            command(&client, format!("{}/{id}/restart", subtasks)).await?
        }
        Commands::Abort { id } => command(&client, format!("{}/{id}/abort", tasks)).await?,
        Commands::Pause { id } => command(&client, format!("{}/{id}/pause", tasks)).await?,
        Commands::Resume { id } => command(&client, format!("{}/{id}/resume", tasks)).await?,
        Commands::Delete { id } => {
            let url = format!("{}/{id}", tasks);
            let CommandResponse { ok } = parse(client.delete(&url).send().await?).await?;
            println!("ok: {ok}");
        }
        Commands::Timeouts {
            id,
            full,
            subtask,
            min_subtask_time,
        } => {
            let url = format!("{}/{id}/timeouts", tasks);
            let req = ChangeTimeoutsRequest {
                full_task_timeout: full,
                subtask_timeout: subtask,
                min_subtask_time,
            };
            let CommandResponse { ok } = parse(client.post(&url).json(&req).send().await?).await?;
            println!("ok: {ok}");
        }
        Commands::Verify { id } => {
            let url = format!("{}/{id}/verify", subtasks);
            let VerifyResponse { subtask_id, valid } =
                parse(client.get(&url).send().await?).await?;
            println!("{subtask_id}: {}", if valid { "válida" } else { "no válida" });
        }
    }

    Ok(())
}
