use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    ChangeTimeoutsRequest, CommandResponse, CreateTaskRequest, CreateTaskResponse, ErrorBody,
    LocalTaskStateSnapshot, ResourceDelta, ResourceHeader, ResultAck, ResultReport,
    ResultsDelayResponse, SubtaskRequest, SubtaskResponse, TaskHeader, TaskId, TaskState,
    VerifyResponse,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::SchedulerResult;
use crate::state::{AppState, NodeInfo};
use crate::task::{wordcount::WordCountTask, Task};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/node", get(node_info))
        .route("/api/v1/tasks", post(create_task).get(list_tasks))
        .route("/api/v1/tasks/progress", get(progresses))
        .route("/api/v1/tasks/:id", get(task_state).delete(delete_task))
        .route("/api/v1/tasks/:id/restart", post(restart_task))
        .route("/api/v1/tasks/:id/abort", post(abort_task))
        .route("/api/v1/tasks/:id/pause", post(pause_task))
        .route("/api/v1/tasks/:id/resume", post(resume_task))
        .route("/api/v1/tasks/:id/timeouts", post(change_timeouts))
        .route("/api/v1/tasks/:id/subtasks/next", post(next_subtask))
        .route("/api/v1/tasks/:id/resources", post(prepare_resource))
        .route("/api/v1/tasks/:id/results-delay", get(results_delay))
        .route("/api/v1/subtasks/:id/result", post(subtask_result))
        .route("/api/v1/subtasks/:id/verify", get(verify_subtask))
        .route("/api/v1/subtasks/:id/restart", post(restart_subtask))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResult<T> = SchedulerResult<Json<T>>;

fn done(res: SchedulerResult<()>) -> ApiResult<CommandResponse> {
    res.map(|()| Json(CommandResponse { ok: true }))
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg })).into_response()
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn node_info(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(state.node.as_ref().clone())
}

// Crea una tarea de wordcount con los archivos que hagan match con input_glob
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, Response> {
    if req.timeout_secs <= 0.0 || req.subtask_timeout_secs <= 0.0 {
        return Err(bad_request("los timeouts tienen que ser positivos".to_string()));
    }

    let task = WordCountTask::from_glob(
        &req.name,
        &req.input_glob,
        req.timeout_secs,
        req.subtask_timeout_secs,
    )
    .map_err(|e| bad_request(e.to_string()))?;

    if task.total_subtasks() == 0 {
        return Err(bad_request(format!(
            "ningún archivo coincide con {}",
            req.input_glob
        )));
    }

    let mut manager = state.manager.lock().await;
    let task_id = manager
        .create_task(Arc::new(task))
        .map_err(IntoResponse::into_response)?;
    let header = manager
        .task_header(&task_id)
        .map_err(IntoResponse::into_response)?;

    info!("tarea {} creada ({})", task_id, req.name);
    Ok(Json(CreateTaskResponse { task_id, header }))
}

// Cabeceras de las tareas que todavía reparten trabajo
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskHeader>> {
    let manager = state.manager.lock().await;
    let headers: Vec<TaskHeader> = manager.get_task_headers().collect();
    Json(headers)
}

async fn progresses(
    State(state): State<AppState>,
) -> Json<HashMap<TaskId, LocalTaskStateSnapshot>> {
    let manager = state.manager.lock().await;
    Json(manager.get_progresses())
}

async fn task_state(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<TaskState> {
    let mut manager = state.manager.lock().await;
    manager.query_task_state(&id).map(Json)
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.delete_task(&id))
}

async fn restart_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.restart_task(&id))
}

async fn abort_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.abort_task(&id))
}

async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.pause_task(&id))
}

async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.resume_task(&id))
}

async fn change_timeouts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChangeTimeoutsRequest>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.change_timeouts(
        &id,
        req.full_task_timeout,
        req.subtask_timeout,
        req.min_subtask_time,
    ))
}

// Un proveedor pide trabajo de una tarea concreta
async fn next_subtask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubtaskRequest>,
) -> ApiResult<SubtaskResponse> {
    let mut manager = state.manager.lock().await;
    let ctd = manager
        .get_next_subtask(
            &req.node_id,
            &id,
            req.performance,
            req.max_resource_size,
            req.max_memory_size,
            req.num_cores,
        )
        .await?;
    Ok(Json(SubtaskResponse { ctd }))
}

async fn prepare_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(header): Json<ResourceHeader>,
) -> ApiResult<ResourceDelta> {
    let mut manager = state.manager.lock().await;
    manager.prepare_resource(&id, &header).map(Json)
}

async fn results_delay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ResultsDelayResponse> {
    let mut manager = state.manager.lock().await;
    let delay = manager.accept_results_delay(&id)?;
    Ok(Json(ResultsDelayResponse { delay }))
}

// El proveedor entrega el resultado de una subtarea
async fn subtask_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<ResultReport>,
) -> ApiResult<ResultAck> {
    let mut manager = state.manager.lock().await;
    if let Err(e) = manager.computed_task_received(&id, report.data).await {
        warn!("resultado de {} para {} rechazado: {}", report.node_id, id, e);
        return Err(e);
    }
    Ok(Json(ResultAck {
        subtask_id: id,
        accepted: true,
    }))
}

async fn verify_subtask(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<VerifyResponse> {
    let manager = state.manager.lock().await;
    let valid = manager.verify_subtask(&id).await;
    Json(VerifyResponse {
        subtask_id: id,
        valid,
    })
}

async fn restart_subtask(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CommandResponse> {
    let mut manager = state.manager.lock().await;
    done(manager.restart_subtask(&id))
}
