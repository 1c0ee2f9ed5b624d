// rest/routes/tasks.rs: Task CRUD handlers.
//
// Every committed mutation is broadcast to all connected change-feed clients
// (including the originator) before the HTTP response is returned.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use crate::error::BoardError;
use crate::store::{NewTask, Task, TaskPatch};
use crate::ws::event::ChangeKind;
use crate::AppContext;

type ApiError = (StatusCode, Json<Value>);

fn into_api_error(e: BoardError) -> ApiError {
    let status = match &e {
        BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        BoardError::InvalidField { .. } | BoardError::InvalidMove(_) => StatusCode::BAD_REQUEST,
        BoardError::Persistence(_) | BoardError::OrderCorruption { .. } => {
            error!(err = %e, "task mutation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "message": e.to_string() })))
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
    }))
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = ctx.store.list().await.map_err(into_api_error)?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = ctx.store.create(body).await.map_err(into_api_error)?;
    ctx.broadcaster.broadcast(ChangeKind::Create, &task);
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx.store.update(id, body).await.map_err(into_api_error)?;
    ctx.broadcaster.broadcast(ChangeKind::Update, &task);
    Ok(Json(task))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx.store.delete(id).await.map_err(into_api_error)?;
    ctx.broadcaster.broadcast(ChangeKind::Delete, &task);
    Ok(Json(task))
}
