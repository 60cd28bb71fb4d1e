use crate::errors::AppError;
use crate::models::{
    AddTaskRequest, Alert, ChartQuery, ChartSet, DayFilterRequest, Principal, ResetConfirmRequest,
    ResetTicket, SessionResponse, SignInRequest, StatsRecord, Task, TaskView, TimerView,
};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};

pub async fn get_session(State(state): State<AppState>) -> Result<Json<SessionResponse>, AppError> {
    let mut tracker = state.tracker.lock().await;
    tracker.sync_auth().await?;
    Ok(Json(tracker.session()))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<Principal>, AppError> {
    let mut tracker = state.tracker.lock().await;
    let principal = tracker.sign_in(&payload.display_name, &payload.email).await?;
    Ok(Json(principal))
}

pub async fn sign_out(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.tracker.lock().await.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_tasks(State(state): State<AppState>) -> Result<Json<TaskView>, AppError> {
    let mut tracker = state.tracker.lock().await;
    Ok(Json(tracker.task_view(Local::now()).await?))
}

pub async fn add_task(
    State(state): State<AppState>,
    Json(payload): Json<AddTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let mut tracker = state.tracker.lock().await;
    let task = tracker
        .add_task(&payload.title, &payload.start, payload.hours)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn toggle_timer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TimerView>, AppError> {
    let mut tracker = state.tracker.lock().await;
    Ok(Json(tracker.toggle_timer(&id, Local::now()).await?))
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let mut tracker = state.tracker.lock().await;
    Ok(Json(tracker.complete_task(&id, Local::now()).await?))
}

pub async fn add_penalty(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.tracker.lock().await.add_penalty(Local::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_day_filter(
    State(state): State<AppState>,
    Json(payload): Json<DayFilterRequest>,
) -> Result<Json<Value>, AppError> {
    let day = match payload.day.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| AppError::bad_request(format!("invalid day '{value}'")))?,
        ),
    };
    let mut tracker = state.tracker.lock().await;
    tracker.set_day_filter(day)?;
    Ok(Json(json!({ "day": tracker.day_filter() })))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Vec<StatsRecord>>, AppError> {
    let mut tracker = state.tracker.lock().await;
    tracker.sync_auth().await?;
    Ok(Json(tracker.stats().to_vec()))
}

pub async fn get_charts(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<ChartSet>, AppError> {
    let mut tracker = state.tracker.lock().await;
    let period = query.period.unwrap_or_default();
    Ok(Json(tracker.charts(period, Local::now()).await?))
}

pub async fn drain_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.tracker.lock().await.drain_alerts())
}

pub async fn request_reset(State(state): State<AppState>) -> Result<Json<ResetTicket>, AppError> {
    let mut tracker = state.tracker.lock().await;
    Ok(Json(tracker.request_reset().await?))
}

pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<Json<Value>, AppError> {
    let mut tracker = state.tracker.lock().await;
    let deleted = tracker.confirm_reset(&payload.token, Local::now()).await?;
    Ok(Json(json!({ "deleted_tasks": deleted })))
}
