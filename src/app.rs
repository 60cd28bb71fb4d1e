use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::Local;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(handlers::get_session))
        .route("/api/auth/sign-in", post(handlers::sign_in))
        .route("/api/auth/sign-out", post(handlers::sign_out))
        .route("/api/tasks", get(handlers::get_tasks).post(handlers::add_task))
        .route("/api/tasks/:id/timer", post(handlers::toggle_timer))
        .route("/api/tasks/:id/complete", post(handlers::complete_task))
        .route("/api/penalty", post(handlers::add_penalty))
        .route("/api/view/day", put(handlers::set_day_filter))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/charts", get(handlers::get_charts))
        .route("/api/alerts", get(handlers::drain_alerts))
        .route("/api/reset", post(handlers::request_reset))
        .route("/api/reset/confirm", post(handlers::confirm_reset))
        .with_state(state)
}

/// Wall-clock tick driving re-derivation and active-task alerts.
pub async fn run_ticker(state: AppState, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let mut tracker = state.tracker.lock().await;
        if let Err(err) = tracker.tick(Local::now()).await {
            warn!("tick failed: {err}");
        }
    }
}
