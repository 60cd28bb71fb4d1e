pub mod app;
pub mod client;
pub mod config;
pub mod derivation;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod live;
pub mod models;
pub mod session;
pub mod state;
pub mod stats;
pub mod storage;
pub mod store;
pub mod timers;

pub use app::{router, run_ticker};
pub use client::Tracker;
pub use config::Config;
pub use state::AppState;
pub use storage::load_data;
