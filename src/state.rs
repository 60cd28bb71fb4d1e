use crate::client::Tracker;
use crate::config::Config;
use crate::identity::LocalIdentity;
use crate::storage::StoreData;
use crate::store::{AccessRules, MemoryStore};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Mutex<Tracker<MemoryStore>>>,
}

impl AppState {
    pub fn new(config: &Config, data: StoreData) -> Self {
        let rules = AccessRules {
            read_only: config.read_only,
        };
        let store = Arc::new(MemoryStore::new(data, rules).persist_to(config.data_path.clone()));
        let tracker = Tracker::new(
            store,
            Arc::new(LocalIdentity::new()),
            &config.admin_email,
        );
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
        }
    }
}
