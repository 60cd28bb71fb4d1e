use crate::store::Fields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{io, path::Path};
use tokio::fs;
use tracing::{debug, error};

/// The backend's whole document tree: collection path -> document id -> fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreData {
    pub collections: BTreeMap<String, BTreeMap<String, Fields>>,
}

pub async fn load_data(path: &Path) -> StoreData {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to parse data file {}: {err}", path.display());
                StoreData::default()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => StoreData::default(),
        Err(err) => {
            error!("failed to read data file {}: {err}", path.display());
            StoreData::default()
        }
    }
}

pub async fn persist_data(path: &Path, data: &StoreData) -> Result<(), io::Error> {
    let payload = serde_json::to_vec_pretty(data)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).await?;
    fs::rename(&tmp_path, path).await?;
    debug!("persisted store to {}", path.display());
    Ok(())
}
