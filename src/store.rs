use crate::departure::Departure;
use crate::settings::OperatorSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("read store snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse store snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read side of the hosted relational store, as far as announcements need it.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    async fn departure(&self, id: &str) -> Result<Departure, StoreError>;
    async fn operator_settings(&self, operator_id: &str) -> Result<OperatorSettings, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub departures: Vec<Departure>,
    #[serde(default)]
    pub operators: Vec<OperatorSettings>,
}

impl Snapshot {
    fn departure(&self, id: &str) -> Result<Departure, StoreError> {
        self.departures
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "departure",
                id: id.to_string(),
            })
    }

    fn operator(&self, operator_id: &str) -> Result<OperatorSettings, StoreError> {
        self.operators
            .iter()
            .find(|o| o.operator_id == operator_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "operator",
                id: operator_id.to_string(),
            })
    }
}

/// Store backed by a JSON snapshot file, re-read on every lookup so edits
/// made by other tools are picked up.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&self) -> Result<Snapshot, StoreError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

#[async_trait]
impl StructuredStore for JsonStore {
    async fn departure(&self, id: &str) -> Result<Departure, StoreError> {
        self.load().await?.departure(id)
    }

    async fn operator_settings(&self, operator_id: &str) -> Result<OperatorSettings, StoreError> {
        self.load().await?.operator(operator_id)
    }
}

/// In-process store; departures can be updated while announcements run.
#[derive(Default)]
pub struct MemoryStore {
    departures: RwLock<HashMap<String, Departure>>,
    operators: RwLock<HashMap<String, OperatorSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for departure in snapshot.departures {
            store.put_departure(departure);
        }
        for operator in snapshot.operators {
            store.put_operator(operator);
        }
        store
    }

    pub fn put_departure(&self, departure: Departure) {
        self.departures
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(departure.id.clone(), departure);
    }

    pub fn put_operator(&self, settings: OperatorSettings) {
        self.operators
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(settings.operator_id.clone(), settings);
    }
}

#[async_trait]
impl StructuredStore for MemoryStore {
    async fn departure(&self, id: &str) -> Result<Departure, StoreError> {
        self.departures
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "departure",
                id: id.to_string(),
            })
    }

    async fn operator_settings(&self, operator_id: &str) -> Result<OperatorSettings, StoreError> {
        self.operators
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(operator_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "operator",
                id: operator_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::departure::{DepartureStatus, FleetType};

    fn snapshot() -> Snapshot {
        Snapshot {
            departures: vec![Departure {
                id: "d1".to_string(),
                branch_id: "b1".to_string(),
                operator_id: "op".to_string(),
                destination: "Kampot".to_string(),
                plate_number: "2A-1234".to_string(),
                departure_time: "09:00".to_string(),
                status: DepartureStatus::OnTime,
                estimated_time: None,
                fleet_type: FleetType::Bus,
                fleet_image: None,
            }],
            operators: vec![OperatorSettings::new("op", "Larryta")],
        }
    }

    #[tokio::test]
    async fn json_store_reads_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, serde_json::to_vec(&snapshot()).unwrap()).unwrap();

        let store = JsonStore::new(path);
        assert_eq!(store.departure("d1").await.unwrap().destination, "Kampot");
        assert_eq!(store.operator_settings("op").await.unwrap().operator_name, "Larryta");
        assert!(matches!(
            store.departure("missing").await,
            Err(StoreError::NotFound { kind: "departure", .. })
        ));
    }

    #[tokio::test]
    async fn json_store_reports_missing_file() {
        let store = JsonStore::new(PathBuf::from("/nonexistent/store.json"));
        assert!(matches!(store.departure("d1").await, Err(StoreError::Io { .. })));
    }

    #[tokio::test]
    async fn memory_store_updates_in_place() {
        let store = MemoryStore::from_snapshot(snapshot());
        let mut departure = store.departure("d1").await.unwrap();
        departure.status = DepartureStatus::Boarding;
        store.put_departure(departure);
        assert_eq!(
            store.departure("d1").await.unwrap().status,
            DepartureStatus::Boarding
        );
    }
}
