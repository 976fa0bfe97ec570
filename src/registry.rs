//! Model registry client (C10): a thin, cached facade over [`SensorStore`]
//! that is the only reader the (out-of-scope) prediction/read surface would
//! depend on.
//!
//! Loaded artifacts are cached in an explicit `horizon -> (model, loaded_at)`
//! map behind a single lock rather than re-deserializing bincode on every
//! lookup; the cache entry is refreshed once it is older than
//! [`CACHE_TTL`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{LookupOutcome, StoreError};
use crate::models::TrainedModel;
use crate::store::SensorStore;
use crate::training::regression::RidgeModel;

const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

struct CachedArtifact {
    model: Arc<RidgeModel>,
    loaded_at: Instant,
}

pub struct Registry {
    store: Arc<dyn SensorStore>,
    cache: Mutex<HashMap<i32, CachedArtifact>>,
}

impl Registry {
    pub fn new(store: Arc<dyn SensorStore>) -> Self {
        Registry {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// All rows the store currently considers active, one per horizon,
    /// most recently requested first (§4.9).
    pub async fn list_active_models(&self, limit: i64) -> Result<Vec<TrainedModel>, StoreError> {
        self.store.list_trained_models(limit).await
    }

    /// Loads the artifact for `horizon_hours`, serving a cached copy when
    /// it's younger than [`CACHE_TTL`]. Distinguishes "row missing",
    /// "artifact file unreadable", and "found" rather than collapsing them
    /// into a single `Result` (Design Notes: typed outcomes over 404s).
    pub async fn load_artifact(&self, horizon_hours: i32) -> LookupOutcome<Arc<RidgeModel>> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&horizon_hours) {
                if entry.loaded_at.elapsed() < CACHE_TTL {
                    return LookupOutcome::Found(entry.model.clone());
                }
            }
        }

        let rows = match self.store.list_trained_models(i64::MAX).await {
            Ok(rows) => rows,
            Err(e) => return LookupOutcome::Errored(e.to_string()),
        };

        let Some(row) = rows.into_iter().find(|r| r.forecast_horizon_hours == horizon_hours) else {
            return LookupOutcome::Absent;
        };

        if row.training_error.is_some() {
            return LookupOutcome::Errored(
                row.training_error.unwrap_or_else(|| "training run recorded an error".to_string()),
            );
        }

        let model = match Self::read_artifact(&row.model_path) {
            Ok(model) => Arc::new(model),
            Err(e) => return LookupOutcome::Errored(e),
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            horizon_hours,
            CachedArtifact {
                model: model.clone(),
                loaded_at: Instant::now(),
            },
        );
        LookupOutcome::Found(model)
    }

    fn read_artifact(path: &str) -> Result<RidgeModel, String> {
        let bytes = std::fs::read(Path::new(path)).map_err(|e| format!("failed to read {path}: {e}"))?;
        bincode::deserialize(&bytes).map_err(|e| format!("failed to deserialize {path}: {e}"))
    }

    /// Whether at least one registry row points at a readable artifact.
    /// Backs the out-of-scope read API's `/health/readiness` without the
    /// core depending on that surface.
    pub async fn has_any_artifact(&self) -> bool {
        match self.store.list_trained_models(i64::MAX).await {
            Ok(rows) => rows
                .iter()
                .any(|r| r.training_error.is_none() && Path::new(&r.model_path).is_file()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainedModelUpsert;
    use crate::store::fake::FakeStore;

    #[tokio::test]
    async fn absent_horizon_reports_absent() {
        let store: Arc<dyn SensorStore> = Arc::new(FakeStore::new());
        let registry = Registry::new(store);
        assert!(matches!(registry.load_artifact(7).await, LookupOutcome::Absent));
    }

    #[tokio::test]
    async fn row_with_training_error_reports_errored() {
        let store: Arc<dyn SensorStore> = Arc::new(FakeStore::new());
        store
            .upsert_trained_model(&TrainedModelUpsert {
                model_name: "temp_forecast".to_string(),
                forecast_horizon_hours: 3,
                model_path: None,
                training_duration_seconds: None,
                val_mae: None,
                val_rmse: None,
                val_mape: None,
                val_r2: None,
                naive_val_mae: None,
                naive_val_rmse: None,
                training_error: Some("fit panicked".to_string()),
            })
            .await
            .expect("upsert should succeed");

        let registry = Registry::new(store);
        match registry.load_artifact(3).await {
            LookupOutcome::Errored(msg) => assert!(msg.contains("panicked")),
            other => panic!("expected Errored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_artifact_file_reports_errored() {
        let store: Arc<dyn SensorStore> = Arc::new(FakeStore::new());
        store
            .upsert_trained_model(&TrainedModelUpsert {
                model_name: "temp_forecast".to_string(),
                forecast_horizon_hours: 5,
                model_path: Some("/nonexistent/path/model.bin".to_string()),
                training_duration_seconds: Some(1.0),
                val_mae: Some(0.1),
                val_rmse: Some(0.1),
                val_mape: Some(0.1),
                val_r2: Some(0.9),
                naive_val_mae: Some(0.2),
                naive_val_rmse: Some(0.2),
                training_error: None,
            })
            .await
            .expect("upsert should succeed");

        let registry = Registry::new(store);
        assert!(matches!(registry.load_artifact(5).await, LookupOutcome::Errored(_)));
    }
}
